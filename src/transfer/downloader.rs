use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::core::peer::PeerRecord;
use crate::core::protocol::{FileInfoReply, PieceReply, Request};
use crate::storage::{FileMetadata, HashUtils};

/// Outbound request capability the downloader depends on: one framed request
/// to one peer, one reply or `None` when the peer is unreachable. Injected at
/// construction so the downloader never holds a reference to its owner.
#[async_trait]
pub trait PeerRequester: Send + Sync {
    async fn request(&self, peer: &PeerRecord, request: &Request) -> Option<Value>;
}

/// Whole-download failure, reported as a value across the API boundary.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("no peers currently seed this file")]
    NoSeeders,

    #[error("some pieces could not be fetched or verified")]
    PiecesIncomplete,

    #[error("final file checksum mismatch")]
    ChecksumMismatch,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct Downloaded {
    pub file_id: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub pieces: usize,
}

/// Fetches a file's pieces in parallel from every peer that seeds it,
/// verifying each piece and the assembled whole.
pub struct SwarmDownloader<R> {
    requester: R,
}

impl<R: PeerRequester> SwarmDownloader<R> {
    pub fn new(requester: R) -> Self {
        Self { requester }
    }

    pub async fn download(
        &self,
        file_id: &str,
        peers: &[PeerRecord],
        output: Option<&Path>,
    ) -> Result<Downloaded, DownloadError> {
        // COLLECTING: the first answering peer fixes the canonical metadata;
        // peers reporting anything different are dropped from the seeder set.
        let (seeders, canonical) = self.collect_seeders(file_id, peers).await;
        let Some(canonical) = canonical else {
            return Err(DownloadError::NoSeeders);
        };
        if seeders.is_empty() {
            return Err(DownloadError::NoSeeders);
        }

        let total = canonical.piece_hashes.len();
        let workers = usize::min(8, usize::max(1, seeders.len() * 2));
        info!(
            "downloading {} ({} pieces) from {} seeder(s) with {} workers",
            file_id,
            total,
            seeders.len(),
            workers
        );

        // FETCHING: bounded-concurrency piece fetch into a shared buffer.
        let buffer: Mutex<HashMap<usize, Vec<u8>>> = Mutex::new(HashMap::new());
        let results: Vec<bool> = stream::iter(0..total)
            .map(|index| self.fetch_piece(file_id, index, &seeders, &canonical.piece_hashes, &buffer))
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut pieces = buffer.into_inner();
        if results.iter().any(|ok| !ok) || pieces.len() != total {
            return Err(DownloadError::PiecesIncomplete);
        }

        // ASSEMBLING: ascending index order; no output is written unless
        // every piece arrived verified.
        let mut ordered = Vec::with_capacity(total);
        for index in 0..total {
            match pieces.remove(&index) {
                Some(data) => ordered.push(data),
                None => return Err(DownloadError::PiecesIncomplete),
            }
        }

        let target = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(&canonical.name));
        let mut file = File::create(&target).await?;
        for data in &ordered {
            file.write_all(data).await?;
        }
        file.flush().await?;

        // VERIFYING: the per-piece checks cannot catch assembly-order bugs,
        // so the finished file is hashed once more against the canonical
        // whole-file digest.
        let actual = HashUtils::hash_file(&target)
            .await
            .map_err(|_| DownloadError::ChecksumMismatch)?;
        if actual != canonical.file_hash {
            let _ = tokio::fs::remove_file(&target).await;
            return Err(DownloadError::ChecksumMismatch);
        }

        info!("download complete: {}", target.display());
        Ok(Downloaded {
            file_id: file_id.to_string(),
            path: target,
            bytes: canonical.size,
            pieces: total,
        })
    }

    async fn collect_seeders(
        &self,
        file_id: &str,
        peers: &[PeerRecord],
    ) -> (Vec<PeerRecord>, Option<FileMetadata>) {
        let mut seeders = Vec::new();
        let mut canonical: Option<FileMetadata> = None;

        for peer in peers {
            let request = Request::FileInfo {
                file_id: file_id.to_string(),
            };
            let Some(value) = self.requester.request(peer, &request).await else {
                continue;
            };
            let Ok(reply) = serde_json::from_value::<FileInfoReply>(value) else {
                continue;
            };
            if !reply.found {
                continue;
            }
            let Some(info) = reply.file else {
                continue;
            };

            match &canonical {
                None => canonical = Some(info),
                Some(accepted)
                    if accepted.file_hash != info.file_hash
                        || accepted.piece_hashes != info.piece_hashes =>
                {
                    warn!(
                        "peer {} reported inconsistent metadata for {file_id}, excluding it",
                        peer.peer_id
                    );
                    continue;
                }
                Some(_) => {}
            }
            seeders.push(peer.clone());
        }

        (seeders, canonical)
    }

    /// Fetch one piece, rotating the starting seeder by piece index so load
    /// spreads across the set. The piece fails only after every seeder has
    /// been tried.
    async fn fetch_piece(
        &self,
        file_id: &str,
        index: usize,
        seeders: &[PeerRecord],
        expected: &[String],
        buffer: &Mutex<HashMap<usize, Vec<u8>>>,
    ) -> bool {
        for offset in 0..seeders.len() {
            let peer = &seeders[(index + offset) % seeders.len()];
            let request = Request::Piece {
                file_id: file_id.to_string(),
                piece_index: index as u32,
            };

            let Some(value) = self.requester.request(peer, &request).await else {
                continue;
            };
            let Ok(reply) = serde_json::from_value::<PieceReply>(value) else {
                continue;
            };
            if !reply.ok {
                continue;
            }
            let Some(encoded) = reply.data else {
                continue;
            };
            let Ok(raw) = BASE64.decode(encoded.as_bytes()) else {
                continue;
            };
            if !HashUtils::verify(&raw, &expected[index]) {
                warn!(
                    "piece {index} from {} failed verification, trying next seeder",
                    peer.peer_id
                );
                continue;
            }

            debug!("piece {index} fetched from {} ({} bytes)", peer.peer_id, raw.len());
            buffer.lock().await.insert(index, raw);
            return true;
        }

        warn!("piece {index}: exhausted all seeders");
        false
    }
}
