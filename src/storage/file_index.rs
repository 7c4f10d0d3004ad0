use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::RwLock;

use crate::storage::HashUtils;
use crate::utils::Result;

/// Fixed transfer unit. Every file is split into pieces of this size, with
/// the last piece running short.
pub const PIECE_SIZE: u32 = 256 * 1024;

/// One locally shared file. `local_path` stays on this node; remote peers
/// only ever see the [`FileMetadata`] projection.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub file_id: String,
    pub name: String,
    pub size: u64,
    pub piece_size: u32,
    pub piece_hashes: Vec<String>,
    pub file_hash: String,
    pub local_path: PathBuf,
}

impl FileRecord {
    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            file_id: self.file_id.clone(),
            name: self.name.clone(),
            size: self.size,
            piece_size: self.piece_size,
            piece_hashes: self.piece_hashes.clone(),
            file_hash: self.file_hash.clone(),
        }
    }

    pub fn summary(&self) -> FileSummary {
        FileSummary {
            file_id: self.file_id.clone(),
            name: self.name.clone(),
            size: self.size,
            piece_count: self.piece_hashes.len(),
        }
    }
}

/// Full metadata a downloader needs, safe to send over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_id: String,
    pub name: String,
    pub size: u64,
    pub piece_size: u32,
    pub piece_hashes: Vec<String>,
    pub file_hash: String,
}

/// Lightweight projection for directory-style listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    pub file_id: String,
    pub name: String,
    pub size: u64,
    pub piece_count: usize,
}

/// Registry of files this node seeds. The lock guards only the map; disk
/// reads happen outside it.
pub struct FileIndex {
    files: RwLock<HashMap<String, FileRecord>>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Index a file for sharing. Streams it once, computing the whole-file
    /// digest and one digest per piece. Returns `None` for paths that do not
    /// point at a regular file.
    pub async fn share(&self, path: &Path) -> Result<Option<FileMetadata>> {
        let path = match tokio::fs::canonicalize(path).await {
            Ok(path) => path,
            Err(_) => return Ok(None),
        };
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Ok(None);
        }
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => return Ok(None),
        };
        let size = meta.len();

        let mut file = File::open(&path).await?;
        let mut whole = Sha256::new();
        let mut piece_hashes = Vec::new();
        let mut buf = vec![0u8; PIECE_SIZE as usize];

        loop {
            let n = read_up_to(&mut file, &mut buf).await?;
            if n == 0 {
                break;
            }
            whole.update(&buf[..n]);
            piece_hashes.push(HashUtils::sha256_hex(&buf[..n]));
            if n < buf.len() {
                break;
            }
        }

        let file_hash = hex::encode(whole.finalize());
        let file_id = HashUtils::file_id(&name, &file_hash, size);

        let record = FileRecord {
            file_id: file_id.clone(),
            name,
            size,
            piece_size: PIECE_SIZE,
            piece_hashes,
            file_hash,
            local_path: path,
        };
        let metadata = record.metadata();

        let mut files = self.files.write().await;
        files.insert(file_id.clone(), record);
        info!(
            "sharing {} as {} ({} pieces)",
            metadata.name,
            file_id,
            metadata.piece_hashes.len()
        );

        Ok(Some(metadata))
    }

    pub async fn list_local(&self) -> Vec<FileSummary> {
        let files = self.files.read().await;
        files.values().map(FileRecord::summary).collect()
    }

    pub async fn describe(&self, file_id: &str) -> Option<FileMetadata> {
        let files = self.files.read().await;
        files.get(file_id).map(FileRecord::metadata)
    }

    /// Read one piece from disk and return it with its digest, recomputed on
    /// demand. `None` when the file is unknown or the index is out of range.
    pub async fn read_piece(&self, file_id: &str, piece_index: u32) -> Result<Option<(Vec<u8>, String)>> {
        let (path, piece_size, piece_count) = {
            let files = self.files.read().await;
            match files.get(file_id) {
                Some(record) => (
                    record.local_path.clone(),
                    record.piece_size,
                    record.piece_hashes.len(),
                ),
                None => return Ok(None),
            }
        };
        if piece_index as usize >= piece_count {
            return Ok(None);
        }

        let mut file = File::open(&path).await?;
        file.seek(SeekFrom::Start(piece_index as u64 * piece_size as u64))
            .await?;
        let mut buf = vec![0u8; piece_size as usize];
        let n = read_up_to(&mut file, &mut buf).await?;
        buf.truncate(n);

        let digest = HashUtils::sha256_hex(&buf);
        debug!("served piece {piece_index} of {file_id} ({n} bytes)");
        Ok(Some((buf, digest)))
    }
}

impl Default for FileIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Fill `buf` as far as possible, stopping early only at end of file.
async fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
