use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, info, warn};
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use uuid::Uuid;

use crate::core::config::{Config, POLL_INTERVAL};
use crate::core::peer::{PeerRecord, PeerRegistry};
use crate::core::protocol::{
    ChatReply, ErrorReply, FileInfoReply, FileListReply, PieceReply, Request,
};
use crate::network::framing::{recv_frame, send_frame};
use crate::network::DiscoveryService;
use crate::storage::{FileIndex, FileMetadata, FileSummary};
use crate::transfer::{DownloadError, Downloaded, PeerRequester, SwarmDownloader};
use crate::utils::Result;

/// An inbound chat message, handed to the registered chat callback.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub from_peer_id: String,
    pub from_name: String,
    pub text: String,
    pub source: SocketAddr,
}

pub type ChatHook = Arc<dyn Fn(&ChatMessage) + Send + Sync>;

/// A file found on a remote peer by [`Node::find_files`].
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub peer_id: String,
    pub peer_name: String,
    pub addr: IpAddr,
    pub file: FileSummary,
}

/// The dispatcher's outbound primitive: one new connection per call, one
/// framed request, one framed reply within the timeout. Any network failure
/// uniformly becomes `None` ("peer unreachable").
#[derive(Clone)]
pub struct TcpRequester {
    timeout: Duration,
}

impl TcpRequester {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn exchange(&self, addr: SocketAddr, request: &Request) -> Result<Option<Value>> {
        let mut stream = timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| crate::utils::SwarmError::Network(format!("connect to {addr} timed out")))??;

        send_frame(&mut stream, request).await?;

        let reply: Option<Value> = timeout(self.timeout, recv_frame(&mut stream))
            .await
            .map_err(|_| {
                crate::utils::SwarmError::Network(format!("reply from {addr} timed out"))
            })??;
        Ok(reply)
    }
}

#[async_trait]
impl PeerRequester for TcpRequester {
    async fn request(&self, peer: &PeerRecord, request: &Request) -> Option<Value> {
        match self.exchange(peer.socket_addr(), request).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!("request to {} failed: {e}", peer.peer_id);
                None
            }
        }
    }
}

/// Application context tying discovery, the file index and the downloader
/// together. Constructed once at startup and passed by reference; there is
/// no global node instance.
pub struct Node {
    peer_id: String,
    config: Config,
    registry: Arc<PeerRegistry>,
    file_index: Arc<FileIndex>,
    requester: TcpRequester,
    downloader: SwarmDownloader<TcpRequester>,
    discovery: DiscoveryService,
    shutdown: Arc<AtomicBool>,
    chat_hook: Option<ChatHook>,
}

impl Node {
    pub fn new(config: Config) -> Self {
        let mut peer_id = Uuid::new_v4().simple().to_string();
        peer_id.truncate(12);

        let registry = Arc::new(PeerRegistry::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let requester = TcpRequester::new(config.request_timeout);
        let discovery = DiscoveryService::new(
            registry.clone(),
            peer_id.clone(),
            config.display_name.clone(),
            config.tcp_port,
            config.discovery_port,
            config.announce_interval,
            shutdown.clone(),
        );

        Self {
            peer_id,
            registry,
            file_index: Arc::new(FileIndex::new()),
            downloader: SwarmDownloader::new(requester.clone()),
            requester,
            discovery,
            shutdown,
            chat_hook: None,
            config,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a callback invoked for every inbound chat message. Must be
    /// set before [`Node::start`].
    pub fn set_chat_hook(&mut self, hook: impl Fn(&ChatMessage) + Send + Sync + 'static) {
        self.chat_hook = Some(Arc::new(hook));
    }

    /// Bind the TCP listener, then spawn the accept loop and both discovery
    /// loops. Returns once everything is running.
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.tcp_port)).await?;
        info!(
            "node {} ({}) listening on {}:{}",
            self.config.display_name,
            self.peer_id,
            crate::network::local_ip().await,
            self.config.tcp_port
        );

        self.spawn_accept_loop(listener);
        self.discovery.start().await?;
        Ok(())
    }

    /// Raise the cooperative shutdown flag. Every loop observes it at its
    /// next iteration boundary; in-flight exchanges finish naturally.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        info!("shutdown requested");
    }

    pub async fn share(&self, path: &Path) -> Result<Option<FileMetadata>> {
        self.file_index.share(path).await
    }

    pub async fn local_files(&self) -> Vec<FileSummary> {
        self.file_index.list_local().await
    }

    pub async fn peers(&self) -> Vec<PeerRecord> {
        self.registry.list_all().await
    }

    /// Download a file from every peer currently seeding it.
    pub async fn download(
        &self,
        file_id: &str,
        output: Option<&Path>,
    ) -> std::result::Result<Downloaded, DownloadError> {
        let peers = self.registry.list_all().await;
        self.downloader.download(file_id, &peers, output).await
    }

    /// One chat request to one known peer. Returns whether the peer
    /// acknowledged it.
    pub async fn send_chat(&self, peer_id: &str, text: &str) -> bool {
        let Some(peer) = self.registry.get(peer_id).await else {
            warn!("unknown peer id: {peer_id}");
            return false;
        };
        let request = Request::Chat {
            from_peer_id: self.peer_id.clone(),
            from_name: self.config.display_name.clone(),
            text: text.to_string(),
        };
        match self.requester.request(&peer, &request).await {
            Some(value) => serde_json::from_value::<ChatReply>(value)
                .map(|reply| reply.ok)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Ask every known peer for its file list and keep entries whose name or
    /// file id contains the query, case-insensitively.
    pub async fn find_files(&self, query: &str) -> Vec<RemoteFile> {
        let needle = query.to_lowercase();
        let mut matches = Vec::new();

        for peer in self.registry.list_all().await {
            let Some(value) = self.requester.request(&peer, &Request::ListFiles).await else {
                continue;
            };
            let Ok(reply) = serde_json::from_value::<FileListReply>(value) else {
                continue;
            };
            for file in reply.files {
                if file.name.to_lowercase().contains(&needle)
                    || file.file_id.to_lowercase().contains(&needle)
                {
                    matches.push(RemoteFile {
                        peer_id: peer.peer_id.clone(),
                        peer_name: peer.display_name.clone(),
                        addr: peer.addr,
                        file,
                    });
                }
            }
        }

        matches
    }

    fn spawn_accept_loop(&self, listener: TcpListener) {
        let file_index = self.file_index.clone();
        let chat_hook = self.chat_hook.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            while !shutdown.load(Ordering::Relaxed) {
                let (stream, addr) = match timeout(POLL_INTERVAL, listener.accept()).await {
                    // Poll timeout: loop around to observe shutdown.
                    Err(_) => continue,
                    Ok(Err(e)) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                    Ok(Ok(pair)) => pair,
                };

                let file_index = file_index.clone();
                let chat_hook = chat_hook.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, file_index, chat_hook).await {
                        // Protocol errors are fatal to this connection only.
                        debug!("connection from {addr} ended with error: {e}");
                    }
                });
            }
        });
    }
}

/// One request/response cycle. Malformed JSON and oversized frames error out
/// of here and drop the connection; a well-formed object with an unknown
/// `kind` gets an explicit failure reply instead.
async fn handle_connection<S>(
    mut stream: S,
    source: SocketAddr,
    file_index: Arc<FileIndex>,
    chat_hook: Option<ChatHook>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let raw: Option<Value> = recv_frame(&mut stream).await?;
    let Some(raw) = raw else {
        return Ok(());
    };

    let request: Request = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(_) => {
            send_frame(
                &mut stream,
                &ErrorReply {
                    ok: false,
                    error: "unknown message kind".to_string(),
                },
            )
            .await?;
            return Ok(());
        }
    };

    match request {
        Request::Chat {
            from_peer_id,
            from_name,
            text,
        } => {
            info!("[chat] {from_name}@{}: {text}", source.ip());
            if let Some(hook) = &chat_hook {
                hook(&ChatMessage {
                    from_peer_id,
                    from_name,
                    text,
                    source,
                });
            }
            send_frame(&mut stream, &ChatReply { ok: true }).await?;
        }
        Request::ListFiles => {
            let files = file_index.list_local().await;
            send_frame(&mut stream, &FileListReply { files }).await?;
        }
        Request::FileInfo { file_id } => {
            let file = file_index.describe(&file_id).await;
            send_frame(
                &mut stream,
                &FileInfoReply {
                    found: file.is_some(),
                    file,
                },
            )
            .await?;
        }
        Request::Piece {
            file_id,
            piece_index,
        } => {
            let reply = match file_index.read_piece(&file_id, piece_index).await? {
                Some((data, digest)) => {
                    PieceReply::success(file_id, piece_index, digest, BASE64.encode(&data))
                }
                None => PieceReply::failure("file not found or piece index out of range"),
            };
            send_frame(&mut stream, &reply).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::peer::unix_now;
    use tokio::io::AsyncWriteExt;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 50000))
    }

    async fn dispatch(request: Value, file_index: Arc<FileIndex>) -> Value {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(handle_connection(server, addr(), file_index, None));

        send_frame(&mut client, &request).await.expect("send");
        client.shutdown().await.expect("shutdown write");
        let reply: Option<Value> = recv_frame(&mut client).await.expect("recv");
        task.await.expect("join").expect("handler");
        reply.expect("one reply")
    }

    #[tokio::test]
    async fn unknown_kind_gets_explicit_failure_reply() {
        let reply = dispatch(
            serde_json::json!({ "kind": "TELEPORT" }),
            Arc::new(FileIndex::new()),
        )
        .await;
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["error"], "unknown message kind");
    }

    #[tokio::test]
    async fn list_files_and_file_info_dispatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, vec![7u8; 10_000]).await.expect("write");

        let file_index = Arc::new(FileIndex::new());
        let meta = file_index.share(&path).await.expect("share").expect("meta");

        let listing = dispatch(
            serde_json::json!({ "kind": "LIST_FILES" }),
            file_index.clone(),
        )
        .await;
        assert_eq!(listing["files"].as_array().expect("array").len(), 1);
        assert_eq!(listing["files"][0]["file_id"], meta.file_id.as_str());

        let found = dispatch(
            serde_json::json!({ "kind": "FILE_INFO", "file_id": meta.file_id }),
            file_index.clone(),
        )
        .await;
        assert_eq!(found["found"], true);
        assert_eq!(found["file"]["size"], 10_000);

        let missing = dispatch(
            serde_json::json!({ "kind": "FILE_INFO", "file_id": "nope" }),
            file_index,
        )
        .await;
        assert_eq!(missing["found"], false);
        assert!(missing.get("file").is_none());
    }

    #[tokio::test]
    async fn piece_dispatch_returns_verified_base64() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob.bin");
        let data: Vec<u8> = (0..70_000).map(|i| (i % 13) as u8).collect();
        tokio::fs::write(&path, &data).await.expect("write");

        let file_index = Arc::new(FileIndex::new());
        let meta = file_index.share(&path).await.expect("share").expect("meta");

        let reply = dispatch(
            serde_json::json!({ "kind": "PIECE", "file_id": meta.file_id, "piece_index": 0 }),
            file_index.clone(),
        )
        .await;
        assert_eq!(reply["ok"], true);
        let decoded = BASE64
            .decode(reply["data"].as_str().expect("data"))
            .expect("base64");
        assert_eq!(decoded, data);
        assert_eq!(reply["piece_hash"], meta.piece_hashes[0].as_str());

        let out_of_range = dispatch(
            serde_json::json!({ "kind": "PIECE", "file_id": meta.file_id, "piece_index": 9 }),
            file_index,
        )
        .await;
        assert_eq!(out_of_range["ok"], false);
    }

    #[tokio::test]
    async fn chat_dispatch_invokes_hook_and_acks() {
        let received: Arc<std::sync::Mutex<Vec<String>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = received.clone();
        let hook: ChatHook = Arc::new(move |message: &ChatMessage| {
            if let Ok(mut log) = sink.lock() {
                log.push(format!("{}: {}", message.from_name, message.text));
            }
        });

        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(handle_connection(
            server,
            addr(),
            Arc::new(FileIndex::new()),
            Some(hook),
        ));

        let request = Request::Chat {
            from_peer_id: "abc123".into(),
            from_name: "alice".into(),
            text: "hi there".into(),
        };
        send_frame(&mut client, &request).await.expect("send");
        let reply: Option<ChatReply> = recv_frame(&mut client).await.expect("recv");
        task.await.expect("join").expect("handler");

        assert!(reply.expect("reply").ok);
        assert_eq!(received.lock().expect("lock").join(","), "alice: hi there");
    }

    #[tokio::test]
    async fn tcp_requester_exchanges_over_real_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("served.bin");
        tokio::fs::write(&path, vec![3u8; 5000]).await.expect("write");

        let file_index = Arc::new(FileIndex::new());
        let meta = file_index.share(&path).await.expect("share").expect("meta");

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            let (stream, source) = listener.accept().await.expect("accept");
            let _ = handle_connection(stream, source, file_index, None).await;
        });

        let peer = PeerRecord {
            peer_id: "remote".into(),
            display_name: "remote".into(),
            addr: IpAddr::from([127, 0, 0, 1]),
            tcp_port: port,
            last_seen: unix_now(),
        };
        let requester = TcpRequester::new(Duration::from_secs(8));
        let request = Request::FileInfo {
            file_id: meta.file_id.clone(),
        };

        let value = requester.request(&peer, &request).await.expect("reply");
        let reply: FileInfoReply = serde_json::from_value(value).expect("parse");
        assert!(reply.found);
        assert_eq!(reply.file.expect("file").file_id, meta.file_id);
    }

    #[tokio::test]
    async fn tcp_requester_treats_refused_connection_as_unreachable() {
        // Bind then drop to find a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let peer = PeerRecord {
            peer_id: "gone".into(),
            display_name: "gone".into(),
            addr: IpAddr::from([127, 0, 0, 1]),
            tcp_port: port,
            last_seen: unix_now(),
        };
        let requester = TcpRequester::new(Duration::from_millis(500));
        let reply = requester.request(&peer, &Request::ListFiles).await;
        assert!(reply.is_none());
    }
}
