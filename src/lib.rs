//! SwarmLink
//!
//! LAN file sharing without a central directory: peers find each other over
//! UDP broadcast and exchange files as hash-verified pieces fetched in
//! parallel from every seeder, BitTorrent style but confined to one subnet.

pub mod core;
pub mod network;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export main types
pub use crate::core::{ChatMessage, Config, Node, PeerRecord, PeerRegistry, RemoteFile};
pub use storage::{FileIndex, FileMetadata, FileSummary, PIECE_SIZE};
pub use transfer::{DownloadError, Downloaded, PeerRequester, SwarmDownloader};
pub use utils::{
    error::{Result, SwarmError},
    setup_logging,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
