pub mod config;
pub mod node;
pub mod peer;
pub mod protocol;

pub use config::Config;
pub use node::{ChatMessage, Node, RemoteFile, TcpRequester};
pub use peer::{PeerRecord, PeerRegistry};
pub use protocol::{
    ChatReply, DiscoveryMessage, ErrorReply, FileInfoReply, FileListReply, PieceReply, Request,
};
