pub mod downloader;

pub use downloader::{DownloadError, Downloaded, PeerRequester, SwarmDownloader};
