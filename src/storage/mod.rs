pub mod file_index;
pub mod hash;

pub use file_index::{FileIndex, FileMetadata, FileRecord, FileSummary, PIECE_SIZE};
pub use hash::HashUtils;
