pub mod error;
pub mod logger;

pub use error::{Result, SwarmError};
pub use logger::setup_logging;
