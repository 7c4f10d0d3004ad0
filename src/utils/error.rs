use thiserror::Error;

pub type Result<T> = std::result::Result<T, SwarmError>;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("incoming frame exceeded {0} bytes before a terminator")]
    FrameTooLarge(usize),
}
