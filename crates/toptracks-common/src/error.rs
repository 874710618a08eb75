//! Error types shared across TopTracks crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised while decoding shared value types
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid snapshot date: {0}")]
    InvalidSnapshotDate(String),

    #[error("Invalid feed kind: {0}")]
    InvalidFeedKind(String),

    #[error("Invalid feed folder name: {0}")]
    InvalidFolderName(String),
}
