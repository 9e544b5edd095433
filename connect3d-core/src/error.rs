//! Error types for connect3d

use thiserror::Error;

/// Main error type for connect3d operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("Internal invariant violated: {0}")]
    Internal(String),

    #[error("Reconstruction cancelled by caller")]
    Cancelled,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Result type alias for connect3d operations
pub type Result<T> = std::result::Result<T, Error>;
