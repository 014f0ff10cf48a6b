//! Error types for the postcraft host crate.

use postcraft_fetch::FetchError;

/// Top-level error type for postcraft.
#[derive(Debug, thiserror::Error)]
pub enum PostcraftError {
    /// Failure inside the acquisition layer.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for postcraft operations.
pub type Result<T> = std::result::Result<T, PostcraftError>;
