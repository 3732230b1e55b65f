//! Error types shared across dropship crates.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for common operations.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared utilities.
#[derive(Error, Debug)]
pub enum CommonError {
    /// Source path does not exist.
    #[error("path not found: {0}")]
    NotFound(PathBuf),

    /// Path has no usable file name component.
    #[error("path has no file name: {0}")]
    NoFileName(PathBuf),

    /// Batching mode string was not recognised.
    #[error("unknown batch mode: {0}")]
    UnknownBatchMode(String),

    /// The receiving side of a handoff queue is gone.
    #[error("handoff queue closed")]
    QueueClosed,

    /// The operation was interrupted by the cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// Zip archive error.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Directory traversal error.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
