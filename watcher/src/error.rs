//! Error types for the stability detector.

use dropship_common::CommonError;
use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur in the stability detector and grouper.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Watched root not found.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// Invalid naming pattern.
    #[error("invalid naming pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Directory traversal error.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Shared utility error (copy, archive, queue).
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Background scan task failed.
    #[error("scan task failed: {0}")]
    Task(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatcherError {
    /// Whether the error only reports that the cancellation token fired.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Common(CommonError::Cancelled))
    }
}
