//! Delivery error types.

use std::path::PathBuf;

use dropship_common::CommonError;
use dropship_transport::TransportError;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors produced while preparing or delivering units.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Walking a staged directory failed.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Staging, archiving or a file helper failed.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// The transport could not deliver a file.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A unit path has no final component to stage it under.
    #[error("path has no file name: {0}")]
    NoFileName(PathBuf),

    /// A blocking worker panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// Shutdown was requested mid-operation.
    #[error("cancelled")]
    Cancelled,
}

impl DeliveryError {
    /// Whether the error only reports cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Common(CommonError::Cancelled))
    }
}
