//! Error types for delivery transports.

use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur while connecting or sending.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Transport kind not recognised.
    #[error("transport type is not implemented: {0}")]
    UnknownTransport(String),

    /// Destination URL unusable for this transport.
    #[error("invalid destination url: {0}")]
    InvalidUrl(String),

    /// Server rejected the request.
    #[error("{method} {url} failed with status {status}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
    },

    /// Authentication was rejected.
    #[error("authentication failed for {0}")]
    Auth(String),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// SSH error.
    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),

    /// Fewer bytes reached the remote file than the local file holds.
    #[error("wrote {written} of {expected} bytes to {remote}")]
    Incomplete {
        remote: String,
        written: u64,
        expected: u64,
    },

    /// Blocking worker failed.
    #[error("transport task failed: {0}")]
    Task(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether retrying later may succeed.
    ///
    /// Setup errors are permanent; everything raised while talking to the
    /// remote side is transient.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::UnknownTransport(_) | Self::InvalidUrl(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(!TransportError::UnknownTransport("ftp".into()).is_transient());
        assert!(!TransportError::InvalidUrl("x".into()).is_transient());
        assert!(TransportError::Auth("host".into()).is_transient());
        assert!(
            TransportError::Status {
                method: "PUT",
                url: "http://h/a".into(),
                status: 503
            }
            .is_transient()
        );
    }
}
