//! The transport capability and its closed set of implementations.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};
use crate::profile::DestinationProfile;
use crate::sftp::SftpTransport;
use crate::webdav::WebDavTransport;

/// One file to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// Local file to read.
    pub local_path: PathBuf,

    /// Destination path relative to the endpoint, `/`-separated.
    pub remote_path: String,

    /// Size in bytes.
    pub size: u64,
}

impl SendRequest {
    /// Build a request for `local_path`, named relative to `base` on the remote side.
    pub fn relative_to(local_path: &Path, base: &Path) -> std::io::Result<Self> {
        let size = std::fs::metadata(local_path)?.len();
        let relative = local_path.strip_prefix(base).unwrap_or(local_path);
        let remote_path = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");

        Ok(Self {
            local_path: local_path.to_path_buf(),
            remote_path,
            size,
        })
    }

    /// Remote path split into its segments.
    pub fn remote_segments(&self) -> impl Iterator<Item = &str> {
        self.remote_path.split('/').filter(|s| !s.is_empty())
    }
}

/// Capability every delivery protocol provides.
///
/// Both operations must tolerate being repeated for the same file: a send
/// that failed half-way is simply attempted again on a later cycle.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the name of this transport.
    fn name(&self) -> &str;

    /// Establish or verify the connection to the endpoint.
    async fn connect(&self) -> Result<()>;

    /// Deliver one file. `Ok` means the remote side confirmed it.
    async fn send_file(&self, request: &SendRequest) -> Result<()>;
}

/// Supported transport protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// WebDAV over HTTP(S).
    WebDav,

    /// SFTP over SSH.
    Sftp,
}

impl TransportKind {
    /// Canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebDav => "webdav",
            Self::Sftp => "sftp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webdav" => Ok(Self::WebDav),
            "sftp" => Ok(Self::Sftp),
            other => Err(TransportError::UnknownTransport(other.to_string())),
        }
    }
}

/// A transport chosen once at startup.
pub enum AnyTransport {
    /// WebDAV transport.
    WebDav(WebDavTransport),

    /// SFTP transport.
    Sftp(SftpTransport),
}

impl AnyTransport {
    /// Build the transport of `kind` for `profile`.
    pub fn new(kind: TransportKind, profile: &DestinationProfile) -> Result<Self> {
        match kind {
            TransportKind::WebDav => Ok(Self::WebDav(WebDavTransport::new(
                profile.url.clone(),
                profile.credentials.clone(),
            )?)),
            TransportKind::Sftp => Ok(Self::Sftp(SftpTransport::new(
                &profile.url,
                profile.credentials.clone(),
            )?)),
        }
    }

    /// Protocol of this transport.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::WebDav(_) => TransportKind::WebDav,
            Self::Sftp(_) => TransportKind::Sftp,
        }
    }
}

#[async_trait]
impl Transport for AnyTransport {
    fn name(&self) -> &str {
        match self {
            Self::WebDav(t) => t.name(),
            Self::Sftp(t) => t.name(),
        }
    }

    async fn connect(&self) -> Result<()> {
        match self {
            Self::WebDav(t) => t.connect().await,
            Self::Sftp(t) => t.connect().await,
        }
    }

    async fn send_file(&self, request: &SendRequest) -> Result<()> {
        match self {
            Self::WebDav(t) => t.send_file(request).await,
            Self::Sftp(t) => t.send_file(request).await,
        }
    }
}
