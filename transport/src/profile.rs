//! Destination profiles and credentials.

use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

/// User name and password for a destination.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub user: String,

    /// Password.
    pub password: String,
}

impl Credentials {
    /// Create credentials.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Whether no user name is set.
    pub fn is_anonymous(&self) -> bool {
        self.user.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything one delivery pipeline needs to know about its destination.
#[derive(Debug, Clone)]
pub struct DestinationProfile {
    /// Name used in logs (`primary`, `converted`).
    pub name: String,

    /// Endpoint URL.
    pub url: Url,

    /// Credentials for the endpoint.
    pub credentials: Credentials,

    /// Local staging directory polled by this pipeline's orchestrator.
    pub staging_dir: PathBuf,
}

impl DestinationProfile {
    /// Create a profile.
    pub fn new(
        name: impl Into<String>,
        url: Url,
        credentials: Credentials,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            url,
            credentials,
            staging_dir: staging_dir.into(),
        }
    }

    /// Local staging directory.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }
}
