//! Configuration for the watched source tree.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dropship_common::BatchMode;
use regex::Regex;

use crate::error::{Result, WatcherError};

/// Immutable description of what is watched and how units are formed.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Root of the watched tree.
    pub source: PathBuf,

    /// Settle duration `D`; also the detector's cycle period.
    pub settle: Duration,

    /// How files are grouped into units.
    pub mode: BatchMode,

    /// Naming pattern used to group files in flat-archive mode.
    pub naming_pattern: Option<Regex>,
}

impl WatchConfig {
    /// Create a config for `source`, settling after `settle`.
    pub fn new(source: impl Into<PathBuf>, settle: Duration) -> Self {
        Self {
            source: source.into(),
            settle,
            mode: BatchMode::default(),
            naming_pattern: None,
        }
    }

    /// Set the batching mode.
    pub fn with_mode(mut self, mode: BatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Compile and set the flat-archive naming pattern.
    pub fn with_naming_pattern(mut self, pattern: &str) -> Result<Self> {
        self.naming_pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Root of the watched tree.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Check the config against the filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.settle.is_zero() {
            return Err(WatcherError::Config(
                "settle duration must be greater than zero".to_string(),
            ));
        }
        if !self.source.is_dir() {
            return Err(WatcherError::DirectoryNotFound(
                self.source.display().to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_watch_config_creation() {
        let config = WatchConfig::new("/data/outbox", Duration::from_secs(30))
            .with_mode(BatchMode::FlatArchive)
            .with_naming_pattern(r"^(\d+)_")
            .unwrap();

        assert_eq!(config.source(), Path::new("/data/outbox"));
        assert_eq!(config.mode, BatchMode::FlatArchive);
        assert!(config.naming_pattern.is_some());
    }

    #[test]
    fn test_invalid_pattern() {
        let result = WatchConfig::new("/tmp", Duration::from_secs(1)).with_naming_pattern("(");
        assert!(matches!(result, Err(WatcherError::InvalidPattern(_))));
    }

    #[test]
    fn test_validate() {
        let temp = TempDir::new().unwrap();
        assert!(WatchConfig::new(temp.path(), Duration::from_secs(1)).validate().is_ok());
        assert!(WatchConfig::new(temp.path(), Duration::ZERO).validate().is_err());
        assert!(
            WatchConfig::new(temp.path().join("missing"), Duration::from_secs(1))
                .validate()
                .is_err()
        );
    }
}
