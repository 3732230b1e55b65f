//! Working directory layout.

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Directories the pipeline stages own under the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkLayout {
    /// Prepare stage scratch area.
    pub pre_send: PathBuf,

    /// Staging directory of the primary destination.
    pub primary: PathBuf,

    /// Staging directory of the converted destination; hooks write here.
    pub converted: PathBuf,

    /// Flat-archive files awaiting grouping.
    pub flat_incoming: PathBuf,

    /// Sealed flat-archive groups awaiting the prepare stage.
    pub flat_sealed: PathBuf,
}

impl WorkLayout {
    /// Describe the layout rooted at `root` without touching the disk.
    pub fn new(root: &Path) -> Self {
        Self {
            pre_send: root.join("pre_send"),
            primary: root.join("outgoing").join("primary"),
            converted: root.join("outgoing").join("converted"),
            flat_incoming: root.join("flat").join("incoming"),
            flat_sealed: root.join("flat").join("sealed"),
        }
    }

    /// Create every directory of the layout rooted at `root`.
    pub fn create(root: &Path) -> anyhow::Result<Self> {
        let layout = Self::new(root);
        for dir in layout.dirs() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(layout)
    }

    fn dirs(&self) -> [&Path; 5] {
        [
            &self.pre_send,
            &self.primary,
            &self.converted,
            &self.flat_incoming,
            &self.flat_sealed,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_create_builds_every_directory() {
        let tmp = TempDir::new().unwrap();
        let layout = WorkLayout::create(&tmp.path().join("work")).unwrap();

        assert_eq!(layout.primary, tmp.path().join("work/outgoing/primary"));
        for dir in layout.dirs() {
            assert!(dir.is_dir(), "{} missing", dir.display());
        }
    }

    #[test]
    fn test_create_fails_under_a_file() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let err = WorkLayout::create(&blocker).unwrap_err();
        assert!(err.to_string().contains("failed to create directory"));
    }
}
