//! Readiness classification of files by modification age.

use std::borrow::Cow;
use std::path::{Component, Path};
use std::time::{Duration, SystemTime};

use dropship_common::BatchMode;
use indexmap::IndexMap;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::WatchConfig;
use crate::error::{Result, WatcherError};

/// Identity under which files' readiness is aggregated.
///
/// The path relative to the watched root in plain and flat-archive mode,
/// otherwise the first segment of that path.
pub type FolderKey = String;

/// Where a file's age falls relative to the settle duration `D`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeClass {
    /// `age <= D`: still changing.
    Fresh,

    /// `D < age < 2D`: settled during the last cycle.
    Settled,

    /// `age >= 2D`: handled by an earlier cycle.
    Expired,
}

/// Classify a file's age against the settle duration.
pub fn classify_age(age: Duration, settle: Duration) -> AgeClass {
    if age >= settle.saturating_mul(2) {
        AgeClass::Expired
    } else if age > settle {
        AgeClass::Settled
    } else {
        AgeClass::Fresh
    }
}

/// Derive the folder key for a path relative to the watched root.
pub fn folder_key(relative: &Path, mode: BatchMode) -> FolderKey {
    let mut parts = relative.components().filter_map(|c| match c {
        Component::Normal(part) => Some(part.to_string_lossy()),
        _ => None,
    });

    if mode.groups_by_top_level() {
        parts.next().map(Cow::into_owned).unwrap_or_default()
    } else {
        parts.collect::<Vec<_>>().join("/")
    }
}

/// Per-cycle mapping from folder key to readiness, in first-seen order.
///
/// `true` means every file observed under the key this cycle is older than
/// `D`; `false` means at least one is not. Keys with no observed file are
/// absent. The table is rebuilt from scratch every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessTable {
    entries: IndexMap<FolderKey, bool>,
}

impl ReadinessTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one file observation.
    pub fn observe(&mut self, key: FolderKey, class: AgeClass) {
        match class {
            AgeClass::Expired => {}
            AgeClass::Settled => {
                self.entries.entry(key).or_insert(true);
            }
            AgeClass::Fresh => {
                self.entries.insert(key, false);
            }
        }
    }

    /// Readiness of a key, `None` when it was not observed.
    pub fn get(&self, key: &str) -> Option<bool> {
        self.entries.get(key).copied()
    }

    /// Keys that are ready, in observation order.
    pub fn ready_keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, ready)| **ready)
            .map(|(key, _)| key.as_str())
    }

    /// Number of observed keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key was observed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Walk the watched root and build this cycle's readiness table.
///
/// Entries that vanish or cannot be read mid-walk are skipped. Only regular
/// files are evaluated; directories and symlinks never drive readiness.
pub fn scan(config: &WatchConfig, now: SystemTime) -> Result<ReadinessTable> {
    let root = config.source();
    if !root.is_dir() {
        return Err(WatcherError::DirectoryNotFound(root.display().to_string()));
    }

    let mut table = ReadinessTable::new();
    let walker = WalkDir::new(root).min_depth(1).sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let modified = match entry.metadata().map(|m| m.modified()) {
            Ok(Ok(modified)) => modified,
            Ok(Err(e)) => {
                warn!("No modification time for {}: {e}", entry.path().display());
                continue;
            }
            Err(e) => {
                debug!("File vanished during walk: {e}");
                continue;
            }
        };
        // A timestamp in the future counts as just modified.
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        let class = classify_age(age, config.settle);
        if class == AgeClass::Expired {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            warn!("{} is outside {}", entry.path().display(), root.display());
            continue;
        };
        table.observe(folder_key(relative, config.mode), class);
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::{self, File};
    use tempfile::TempDir;

    const D: Duration = Duration::from_secs(10);

    fn write_aged(root: &Path, rel: &str, now: SystemTime, age: Duration) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, rel.as_bytes()).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(now - age)
            .unwrap();
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify_age(Duration::ZERO, D), AgeClass::Fresh);
        assert_eq!(classify_age(D, D), AgeClass::Fresh);
        assert_eq!(classify_age(D + Duration::from_millis(1), D), AgeClass::Settled);
        assert_eq!(classify_age(D * 2 - Duration::from_millis(1), D), AgeClass::Settled);
        assert_eq!(classify_age(D * 2, D), AgeClass::Expired);
    }

    #[test]
    fn test_folder_keys() {
        let rel = Path::new("a/b/c.txt");
        assert_eq!(folder_key(rel, BatchMode::Plain), "a/b/c.txt");
        assert_eq!(folder_key(rel, BatchMode::FlatArchive), "a/b/c.txt");
        assert_eq!(folder_key(rel, BatchMode::TopLevelGroup), "a");
        assert_eq!(folder_key(Path::new("solo.txt"), BatchMode::ZipPerUnit), "solo.txt");
    }

    #[test]
    fn test_fresh_overrides_settled_in_either_order() {
        let mut table = ReadinessTable::new();
        table.observe("a".into(), AgeClass::Settled);
        table.observe("a".into(), AgeClass::Fresh);
        table.observe("b".into(), AgeClass::Fresh);
        table.observe("b".into(), AgeClass::Settled);

        assert_eq!(table.get("a"), Some(false));
        assert_eq!(table.get("b"), Some(false));
        assert_eq!(table.ready_keys().count(), 0);
    }

    #[test]
    fn test_expired_is_never_observed() {
        let mut table = ReadinessTable::new();
        table.observe("old".into(), AgeClass::Expired);
        assert!(table.is_empty());
        assert_eq!(table.get("old"), None);
    }

    #[test]
    fn test_scan_plain_mode() {
        let temp = TempDir::new().unwrap();
        let now = SystemTime::now();
        write_aged(temp.path(), "settled.txt", now, D + Duration::from_secs(1));
        write_aged(temp.path(), "fresh.txt", now, Duration::from_secs(1));
        write_aged(temp.path(), "shipped.txt", now, D * 3);

        let config = WatchConfig::new(temp.path(), D).with_mode(BatchMode::Plain);
        let table = scan(&config, now).unwrap();

        assert_eq!(table.get("settled.txt"), Some(true));
        assert_eq!(table.get("fresh.txt"), Some(false));
        assert_eq!(table.get("shipped.txt"), None);
        assert_eq!(table.ready_keys().collect::<Vec<_>>(), vec!["settled.txt"]);
    }

    #[test]
    fn test_scan_groups_by_top_level() {
        let temp = TempDir::new().unwrap();
        let now = SystemTime::now();
        write_aged(temp.path(), "a/one.txt", now, D + Duration::from_secs(2));
        write_aged(temp.path(), "a/deep/two.txt", now, D + Duration::from_secs(3));
        write_aged(temp.path(), "b/one.txt", now, D + Duration::from_secs(2));
        write_aged(temp.path(), "b/two.txt", now, Duration::from_secs(2));

        let config = WatchConfig::new(temp.path(), D).with_mode(BatchMode::TopLevelGroup);
        let table = scan(&config, now).unwrap();

        assert_eq!(table.get("a"), Some(true));
        assert_eq!(table.get("b"), Some(false));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_empty_directories_never_observed() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("empty/nested")).unwrap();

        let config = WatchConfig::new(temp.path(), D);
        let table = scan(&config, SystemTime::now()).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_scan_missing_root() {
        let temp = TempDir::new().unwrap();
        let config = WatchConfig::new(temp.path().join("gone"), D);
        assert!(scan(&config, SystemTime::now()).is_err());
    }
}
