//! Flat-archive grouping.
//!
//! Settled files are copied, flattened by base name, into an incoming
//! directory. Once per detector cycle the grouper buckets the incoming
//! files by a key derived from the naming pattern, moves each bucket into
//! its own subdirectory and seals it into a tar archive in the sealed
//! directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use dropship_common::{ArchiveFormat, CommonError, archive_into, copy_path, move_path, remove_path};
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Separator placed between capture groups in a group key.
pub const GROUP_SEPARATOR: &str = "___";

/// Suffix of the fallback key for files the pattern cannot group.
const FALLBACK_SUFFIX: &str = "_archive";

/// Group key to the capture groups that produced it.
///
/// Rebuilt from the incoming listing on every collect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatPrefixGroups {
    groups: BTreeMap<String, Vec<String>>,
}

impl FlatPrefixGroups {
    /// All group keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether there are no groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Buckets flattened files by naming pattern and seals each bucket.
#[derive(Debug)]
pub struct FlatGrouper {
    incoming: PathBuf,
    sealed: PathBuf,
    pattern: Option<Regex>,
    groups: FlatPrefixGroups,
}

impl FlatGrouper {
    /// Create a grouper over `incoming`, writing archives to `sealed`.
    pub fn new(incoming: impl Into<PathBuf>, sealed: impl Into<PathBuf>, pattern: Option<Regex>) -> Self {
        Self {
            incoming: incoming.into(),
            sealed: sealed.into(),
            pattern,
            groups: FlatPrefixGroups::default(),
        }
    }

    /// Directory holding flattened files awaiting grouping.
    pub fn incoming(&self) -> &Path {
        &self.incoming
    }

    /// Directory holding sealed archives.
    pub fn sealed(&self) -> &Path {
        &self.sealed
    }

    /// Groups computed by the last [`collect`](Self::collect).
    pub fn groups(&self) -> &FlatPrefixGroups {
        &self.groups
    }

    /// Derive the capture groups and group key for a file name.
    ///
    /// Falls back to `<name>_archive` when the pattern does not match, the
    /// joined key is empty, or it equals the file name itself.
    pub fn group_key(&self, name: &str) -> (Vec<String>, String) {
        let fallback = format!("{name}{FALLBACK_SUFFIX}");

        let captures = self.pattern.as_ref().and_then(|p| p.captures(name));
        let Some(captures) = captures else {
            return (vec![fallback.clone()], fallback);
        };

        let parts: Vec<String> = if captures.len() > 1 {
            captures
                .iter()
                .skip(1)
                .map(|m| m.map_or_else(String::new, |m| m.as_str().to_string()))
                .collect()
        } else {
            vec![captures[0].to_string()]
        };

        let key = parts.join(GROUP_SEPARATOR);
        if parts.iter().all(String::is_empty) || key == name || key == "." || key == ".." {
            return (parts, fallback);
        }
        (parts, key)
    }

    /// Copy a settled source file into the incoming directory under its base name.
    pub fn stage(&self, source: &Path) -> Result<PathBuf> {
        let name = source
            .file_name()
            .ok_or_else(|| CommonError::NoFileName(source.to_path_buf()))?;
        let target = self.incoming.join(name);
        copy_path(source, &target)?;
        debug!("Staged {} for grouping", target.display());
        Ok(target)
    }

    /// Rebuild the group mapping from the current incoming listing.
    pub fn collect(&mut self) -> Result<&FlatPrefixGroups> {
        let mut groups = BTreeMap::new();
        for name in self.list_files()? {
            let (parts, key) = self.group_key(&name);
            groups.insert(key, parts);
        }
        self.groups = FlatPrefixGroups { groups };
        Ok(&self.groups)
    }

    /// Seal every collected group and return the archive paths.
    ///
    /// A group whose directory cannot be created is skipped this cycle. A
    /// file that fails to move is left behind and the rest of the group is
    /// still sealed.
    pub fn process(&mut self) -> Result<Vec<PathBuf>> {
        let names = self.list_files()?;
        let groups = std::mem::take(&mut self.groups);
        let mut sealed = Vec::with_capacity(groups.len());

        for (key, parts) in &groups.groups {
            debug!("Sealing group {key} from captures {parts:?}");
            let group_dir = self.incoming.join(key);
            if let Err(e) = fs::create_dir_all(&group_dir) {
                error!("Failed to create group directory {}: {e}", group_dir.display());
                continue;
            }

            let mut moved = 0usize;
            for name in names.iter().filter(|n| self.group_key(n).1 == *key) {
                let from = self.incoming.join(name);
                match move_path(&from, &group_dir.join(name)) {
                    Ok(()) => moved += 1,
                    Err(e) => warn!("Failed to move {} into group {key}: {e}", from.display()),
                }
            }
            if moved == 0 && is_empty_dir(&group_dir) {
                debug!("Group {key} has no files left, skipping");
                discard(&group_dir);
                continue;
            }

            match archive_into(&group_dir, ArchiveFormat::Tar, &self.sealed) {
                Ok(archive) => {
                    info!("Sealed group {key} ({moved} files) into {}", archive.display());
                    sealed.push(archive);
                    discard(&group_dir);
                }
                Err(e) => {
                    error!("Failed to seal group {key}: {e}");
                    self.restore(&group_dir);
                }
            }
        }

        Ok(sealed)
    }

    /// Archives left in the sealed directory, e.g. by an interrupted run.
    pub fn pending_sealed(&self) -> Result<Vec<PathBuf>> {
        let mut pending = Vec::new();
        if !self.sealed.is_dir() {
            return Ok(pending);
        }
        for entry in fs::read_dir(&self.sealed)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                pending.push(entry.path());
            }
        }
        pending.sort();
        Ok(pending)
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.incoming)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Put a group's files back so the next cycle can try again.
    fn restore(&self, group_dir: &Path) {
        let entries = match fs::read_dir(group_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read {}: {e}", group_dir.display());
                return;
            }
        };
        for entry in entries.flatten() {
            let target = self.incoming.join(entry.file_name());
            if let Err(e) = move_path(&entry.path(), &target) {
                warn!("Failed to restore {}: {e}", entry.path().display());
            }
        }
        discard(group_dir);
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}

fn discard(path: &Path) {
    if let Err(e) = remove_path(path) {
        warn!("Failed to remove {}: {e}", path.display());
    }
}
