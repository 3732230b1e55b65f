//! Copy, move and remove helpers for files and directory trees.
//!
//! All helpers are synchronous and either produce the whole artifact or
//! return an error without leaving a usable partial copy behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{CommonError, Result};

/// Copy a file or a directory tree to `dst`.
///
/// Missing parent directories are created and existing files are
/// overwritten. If the copy fails part-way, whatever was created at `dst`
/// by this call is removed again.
pub fn copy_path(src: &Path, dst: &Path) -> Result<()> {
    let metadata = match fs::metadata(src) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CommonError::NotFound(src.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    let existed = dst.exists();

    let result = if metadata.is_dir() {
        copy_tree(src, dst)
    } else {
        copy_file(src, dst)
    };

    if result.is_err() && !existed {
        if let Err(e) = remove_path(dst) {
            warn!("Failed to clean up partial copy {}: {e}", dst.display());
        }
    }

    result
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)?;
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| CommonError::NoFileName(entry.path().to_path_buf()))?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Move a file or directory tree to `dst`.
///
/// Tries a rename first. When that is not possible (different filesystem,
/// or `dst` is an existing directory) the tree is copied, merging into any
/// existing destination, and the source removed afterwards.
pub fn move_path(src: &Path, dst: &Path) -> Result<()> {
    if !src.exists() {
        return Err(CommonError::NotFound(src.to_path_buf()));
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(
                "Rename {} -> {} failed ({e}), falling back to copy",
                src.display(),
                dst.display()
            );
            copy_path(src, dst)?;
            remove_path(src)
        }
    }
}

/// A path in `dir` named `name` that does not exist yet.
///
/// Tries `name` first, then `<stem>-N.<ext>` (or `<name>-N` without an
/// extension) for increasing `N`.
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let first = dir.join(name);
    if !first.exists() {
        return first;
    }
    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map_or_else(|| name.to_string(), |s| s.to_string_lossy().into_owned());
    let ext = as_path.extension().map(|e| e.to_string_lossy().into_owned());

    (1..)
        .map(|n| match &ext {
            Some(ext) => dir.join(format!("{stem}-{n}.{ext}")),
            None => dir.join(format!("{stem}-{n}")),
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// Remove a file or directory tree. A missing path is not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}
