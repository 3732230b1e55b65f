//! Zip and tar packaging of files and directory trees.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::FileOptions;

use crate::error::{CommonError, Result};
use crate::fsutil::unique_path;

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    /// Deflate-compressed zip.
    Zip,

    /// Uncompressed tar.
    Tar,
}

impl ArchiveFormat {
    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Tar => "tar",
        }
    }
}

/// Archive `path` into `<path>.<ext>` next to it.
pub fn archive(path: &Path, format: ArchiveFormat) -> Result<PathBuf> {
    let dest_dir = path
        .parent()
        .ok_or_else(|| CommonError::NoFileName(path.to_path_buf()))?;
    archive_into(path, format, dest_dir)
}

/// Archive `path` into `dest_dir`, named after the path's base name.
///
/// Picks `<name>-N.<ext>` when `<name>.<ext>` already exists. Entries are
/// stored relative to the path's parent, so a directory unpacks into a
/// folder of the same name. A failed archive is removed before returning.
pub fn archive_into(path: &Path, format: ArchiveFormat, dest_dir: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(CommonError::NotFound(path.to_path_buf()));
    }
    let name = path
        .file_name()
        .ok_or_else(|| CommonError::NoFileName(path.to_path_buf()))?
        .to_string_lossy()
        .into_owned();

    fs::create_dir_all(dest_dir)?;
    let out = unique_path(dest_dir, &format!("{name}.{}", format.extension()));

    let result = match format {
        ArchiveFormat::Zip => write_zip(path, &out),
        ArchiveFormat::Tar => write_tar(path, &name, &out),
    };

    match result {
        Ok(()) => {
            debug!("Archived {} -> {}", path.display(), out.display());
            Ok(out)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&out) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove partial archive {}: {cleanup}", out.display());
                }
            }
            Err(e)
        }
    }
}

fn write_tar(path: &Path, name: &str, out: &Path) -> Result<()> {
    let mut builder = tar::Builder::new(File::create(out)?);
    if path.is_dir() {
        builder.append_dir_all(name, path)?;
    } else {
        builder.append_path_with_name(path, name)?;
    }
    builder.into_inner()?.sync_all()?;
    Ok(())
}

fn write_zip(path: &Path, out: &Path) -> Result<()> {
    let mut writer = zip::ZipWriter::new(File::create(out)?);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    let base = path.parent().unwrap_or_else(|| Path::new(""));

    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(base)
            .map_err(|_| CommonError::NoFileName(entry.path().to_path_buf()))?;
        let entry_name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer.add_directory(entry_name, options)?;
        } else {
            writer.start_file(entry_name, options)?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, &mut writer)?;
        }
    }

    writer.finish()?.sync_all()?;
    Ok(())
}
