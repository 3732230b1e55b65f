//! Batching modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::archive::ArchiveFormat;
use crate::error::CommonError;

/// How settled files are grouped into units and packaged for delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchMode {
    /// Every file is its own unit.
    Plain,

    /// All files below a top-level directory form one unit, delivered file by file.
    #[default]
    TopLevelGroup,

    /// Files are flattened by base name, grouped by a naming pattern and sealed into tar archives.
    FlatArchive,

    /// Top-level units are zipped on send.
    ZipPerUnit,

    /// Top-level units are tarred on send.
    TarPerUnit,
}

impl BatchMode {
    /// Whether files are aggregated under their top-level directory.
    pub fn groups_by_top_level(self) -> bool {
        !matches!(self, Self::Plain | Self::FlatArchive)
    }

    /// Whether this is the flat-archive mode.
    pub fn is_flat(self) -> bool {
        self == Self::FlatArchive
    }

    /// Archive format applied to directories on the delivery side, if any.
    pub fn delivery_archive(self) -> Option<ArchiveFormat> {
        match self {
            Self::ZipPerUnit => Some(ArchiveFormat::Zip),
            Self::TarPerUnit => Some(ArchiveFormat::Tar),
            Self::Plain | Self::TopLevelGroup | Self::FlatArchive => None,
        }
    }

    /// Canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::TopLevelGroup => "top-level-group",
            Self::FlatArchive => "flat-archive",
            Self::ZipPerUnit => "zip-per-unit",
            Self::TarPerUnit => "tar-per-unit",
        }
    }
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchMode {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The short names are kept for compatibility with older deployments.
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "file" => Ok(Self::Plain),
            "top-level-group" | "folder" => Ok(Self::TopLevelGroup),
            "flat-archive" | "flat_tar" => Ok(Self::FlatArchive),
            "zip-per-unit" | "zip" => Ok(Self::ZipPerUnit),
            "tar-per-unit" | "tar" => Ok(Self::TarPerUnit),
            other => Err(CommonError::UnknownBatchMode(other.to_string())),
        }
    }
}
