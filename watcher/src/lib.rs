//! # Dropship Watcher
//!
//! Decides, purely from file modification times sampled once per settle
//! period, when a file or subtree under the watched root has stopped
//! changing and is ready to ship.
//!
//! ## Features
//!
//! - **Two-horizon debounce**: a file must be untouched for longer than the
//!   settle duration `D`; files older than `2D` are treated as already shipped
//! - **Unit grouping**: per-file or per-top-level-directory readiness
//! - **Flat archiving**: settled files are flattened, grouped by a naming
//!   pattern and sealed into tar archives
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Stability Detector                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  WatchConfig ──► scan ──► ReadinessTable ──► UnitSender         │
//! │                              │                    ▲             │
//! │                              ▼                    │             │
//! │                         FlatGrouper ──► sealed archives         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod detector;
pub mod error;
pub mod grouper;
pub mod readiness;

pub use config::WatchConfig;
pub use detector::{CycleReport, StabilityDetector};
pub use error::{Result, WatcherError};
pub use grouper::{FlatGrouper, FlatPrefixGroups};
pub use readiness::{AgeClass, FolderKey, ReadinessTable, classify_age, folder_key, scan};
