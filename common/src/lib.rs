//! # Dropship Common
//!
//! Building blocks shared by every dropship pipeline stage.
//!
//! ## Features
//!
//! - **Batching Modes**: How settled files are grouped into units
//! - **Handoff Queues**: FIFO queues carrying ready units between stages
//! - **Archive Utilities**: Zip/tar packaging of files and directory trees
//! - **Copy Utilities**: Recursive copy and move with cleanup on failure
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Dropship Pipeline                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  StabilityDetector ──► PrepareStage ──► DeliveryOrchestrator    │
//! │         │      UnitSender/     │                │               │
//! │         ▼      UnitReceiver    ▼                ▼               │
//! │    FlatGrouper            copy_path        archive + Transport  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod archive;
pub mod error;
pub mod fsutil;
pub mod mode;
pub mod unit;

pub use archive::{ArchiveFormat, archive, archive_into};
pub use error::{CommonError, Result};
pub use fsutil::{copy_path, move_path, remove_path, unique_path};
pub use mode::BatchMode;
pub use unit::{ReadyUnit, UnitReceiver, UnitSender, handoff};
