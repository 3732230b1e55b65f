//! Ready units and the FIFO handoff queues that carry them between stages.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{CommonError, Result};

/// A settled file or directory handed downstream.
///
/// Ownership of the path moves with the unit: whoever receives it is
/// responsible for eventually archiving or deleting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyUnit {
    /// Path of the settled file or directory.
    pub path: PathBuf,

    /// Relative path the unit is staged and delivered under.
    pub key: PathBuf,

    /// When the unit was found to be settled.
    pub detected_at: DateTime<Utc>,
}

impl ReadyUnit {
    /// Create a unit detected now, keyed by its base name.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key = path
            .file_name()
            .map_or_else(|| path.clone(), PathBuf::from);
        Self::with_key(path, key)
    }

    /// Create a unit detected now, staged under `key` downstream.
    pub fn with_key(path: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            detected_at: Utc::now(),
        }
    }

    /// Path of the unit.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Relative staging key of the unit.
    ///
    /// Root, `.` and `..` components are dropped, so the key never leaves
    /// the directory it is joined onto.
    pub fn key(&self) -> PathBuf {
        self.key
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect()
    }
}

/// Create a bounded single-producer/single-consumer handoff queue.
pub fn handoff(capacity: usize) -> (UnitSender, UnitReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (UnitSender { tx }, UnitReceiver { rx })
}

/// Producer half of a handoff queue.
#[derive(Debug)]
pub struct UnitSender {
    tx: mpsc::Sender<ReadyUnit>,
}

impl UnitSender {
    /// Push a unit, waiting for capacity unless `cancel` fires first.
    pub async fn send(&self, unit: ReadyUnit, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CommonError::Cancelled),
            res = self.tx.send(unit) => res.map_err(|_| CommonError::QueueClosed),
        }
    }
}

/// Consumer half of a handoff queue.
#[derive(Debug)]
pub struct UnitReceiver {
    rx: mpsc::Receiver<ReadyUnit>,
}

impl UnitReceiver {
    /// Wait for the next unit.
    ///
    /// Returns `None` once the token fires or every sender is dropped.
    pub async fn recv(&mut self, cancel: &CancellationToken) -> Option<ReadyUnit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            unit = self.rx.recv() => unit,
        }
    }

    /// Take a unit if one is already queued.
    pub fn try_recv(&mut self) -> Option<ReadyUnit> {
        self.rx.try_recv().ok()
    }
}
