//! The prepare stage: ready unit in, staged unit out.

use std::path::{Path, PathBuf};

use dropship_common::{
    BatchMode, ReadyUnit, UnitReceiver, copy_path, move_path, remove_path, unique_path,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::error::{DeliveryError, Result};
use crate::hooks::HookRunner;
use crate::task::blocking;

/// What happened to one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// The unit was staged and handed to delivery at this path.
    Handed(PathBuf),

    /// The unit's path no longer existed.
    Vanished,

    /// A hook removed the staged copy, nothing left to deliver.
    Consumed,
}

/// Consumes ready units, stages them, runs hooks and hands them to the
/// primary orchestrator's staging directory.
pub struct PrepareStage {
    mode: BatchMode,
    pre_send_dir: PathBuf,
    outgoing_dir: PathBuf,
    hooks: HookRunner,
    units: UnitReceiver,
    span: Span,
}

impl PrepareStage {
    /// Create a stage staging through `pre_send_dir` into `outgoing_dir`.
    pub fn new(
        mode: BatchMode,
        pre_send_dir: impl Into<PathBuf>,
        outgoing_dir: impl Into<PathBuf>,
        hooks: HookRunner,
        units: UnitReceiver,
    ) -> Self {
        Self {
            mode,
            pre_send_dir: pre_send_dir.into(),
            outgoing_dir: outgoing_dir.into(),
            hooks,
            units,
            span: info_span!("prepare"),
        }
    }

    /// Run the stage inside `span` instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Run until `cancel` fires or the queue closes.
    pub async fn run(mut self, cancel: CancellationToken) {
        let span = self.span.clone();
        async move {
            info!(
                "Started prepare process into {}",
                self.outgoing_dir.display()
            );

            while let Some(unit) = self.units.recv(&cancel).await {
                match self.prepare(&unit).await {
                    Ok(PrepareOutcome::Handed(path)) => {
                        info!("Unit {} handed to delivery", path.display());
                    }
                    Ok(PrepareOutcome::Vanished) => {
                        warn!("Unit {} vanished before staging", unit.path().display());
                    }
                    Ok(PrepareOutcome::Consumed) => {
                        warn!("Hooks consumed {}, nothing to deliver", unit.path().display());
                    }
                    Err(e) => error!("Failed to prepare {}: {e}", unit.path().display()),
                }
            }

            info!("Stopped prepare process");
        }
        .instrument(span)
        .await
    }

    /// Stage, hook and hand off one unit.
    ///
    /// The unit is staged and handed off under its relative key. An entry
    /// still waiting in the outgoing directory is never replaced: the new
    /// unit gets the next free `<stem>-N` name instead.
    pub async fn prepare(&self, unit: &ReadyUnit) -> Result<PrepareOutcome> {
        let source = unit.path().to_path_buf();
        if !source.exists() {
            return Ok(PrepareOutcome::Vanished);
        }
        let key = unit.key();
        let name = key
            .file_name()
            .ok_or_else(|| DeliveryError::NoFileName(source.clone()))?
            .to_string_lossy()
            .into_owned();

        let staged = self.pre_send_dir.join(&key);
        debug!("Staging {} into {}", source.display(), staged.display());
        blocking({
            let (source, staged) = (source.clone(), staged.clone());
            move || copy_path(&source, &staged).map_err(DeliveryError::from)
        })
        .await?;

        if self.mode.is_flat() {
            let original = source.clone();
            let removed = blocking(move || remove_path(&original).map_err(DeliveryError::from));
            if let Err(e) = removed.await {
                warn!("Failed to remove {} after staging: {e}", source.display());
            }
        }

        self.hooks.run(&staged).await?;

        if !staged.exists() {
            return Ok(PrepareOutcome::Consumed);
        }

        let target_dir = match key.parent() {
            Some(parent) => self.outgoing_dir.join(parent),
            None => self.outgoing_dir.clone(),
        };
        let pre_send = self.pre_send_dir.clone();
        let handed = blocking(move || {
            let handed = unique_path(&target_dir, &name);
            move_path(&staged, &handed)?;
            prune_empty_parents(&staged, &pre_send);
            Ok(handed)
        })
        .await?;

        Ok(PrepareOutcome::Handed(handed))
    }
}

/// Remove the now-empty directories between `path` and `root`.
fn prune_empty_parents(path: &Path, root: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) || std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
