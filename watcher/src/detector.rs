//! The stability detector loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use dropship_common::{ReadyUnit, UnitSender};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::config::WatchConfig;
use crate::error::{Result, WatcherError};
use crate::grouper::FlatGrouper;
use crate::readiness::{ReadinessTable, scan};

/// Outcome of one detector cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Keys observed this cycle.
    pub observed: usize,

    /// Keys found ready, in walk order.
    pub ready: Vec<String>,

    /// Units pushed to the handoff queue.
    pub emitted: Vec<PathBuf>,
}

/// Periodically scans the watched tree and emits settled units.
pub struct StabilityDetector {
    config: Arc<WatchConfig>,
    units: UnitSender,
    grouper: Option<FlatGrouper>,
    span: Span,
}

impl StabilityDetector {
    /// Create a detector pushing units into `units`.
    pub fn new(config: Arc<WatchConfig>, units: UnitSender) -> Self {
        Self {
            config,
            units,
            grouper: None,
            span: info_span!("detector"),
        }
    }

    /// Attach the grouper used in flat-archive mode.
    pub fn with_grouper(mut self, grouper: FlatGrouper) -> Self {
        self.grouper = Some(grouper);
        self
    }

    /// Run the loop inside `span` instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Run until `cancel` fires. One cycle per settle duration.
    pub async fn run(mut self, cancel: CancellationToken) {
        let span = self.span.clone();
        async move {
            info!(
                "Started watch process on {} (settle {:?}, mode {})",
                self.config.source().display(),
                self.config.settle,
                self.config.mode
            );

            if let Err(e) = self.resume_sealed(&cancel).await {
                if !e.is_cancelled() {
                    error!("Failed to resume sealed archives: {e}");
                }
            }

            while !cancel.is_cancelled() {
                let started = Instant::now();
                match self.run_cycle(SystemTime::now(), &cancel).await {
                    Ok(report) => debug!(
                        "Cycle done: {} keys observed, {} ready, {} emitted",
                        report.observed,
                        report.ready.len(),
                        report.emitted.len()
                    ),
                    Err(e) if e.is_cancelled() => break,
                    Err(e) => error!("Watch cycle failed: {e}"),
                }

                let pause = self.config.settle.saturating_sub(started.elapsed());
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }

            info!("Stopped watch process");
        }
        .instrument(span)
        .await
    }

    /// Run a single cycle as of `now`.
    pub async fn run_cycle(
        &mut self,
        now: SystemTime,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let table = self.scan(now).await?;
        let mut report = CycleReport {
            observed: table.len(),
            ..Default::default()
        };

        let flat = self.config.mode.is_flat();
        let mut settled = Vec::new();

        for key in table.ready_keys() {
            if cancel.is_cancelled() {
                return Ok(report);
            }
            report.ready.push(key.to_string());
            info!("Folder/File ready to send: {key}");

            let path = self.config.source().join(key);
            if flat {
                settled.push(path);
            } else {
                self.units.send(ReadyUnit::with_key(&path, key), cancel).await?;
                report.emitted.push(path);
            }
        }

        if flat {
            for archive in self.seal_groups(settled).await? {
                self.units.send(ReadyUnit::new(&archive), cancel).await?;
                report.emitted.push(archive);
            }
        }

        Ok(report)
    }

    async fn scan(&self, now: SystemTime) -> Result<ReadinessTable> {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || scan(&config, now))
            .await
            .map_err(|e| WatcherError::Task(e.to_string()))?
    }

    /// Stage settled files into the grouper and seal its groups, off the
    /// async workers.
    async fn seal_groups(&mut self, settled: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
        let Some(mut grouper) = self.grouper.take() else {
            warn!("Flat-archive mode without a grouper, nothing to seal");
            return Ok(Vec::new());
        };

        let joined = tokio::task::spawn_blocking(move || {
            let sealed = stage_and_seal(&mut grouper, &settled);
            (grouper, sealed)
        })
        .await;

        match joined {
            Ok((grouper, sealed)) => {
                self.grouper = Some(grouper);
                sealed
            }
            Err(e) => Err(WatcherError::Task(e.to_string())),
        }
    }

    async fn resume_sealed(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(grouper) = self.grouper.as_ref() else {
            return Ok(());
        };
        for archive in grouper.pending_sealed()? {
            info!("Re-emitting sealed archive {}", archive.display());
            self.units.send(ReadyUnit::new(&archive), cancel).await?;
        }
        Ok(())
    }
}

fn stage_and_seal(grouper: &mut FlatGrouper, settled: &[PathBuf]) -> Result<Vec<PathBuf>> {
    for path in settled {
        if let Err(e) = grouper.stage(path) {
            warn!("Failed to stage {} for grouping: {e}", path.display());
        }
    }
    let groups = grouper.collect()?;
    if groups.is_empty() {
        return Ok(Vec::new());
    }
    debug!("Collected {} flat groups", groups.len());
    grouper.process()
}
