//! `dropship`: watch a directory and ship settled files to a remote
//! destination.
//!
//! Usage:
//!     dropship --source /data/outbox --settle-secs 30 --transport webdav \
//!         --url https://dav.example.com/inbox --user ingest

mod config;
mod layout;
mod logging;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dropship_common::{BatchMode, handoff};
use dropship_delivery::{DeliveryOrchestrator, HookRunner, PrepareStage};
use dropship_transport::{AnyTransport, DestinationProfile, Transport, TransportKind};
use dropship_watcher::{FlatGrouper, StabilityDetector};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span};

use crate::config::{Cli, Endpoint, RawConfig, Settings};
use crate::layout::WorkLayout;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let raw = RawConfig::load(Cli::parse())?;
    let _log_guard = logging::init(raw.log_level(), raw.log_dir.as_deref())?;

    if let Err(e) = run(raw).await {
        error!("dropship failed: {e:#}");
        return Err(e);
    }
    Ok(())
}

async fn run(raw: RawConfig) -> anyhow::Result<()> {
    let settings = Settings::resolve(raw).context("invalid configuration")?;
    let layout = WorkLayout::create(&settings.work_dir)?;
    let watch = Arc::new(settings.watch);
    let mode = watch.mode;

    info!(
        "Starting dropship: {} -> {} ({}, mode {mode}, settle {:?})",
        watch.source().display(),
        settings.primary.url,
        settings.transport,
        watch.settle
    );

    let primary = delivery(
        "primary",
        settings.transport,
        &settings.primary,
        &layout.primary,
        mode,
        watch.settle,
    )?;
    let converted = settings
        .converted
        .as_ref()
        .map(|endpoint| {
            delivery(
                "converted",
                settings.transport,
                endpoint,
                &layout.converted,
                mode,
                watch.settle,
            )
        })
        .transpose()?;

    let cancel = CancellationToken::new();
    let (units_tx, units_rx) = handoff(settings.queue_capacity);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let mut detector = StabilityDetector::new(Arc::clone(&watch), units_tx);
    if mode.is_flat() {
        detector = detector.with_grouper(FlatGrouper::new(
            &layout.flat_incoming,
            &layout.flat_sealed,
            watch.naming_pattern.clone(),
        ));
    }
    tasks.push(tokio::spawn(detector.run(cancel.clone())));

    let hooks = HookRunner::new(settings.hooks_dir, &layout.converted);
    let prepare = PrepareStage::new(mode, &layout.pre_send, &layout.primary, hooks, units_rx);
    tasks.push(tokio::spawn(prepare.run(cancel.clone())));

    tasks.push(tokio::spawn(primary.run(cancel.clone())));
    if let Some(converted) = converted {
        tasks.push(tokio::spawn(converted.run(cancel.clone())));
    }

    shutdown_signal().await;
    info!("Shutdown requested, waiting for tasks to stop");
    cancel.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            error!("Task ended abnormally: {e}");
        }
    }

    info!("dropship stopped");
    Ok(())
}

fn delivery(
    name: &str,
    kind: TransportKind,
    endpoint: &Endpoint,
    staging: &Path,
    mode: BatchMode,
    period: Duration,
) -> anyhow::Result<DeliveryOrchestrator<AnyTransport>> {
    let profile = DestinationProfile::new(
        name,
        endpoint.url.clone(),
        endpoint.credentials.clone(),
        staging,
    );
    let transport = AnyTransport::new(kind, &profile)
        .with_context(|| format!("failed to set up {name} transport"))?;
    info!("Using {} for {name} destination", transport.name());

    Ok(DeliveryOrchestrator::new(profile, transport, period)
        .with_packaging(mode.delivery_archive())
        .with_span(info_span!("delivery", destination = name)))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
