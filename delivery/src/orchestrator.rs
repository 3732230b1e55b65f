//! Per-destination delivery orchestration.
//!
//! Each orchestrator owns one staging directory. Every poll it lists that
//! directory and delivers each entry:
//!
//! - a plain file is sent once
//! - a directory is archived first when the mode packages on send
//! - any other directory is drained: files are sent and deleted pass after
//!   pass until a pass finds nothing left
//!
//! Delivered entries are removed. A drained directory is only pruned of its
//! empty directories, so files handed in while it was drained survive until
//! the next poll. Anything that failed stays in place and is tried again on
//! the next poll. Listing and removal run on the blocking pool.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dropship_common::{ArchiveFormat, archive, remove_path};
use dropship_transport::{DestinationProfile, SendRequest, Transport};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};
use walkdir::WalkDir;

use crate::error::{DeliveryError, Result};
use crate::task::blocking;

/// Outcome of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Entries found in the staging directory.
    pub entries: usize,

    /// Entries delivered and removed, in listing order.
    pub delivered: Vec<String>,

    /// Entries that failed and were kept for the next poll.
    pub failed: Vec<String>,
}

/// Polls one staging directory and pushes its contents through a transport.
pub struct DeliveryOrchestrator<T> {
    profile: DestinationProfile,
    transport: T,
    packaging: Option<ArchiveFormat>,
    period: Duration,
    attempts: HashMap<String, u32>,
    span: Span,
}

impl<T: Transport> DeliveryOrchestrator<T> {
    /// Create an orchestrator polling every `period`.
    pub fn new(profile: DestinationProfile, transport: T, period: Duration) -> Self {
        let span = info_span!("delivery", destination = %profile.name);
        Self {
            profile,
            transport,
            packaging: None,
            period,
            attempts: HashMap::new(),
            span,
        }
    }

    /// Archive directories with `format` before sending them.
    pub fn with_packaging(mut self, packaging: Option<ArchiveFormat>) -> Self {
        self.packaging = packaging;
        self
    }

    /// Run the loop inside `span` instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The transport in use.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Failed attempts recorded for `name` since its last delivery.
    pub fn attempts(&self, name: &str) -> u32 {
        self.attempts.get(name).copied().unwrap_or(0)
    }

    /// Run until `cancel` fires. One poll per period.
    pub async fn run(mut self, cancel: CancellationToken) {
        let span = self.span.clone();
        async move {
            info!(
                "Started delivery process from {} to {} via {}",
                self.profile.staging_dir().display(),
                self.profile.url,
                self.transport.name()
            );

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.transport.connect() => Some(result),
            };
            match connected {
                Some(Ok(())) => debug!("Connected to {}", self.profile.url),
                Some(Err(e)) => warn!("Initial connect to {} failed: {e}", self.profile.url),
                None => {}
            }

            while !cancel.is_cancelled() {
                let started = Instant::now();
                match self.poll_once(&cancel).await {
                    Ok(report) if report.entries > 0 => debug!(
                        "Poll done: {} entries, {} delivered, {} failed",
                        report.entries,
                        report.delivered.len(),
                        report.failed.len()
                    ),
                    Ok(_) => {}
                    Err(e) => error!("Delivery poll failed: {e}"),
                }

                let pause = self.period.saturating_sub(started.elapsed());
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }

            info!("Stopped delivery process");
        }
        .instrument(span)
        .await
    }

    /// Run a single poll over the staging directory.
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> Result<PollReport> {
        let staging = self.profile.staging_dir().to_path_buf();
        let entries = blocking(move || list_entries(&staging)).await?;
        let mut report = PollReport {
            entries: entries.len(),
            ..Default::default()
        };
        let pacing = self.period / 2;

        for (index, entry) in entries.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if index > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pacing) => {}
                }
            }

            let name = entry_name(entry);
            match self.deliver(entry, cancel).await {
                Ok(()) => {
                    let drained = entry.is_dir() && self.packaging.is_none();
                    let target = entry.clone();
                    if let Err(e) = blocking(move || clear_delivered(&target, drained)).await {
                        error!("Delivered {name} but failed to remove it: {e}");
                    }
                    self.attempts.remove(&name);
                    info!("Delivered {name} via {}", self.transport.name());
                    report.delivered.push(name);
                }
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    let attempt = self.attempts.entry(name.clone()).or_insert(0);
                    *attempt += 1;
                    warn!("Failed to deliver {name} (attempt {attempt}): {e}");
                    report.failed.push(name);
                }
            }
        }

        Ok(report)
    }

    async fn deliver(&self, entry: &Path, cancel: &CancellationToken) -> Result<()> {
        if !entry.is_dir() {
            return self.send(entry).await;
        }
        match self.packaging {
            Some(format) => self.send_archived(entry, format).await,
            None => {
                let passes = self.drain(entry, cancel).await?;
                debug!("Drained {} in {passes} passes", entry.display());
                Ok(())
            }
        }
    }

    async fn send(&self, path: &Path) -> Result<()> {
        let request = SendRequest::relative_to(path, self.profile.staging_dir())?;
        debug!("Sending {} ({} bytes)", request.remote_path, request.size);
        self.transport.send_file(&request).await?;
        Ok(())
    }

    async fn send_archived(&self, dir: &Path, format: ArchiveFormat) -> Result<()> {
        let source = dir.to_path_buf();
        let packed =
            blocking(move || archive(&source, format).map_err(DeliveryError::from)).await?;

        let result = self.send(&packed).await;
        let temporary = packed.clone();
        let removed = blocking(move || remove_path(&temporary).map_err(DeliveryError::from));
        if let Err(e) = removed.await {
            warn!("Failed to remove temporary archive {}: {e}", packed.display());
        }
        result
    }

    /// Send and delete files until a pass finds none. Stops at the first
    /// failed send, leaving the rest for the next poll.
    async fn drain(&self, dir: &Path, cancel: &CancellationToken) -> Result<usize> {
        let mut passes = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(DeliveryError::Cancelled);
            }
            passes += 1;

            let root = dir.to_path_buf();
            let files = blocking(move || list_files(&root)).await?;
            if files.is_empty() {
                return Ok(passes);
            }

            for file in files {
                if cancel.is_cancelled() {
                    return Err(DeliveryError::Cancelled);
                }
                self.send(&file).await?;
                blocking(move || remove_path(&file).map_err(DeliveryError::from)).await?;
            }
        }
    }
}

fn list_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Remove a delivered entry. A drained directory loses only its empty
/// directories; anything that arrived meanwhile is kept.
fn clear_delivered(path: &Path, drained: bool) -> Result<()> {
    if !drained {
        return remove_path(path).map_err(DeliveryError::from);
    }
    for entry in WalkDir::new(path).contents_first(true) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            if let Err(e) = fs::remove_dir(entry.path()) {
                debug!("Kept {}: {e}", entry.path().display());
            }
        }
    }
    Ok(())
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dropship_transport::{Credentials, TransportError};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const PERIOD: Duration = Duration::from_millis(20);

    /// Records delivered files; fails chosen paths a set number of times.
    #[derive(Default)]
    struct MockTransport {
        delivered: Mutex<Vec<(String, Vec<u8>)>>,
        calls: Mutex<Vec<String>>,
        fail_times: Mutex<HashMap<String, u32>>,
        fail_always: HashSet<String>,
        arrivals: Mutex<Vec<PathBuf>>,
    }

    impl MockTransport {
        fn failing(path: &str, times: u32) -> Self {
            let mock = Self::default();
            mock.fail_times
                .lock()
                .unwrap()
                .insert(path.to_string(), times);
            mock
        }

        fn broken(path: &str) -> Self {
            Self {
                fail_always: HashSet::from([path.to_string()]),
                ..Default::default()
            }
        }

        fn delivered_paths(&self) -> Vec<String> {
            self.delivered
                .lock()
                .unwrap()
                .iter()
                .map(|(p, _)| p.clone())
                .collect()
        }

        fn calls_for(&self, path: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|p| *p == path)
                .count()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn name(&self) -> &str {
            "mock"
        }

        async fn connect(&self) -> dropship_transport::Result<()> {
            Ok(())
        }

        async fn send_file(&self, request: &SendRequest) -> dropship_transport::Result<()> {
            self.calls.lock().unwrap().push(request.remote_path.clone());

            if self.fail_always.contains(&request.remote_path) {
                return Err(TransportError::Auth("rejected".into()));
            }
            if let Some(left) = self.fail_times.lock().unwrap().get_mut(&request.remote_path) {
                if *left > 0 {
                    *left -= 1;
                    return Err(TransportError::Auth("rejected".into()));
                }
            }

            if let Some(path) = self.arrivals.lock().unwrap().pop() {
                fs::write(path, "late").unwrap();
            }

            let body = fs::read(&request.local_path)?;
            self.delivered
                .lock()
                .unwrap()
                .push((request.remote_path.clone(), body));
            Ok(())
        }
    }

    fn orchestrator(
        staging: &Path,
        transport: MockTransport,
    ) -> DeliveryOrchestrator<MockTransport> {
        let profile = DestinationProfile::new(
            "primary",
            "https://dav.example.com/inbox/".parse().unwrap(),
            Credentials::new("u", "p"),
            staging,
        );
        DeliveryOrchestrator::new(profile, transport, PERIOD)
    }

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn test_file_delivered_and_removed() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "report.csv", "a,b");

        let mut orch = orchestrator(tmp.path(), MockTransport::default());
        let report = orch.poll_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.entries, 1);
        assert_eq!(report.delivered, vec!["report.csv".to_string()]);
        assert!(report.failed.is_empty());
        assert!(!tmp.path().join("report.csv").exists());
        assert_eq!(
            *orch.transport().delivered.lock().unwrap(),
            vec![("report.csv".to_string(), b"a,b".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_file_retained_until_third_poll() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "x.txt", "x");

        let mut orch = orchestrator(tmp.path(), MockTransport::failing("x.txt", 2));
        let cancel = CancellationToken::new();

        for attempt in 1..=2 {
            let report = orch.poll_once(&cancel).await.unwrap();
            assert_eq!(report.failed, vec!["x.txt".to_string()]);
            assert!(tmp.path().join("x.txt").exists());
            assert_eq!(orch.attempts("x.txt"), attempt);
            assert!(orch.transport().delivered_paths().is_empty());
        }

        let report = orch.poll_once(&cancel).await.unwrap();
        assert_eq!(report.delivered, vec!["x.txt".to_string()]);
        assert!(!tmp.path().join("x.txt").exists());
        assert_eq!(orch.attempts("x.txt"), 0);
        assert_eq!(orch.transport().delivered_paths(), vec!["x.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_directory_drained_then_removed() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "unit/a.txt", "a");
        write(tmp.path(), "unit/sub/b.txt", "b");
        write(tmp.path(), "unit/sub/c.txt", "c");

        let mut orch = orchestrator(tmp.path(), MockTransport::default());
        let report = orch.poll_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.delivered, vec!["unit".to_string()]);
        assert!(!tmp.path().join("unit").exists());
        assert_eq!(
            orch.transport().delivered_paths(),
            vec![
                "unit/a.txt".to_string(),
                "unit/sub/b.txt".to_string(),
                "unit/sub/c.txt".to_string(),
            ]
        );
        assert_eq!(orch.transport().calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_drain_converges_within_file_count_plus_one() {
        let tmp = TempDir::new().unwrap();
        let files = ["unit/a.txt", "unit/b.txt", "unit/sub/c.txt"];
        for rel in files {
            write(tmp.path(), rel, rel);
        }

        let orch = orchestrator(tmp.path(), MockTransport::default());
        let passes = orch
            .drain(&tmp.path().join("unit"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(passes <= files.len() + 1);
        assert_eq!(passes, 2);
        assert_eq!(orch.transport().delivered_paths().len(), files.len());
    }

    #[tokio::test]
    async fn test_drain_picks_up_files_arriving_mid_pass() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "unit/a.txt", "a");
        write(tmp.path(), "unit/b.txt", "b");
        let mock = MockTransport::default();
        mock.arrivals
            .lock()
            .unwrap()
            .push(tmp.path().join("unit/late.txt"));

        let orch = orchestrator(tmp.path(), mock);
        let passes = orch
            .drain(&tmp.path().join("unit"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(passes <= 3 + 1);
        assert_eq!(passes, 3);
        assert_eq!(
            orch.transport().delivered_paths(),
            vec![
                "unit/a.txt".to_string(),
                "unit/b.txt".to_string(),
                "unit/late.txt".to_string(),
            ]
        );
    }

    #[test]
    fn test_drained_directory_keeps_late_arrivals() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "unit/sub/a.txt", "a");
        write(tmp.path(), "unit/b.txt", "b");

        clear_delivered(&tmp.path().join("unit"), true).unwrap();
        assert!(tmp.path().join("unit/b.txt").exists());
        assert!(tmp.path().join("unit/sub/a.txt").exists());

        fs::remove_file(tmp.path().join("unit/sub/a.txt")).unwrap();
        clear_delivered(&tmp.path().join("unit"), true).unwrap();
        assert!(!tmp.path().join("unit/sub").exists());
        assert!(tmp.path().join("unit/b.txt").exists());
    }

    #[tokio::test]
    async fn test_drain_stops_on_failed_send() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "unit/a.txt", "a");
        write(tmp.path(), "unit/b.txt", "b");

        let mut orch = orchestrator(tmp.path(), MockTransport::broken("unit/b.txt"));
        let report = orch.poll_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.failed, vec!["unit".to_string()]);
        assert!(!tmp.path().join("unit/a.txt").exists());
        assert!(tmp.path().join("unit/b.txt").exists());
        assert_eq!(orch.transport().calls_for("unit/b.txt"), 1);
        assert_eq!(orch.attempts("unit"), 1);
    }

    #[tokio::test]
    async fn test_archive_on_send_removes_temporary_archive() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "unit/a.txt", "a");

        let mut orch = orchestrator(tmp.path(), MockTransport::default())
            .with_packaging(Some(ArchiveFormat::Zip));
        let report = orch.poll_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.delivered, vec!["unit".to_string()]);
        assert_eq!(orch.transport().delivered_paths(), vec!["unit.zip".to_string()]);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_archive_send_keeps_directory_only() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "unit/a.txt", "a");

        let mut orch = orchestrator(tmp.path(), MockTransport::broken("unit.tar"))
            .with_packaging(Some(ArchiveFormat::Tar));
        let report = orch.poll_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.failed, vec!["unit".to_string()]);
        assert!(tmp.path().join("unit/a.txt").exists());
        assert!(!tmp.path().join("unit.tar").exists());
    }

    #[tokio::test]
    async fn test_failure_does_not_block_later_entries() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.txt", "a");
        write(tmp.path(), "b.txt", "b");

        let mut orch = orchestrator(tmp.path(), MockTransport::broken("a.txt"));
        let report = orch.poll_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.entries, 2);
        assert_eq!(report.failed, vec!["a.txt".to_string()]);
        assert_eq!(report.delivered, vec!["b.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_poll_sends_nothing() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.txt", "a");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut orch = orchestrator(tmp.path(), MockTransport::default());
        let report = orch.poll_once(&cancel).await.unwrap();

        assert_eq!(report.entries, 1);
        assert!(report.delivered.is_empty());
        assert!(tmp.path().join("a.txt").exists());
    }
}
