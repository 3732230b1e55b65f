//! Prepare-then-deliver scenarios driven against an in-memory transport.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dropship_common::{BatchMode, ReadyUnit, handoff};
use dropship_delivery::{DeliveryOrchestrator, HookRunner, PrepareOutcome, PrepareStage};
use dropship_transport::{Credentials, DestinationProfile, SendRequest, Transport};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct RecordingTransport {
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn connect(&self) -> dropship_transport::Result<()> {
        Ok(())
    }

    async fn send_file(&self, request: &SendRequest) -> dropship_transport::Result<()> {
        assert!(request.local_path.is_file());
        self.sent.lock().unwrap().push(request.remote_path.clone());
        Ok(())
    }
}

fn profile(staging: &Path) -> DestinationProfile {
    DestinationProfile::new(
        "primary",
        "https://dav.example.com/inbox/".parse().unwrap(),
        Credentials::new("u", "p"),
        staging,
    )
}

#[tokio::test]
async fn test_unit_flows_from_source_to_remote() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("source");
    let pre_send = tmp.path().join("pre_send");
    let outgoing = tmp.path().join("outgoing");
    for dir in [&source, &pre_send, &outgoing] {
        fs::create_dir_all(dir).unwrap();
    }
    fs::create_dir_all(source.join("batch/raw")).unwrap();
    fs::write(source.join("batch/raw/1.dat"), "1").unwrap();
    fs::write(source.join("batch/notes.txt"), "n").unwrap();

    let (_tx, rx) = handoff(1);
    let stage = PrepareStage::new(
        BatchMode::TopLevelGroup,
        &pre_send,
        &outgoing,
        HookRunner::new(None, tmp.path().join("converted")),
        rx,
    );
    let outcome = stage
        .prepare(&ReadyUnit::new(source.join("batch")))
        .await
        .unwrap();
    assert_eq!(outcome, PrepareOutcome::Handed(outgoing.join("batch")));

    let transport = RecordingTransport::default();
    let mut orch =
        DeliveryOrchestrator::new(profile(&outgoing), transport.clone(), Duration::ZERO);
    let report = orch.poll_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.delivered, vec!["batch".to_string()]);
    assert_eq!(
        *transport.sent.lock().unwrap(),
        vec!["batch/notes.txt".to_string(), "batch/raw/1.dat".to_string()]
    );
    assert_eq!(fs::read_dir(&outgoing).unwrap().count(), 0);
    assert!(source.join("batch/raw/1.dat").exists());
}

#[tokio::test]
async fn test_run_delivers_until_cancelled() {
    let tmp = TempDir::new().unwrap();
    for name in ["a.txt", "b.txt"] {
        fs::write(tmp.path().join(name), name).unwrap();
    }

    let transport = RecordingTransport::default();
    let orch = DeliveryOrchestrator::new(
        profile(tmp.path()),
        transport.clone(),
        Duration::from_millis(20),
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(orch.run(cancel.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        while fs::read_dir(tmp.path()).unwrap().count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(
        *transport.sent.lock().unwrap(),
        vec!["a.txt".to_string(), "b.txt".to_string()]
    );
}
