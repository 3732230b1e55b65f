//! End-to-end scenarios for the stability detector and flat grouper.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dropship_common::{BatchMode, handoff};
use dropship_watcher::{FlatGrouper, StabilityDetector, WatchConfig, scan};
use pretty_assertions::assert_eq;
use regex::Regex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const D: Duration = Duration::from_secs(10);

fn write_aged(root: &Path, rel: &str, now: SystemTime, age: Duration) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, rel.as_bytes()).unwrap();
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(now - age)
        .unwrap();
}

#[test]
fn test_top_level_unit_becomes_ready_exactly_once() {
    let temp = TempDir::new().unwrap();
    let now = SystemTime::now();
    write_aged(temp.path(), "a/x.txt", now, D / 2);
    write_aged(temp.path(), "a/y.txt", now, D + D / 2);

    let config = WatchConfig::new(temp.path(), D).with_mode(BatchMode::TopLevelGroup);

    // x.txt is too young.
    let table = scan(&config, now).unwrap();
    assert_eq!(table.get("a"), Some(false));

    // One cycle later x.txt has settled and y.txt has aged out.
    let table = scan(&config, now + D).unwrap();
    assert_eq!(table.ready_keys().collect::<Vec<_>>(), vec!["a"]);

    // And a further cycle does not re-emit it.
    let table = scan(&config, now + D * 2).unwrap();
    assert!(table.is_empty());
}

#[test]
fn test_young_sibling_blocks_readiness() {
    let temp = TempDir::new().unwrap();
    let now = SystemTime::now();
    write_aged(temp.path(), "job/old.dat", now, D + Duration::from_secs(9));
    write_aged(temp.path(), "job/new.dat", now, D);

    let config = WatchConfig::new(temp.path(), D).with_mode(BatchMode::ZipPerUnit);
    assert_eq!(scan(&config, now).unwrap().get("job"), Some(false));
}

#[tokio::test]
async fn test_flat_mode_groups_by_numeric_prefix() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let now = SystemTime::now();
    for name in ["12_report.csv", "12_summary.csv", "unmatched.bin"] {
        write_aged(&source, name, now, D + Duration::from_secs(1));
    }

    let incoming = temp.path().join("flat/incoming");
    let sealed = temp.path().join("flat/sealed");
    fs::create_dir_all(&incoming).unwrap();
    let grouper = FlatGrouper::new(&incoming, &sealed, Some(Regex::new(r"^(\d+)_").unwrap()));

    let config = Arc::new(
        WatchConfig::new(&source, D)
            .with_mode(BatchMode::FlatArchive)
            .with_naming_pattern(r"^(\d+)_")
            .unwrap(),
    );
    let (tx, mut rx) = handoff(16);
    let mut detector = StabilityDetector::new(config, tx).with_grouper(grouper);

    let report = detector
        .run_cycle(now, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.ready.len(), 3);

    let mut emitted = Vec::new();
    while let Some(unit) = rx.try_recv() {
        emitted.push(unit.path);
    }
    assert_eq!(
        emitted,
        vec![sealed.join("12.tar"), sealed.join("unmatched.bin_archive.tar")]
    );

    let mut archive = tar::Archive::new(File::open(sealed.join("12.tar")).unwrap());
    let mut names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".csv"))
        .collect();
    names.sort();
    assert_eq!(names, vec!["12/12_report.csv", "12/12_summary.csv"]);

    // Nothing new settles on the next cycle, so nothing is sealed again.
    let report = detector
        .run_cycle(now + D, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.emitted.is_empty());
}
