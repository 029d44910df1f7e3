//! Exercises the crate through its public API only

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use replica_sync::{
    is_up_to_date, reconcile, ComparisonMode, Reconciler, SyncAction, SyncError, SyncOptions, SyncReport,
    SyncScheduler,
};
use tempfile::TempDir;
use tokio::time::timeout;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn test_replica_follows_source_across_passes() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source");
    let replica = temp.path().join("replica");
    write(&source, "docs/readme.md", "hello");
    write(&source, "docs/old.md", "old");

    let first = reconcile(&source, &replica, ComparisonMode::ContentHash).unwrap();
    assert_eq!(first.count(SyncAction::CreateTree), 1);
    assert!(is_up_to_date(source.join("docs/readme.md"), replica.join("docs/readme.md"), ComparisonMode::ContentHash).unwrap());

    write(&source, "docs/readme.md", "hello, world");
    fs::remove_file(source.join("docs/old.md")).unwrap();
    let second = reconcile(&source, &replica, ComparisonMode::ContentHash).unwrap();

    let mut actions = second.actions();
    actions.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(
        actions,
        vec![
            (SyncAction::Delete, PathBuf::from("docs/old.md")),
            (SyncAction::Replace, PathBuf::from("docs/readme.md")),
        ]
    );
    assert_eq!(fs::read_to_string(replica.join("docs/readme.md")).unwrap(), "hello, world");
    assert!(reconcile(&source, &replica, ComparisonMode::ContentHash).unwrap().is_noop());
}

#[test]
fn test_report_round_trips_through_json() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source");
    write(&source, "a.txt", "a");
    fs::create_dir(temp.path().join("replica")).unwrap();

    let report = Reconciler::new(SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    })
    .unwrap()
    .reconcile(&source, temp.path().join("replica"))
    .unwrap();

    let parsed: SyncReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert!(parsed.dry_run);
    assert_eq!(parsed.pass_id, report.pass_id);
    assert_eq!(parsed.actions(), vec![(SyncAction::Create, PathBuf::from("a.txt"))]);
}

#[test]
fn test_missing_source_is_an_error() {
    let temp = TempDir::new().unwrap();
    let err = reconcile(temp.path().join("nope"), temp.path().join("replica"), ComparisonMode::Metadata).unwrap_err();
    assert!(matches!(err, SyncError::SourceNotFound { .. }));
    assert!(!temp.path().join("replica").exists());
}

#[tokio::test]
async fn test_scheduler_picks_up_changes_between_passes() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source");
    let replica = temp.path().join("replica");
    write(&source, "a.txt", "a");

    let mut scheduler = SyncScheduler::new(
        Reconciler::with_mode(ComparisonMode::Metadata),
        &source,
        &replica,
        Duration::from_millis(50),
    );
    let mut outcomes = scheduler.start().unwrap();

    let first = timeout(Duration::from_secs(5), outcomes.recv()).await.unwrap().unwrap();
    assert_eq!(first.pass, 1);
    assert!(replica.join("a.txt").exists());

    write(&source, "b.txt", "b");
    let created = loop {
        let outcome = timeout(Duration::from_secs(5), outcomes.recv()).await.unwrap().unwrap();
        let report = outcome.result.unwrap();
        if !report.is_noop() {
            break report;
        }
    };
    assert_eq!(created.actions(), vec![(SyncAction::Create, PathBuf::from("b.txt"))]);

    scheduler.stop().await;
    assert!(!scheduler.is_running());
}
