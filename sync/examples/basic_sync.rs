//! Basic example of one-off and scheduled reconciliation

use std::error::Error;
use std::fs;
use std::time::Duration;
use replica_sync::{
    reconcile, ComparisonMode, FilterOptions, Reconciler, SyncAction, SyncEvent, SyncOptions, SyncScheduler,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    println!("Replica Sync Example");
    println!("====================");

    let temp_dir = tempfile::TempDir::new()?;
    let source_dir = temp_dir.path().join("source");
    let replica_dir = temp_dir.path().join("replica");

    fs::create_dir_all(source_dir.join("subdir"))?;
    fs::write(source_dir.join("file1.txt"), b"This is file 1 content")?;
    fs::write(source_dir.join("file2.txt"), b"This is file 2 content")?;
    fs::write(source_dir.join("subdir").join("file3.txt"), b"This is file 3 content")?;
    fs::write(source_dir.join(".hidden"), b"not for the replica")?;

    println!("Source directory: {}", source_dir.display());
    println!("Replica directory: {}", replica_dir.display());
    println!();

    // Example 1: a single pass into a replica that does not exist yet
    println!("Example 1: First Pass");
    println!("---------------------");
    let report = reconcile(&source_dir, &replica_dir, ComparisonMode::ContentHash)?;
    for event in &report.events {
        println!("  {}", event);
    }
    println!("{}", report.summary());
    println!();

    // Example 2: dry run after the source changed
    println!("Example 2: Dry Run");
    println!("------------------");
    fs::write(source_dir.join("file1.txt"), b"File 1, second edition")?;
    fs::remove_file(source_dir.join("file2.txt"))?;

    let dry_run = Reconciler::new(SyncOptions {
        mode: ComparisonMode::Metadata,
        dry_run: true,
        ..SyncOptions::default()
    })?;
    let preview = dry_run.reconcile(&source_dir, &replica_dir)?;
    for (action, path) in preview.actions() {
        println!("  would {}: {}", action, path.display());
    }
    assert!(replica_dir.join("file2.txt").exists());
    println!();

    // Example 3: filtered pass, streaming events to a channel
    println!("Example 3: Filtered Pass");
    println!("------------------------");
    let reconciler = Reconciler::new(SyncOptions {
        filter: FilterOptions {
            skip_hidden: true,
            exclude: vec!["**/*.tmp".to_string()],
        },
        ..SyncOptions::default()
    })?;
    let (mut events, mut received) = tokio::sync::mpsc::unbounded_channel::<SyncEvent>();
    let report = reconciler.reconcile_with_sink(&source_dir, &replica_dir, &mut events)?;
    drop(events);
    while let Some(event) = received.recv().await {
        println!("  streamed: {}", event);
    }
    assert_eq!(report.count(SyncAction::Delete), 1);
    assert!(replica_dir.join(".hidden").exists());
    println!();

    // Example 4: the periodic scheduler
    println!("Example 4: Scheduled Passes");
    println!("---------------------------");
    let mut scheduler = SyncScheduler::new(reconciler, &source_dir, &replica_dir, Duration::from_millis(200));
    let mut outcomes = scheduler.start()?;
    for _ in 0..3 {
        if let Some(outcome) = outcomes.recv().await {
            match outcome.result {
                Ok(report) => println!("  pass {}: {} changes", outcome.pass, report.mutations()),
                Err(e) => println!("  pass {} failed: {}", outcome.pass, e),
            }
        }
    }
    scheduler.stop().await;

    println!();
    println!("All examples completed successfully!");

    Ok(())
}
