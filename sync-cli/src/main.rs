use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error, info};

mod config;
mod logging;

use config::AppConfig;
use replica_sync::{ComparisonMode, MetadataPolicy, Reconciler, SyncScheduler};

#[derive(Parser, Debug)]
#[command(name = "replica-sync")]
#[command(about = "Keep a replica directory in one-way sync with a source directory")]
#[command(version)]
struct Cli {
    /// Source directory
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Replica directory
    #[arg(short, long)]
    replica: Option<PathBuf>,

    /// Log file, appended to (logs always go to stdout as well)
    #[arg(short, long)]
    logs: Option<PathBuf>,

    /// Seconds between the starts of consecutive passes [default: 3600]
    #[arg(short, long)]
    interval: Option<u64>,

    /// How replica files are compared with source files [default: content-hash]
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// In metadata mode, require both mtime and size to match
    #[arg(long)]
    strict_metadata: bool,

    /// Leave entries whose name starts with '.' out of the sync
    #[arg(long)]
    skip_hidden: bool,

    /// Glob of relative paths to leave out of the sync (repeatable)
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,

    /// Report what would change without touching the replica
    #[arg(long)]
    dry_run: bool,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,

    /// With --once, print the pass report as JSON on stdout
    #[arg(long, requires = "once")]
    json_report: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level [default: info]
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    ContentHash,
    Metadata,
}

impl From<Mode> for ComparisonMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::ContentHash => ComparisonMode::ContentHash,
            Mode::Metadata => ComparisonMode::Metadata,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = resolve_config(&cli).await?;
    config.validate()?;

    let _guard = logging::init(&config.log_level, config.json_logs, config.log_file.as_deref())?;

    let (source, replica) = config.roots()?;
    let reconciler = Reconciler::new(config.sync_options())?;
    let mut scheduler = SyncScheduler::new(reconciler, source, replica, config.interval);

    if cli.once {
        let clean = run_once(&scheduler, cli.json_report).await?;
        Ok(if clean { ExitCode::SUCCESS } else { ExitCode::FAILURE })
    } else {
        run_scheduled(&mut scheduler).await?;
        Ok(ExitCode::SUCCESS)
    }
}

/// Config file values with command-line flags applied on top
async fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path).await?,
        None => AppConfig::default(),
    };

    if let Some(source) = &cli.source {
        config.source = Some(source.clone());
    }
    if let Some(replica) = &cli.replica {
        config.replica = Some(replica.clone());
    }
    if let Some(logs) = &cli.logs {
        config.log_file = Some(logs.clone());
    }
    if let Some(seconds) = cli.interval {
        config.interval = Duration::from_secs(seconds);
    }
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    if cli.strict_metadata {
        config.metadata_policy = MetadataPolicy::Strict;
    }
    if cli.skip_hidden {
        config.filter.skip_hidden = true;
    }
    config.filter.exclude.extend(cli.exclude.iter().cloned());
    if cli.dry_run {
        config.dry_run = true;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if cli.json_logs {
        config.json_logs = true;
    }

    Ok(config)
}

/// Run one pass; false when some entries failed
async fn run_once(scheduler: &SyncScheduler, json_report: bool) -> Result<bool> {
    let report = scheduler.run_once().await?;

    if json_report {
        println!("{}", report.to_json()?);
    }

    if report.has_failures() {
        error!("{} entries could not be synced", report.failures().count());
        return Ok(false);
    }
    Ok(true)
}

async fn run_scheduled(scheduler: &mut SyncScheduler) -> Result<()> {
    let mut outcomes = scheduler.start()?;

    loop {
        tokio::select! {
            outcome = outcomes.recv() => match outcome {
                Some(outcome) => debug!(pass = outcome.pass, "Pass took {:?}", outcome.elapsed),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Interrupt received, stopping after the current pass");
                break;
            }
        }
    }

    scheduler.stop().await;
    Ok(())
}
