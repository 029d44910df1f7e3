//! Periodic reconciliation with explicit start and stop
//!
//! A pass runs to completion on the blocking pool; the task then sleeps for
//! whatever is left of the interval. Passes never overlap, and a pass that
//! outlasts the interval only delays the next one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::reconciler::Reconciler;
use crate::report::{SyncReport, TracingSink};

/// Interval used when none is configured
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

/// Result of one scheduled pass
#[derive(Debug)]
pub struct PassOutcome {
    /// 1-based pass counter
    pub pass: u64,
    /// Wall-clock duration of the pass
    pub elapsed: Duration,
    pub result: Result<SyncReport>,
}

#[derive(Debug)]
struct SyncJob {
    reconciler: Reconciler,
    source: PathBuf,
    replica: PathBuf,
}

impl SyncJob {
    async fn run(self: Arc<Self>) -> Result<SyncReport> {
        tokio::task::spawn_blocking(move || {
            self.reconciler
                .reconcile_with_sink(&self.source, &self.replica, &mut TracingSink)
        })
        .await
        .map_err(|e| SyncError::Scheduler(format!("pass task failed: {}", e)))?
    }
}

/// Runs reconciliation passes on a fixed interval
#[derive(Debug)]
pub struct SyncScheduler {
    job: Arc<SyncJob>,
    interval: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    pub fn new(
        reconciler: Reconciler,
        source: impl Into<PathBuf>,
        replica: impl Into<PathBuf>,
        interval: Duration,
    ) -> Self {
        Self {
            job: Arc::new(SyncJob {
                reconciler,
                source: source.into(),
                replica: replica.into(),
            }),
            interval,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Run exactly one pass, independent of the periodic task
    pub async fn run_once(&self) -> Result<SyncReport> {
        self.job.clone().run().await
    }

    /// Spawn the periodic task; the first pass starts immediately.
    ///
    /// Every finished pass is sent on the returned channel. The channel closes
    /// once the task has stopped.
    pub fn start(&mut self) -> Result<mpsc::UnboundedReceiver<PassOutcome>> {
        if self.is_running() {
            warn!("Sync scheduler is already running");
            return Err(SyncError::Scheduler("scheduler is already running".to_string()));
        }

        let (outcomes, receiver) = mpsc::unbounded_channel();
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        let job = self.job.clone();
        let cancel = self.cancel.clone();
        let interval = self.interval;
        self.task = Some(tokio::spawn(async move {
            run_periodic(job, interval, cancel, outcomes).await;
        }));

        Ok(receiver)
    }

    /// Stop the periodic task, waiting for a pass in progress to finish
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Sync scheduler task ended abnormally: {}", e);
            }
        }
    }

    /// Token that stops the periodic task when cancelled.
    ///
    /// The token stays valid across `start` until it is cancelled; a restart
    /// after a stop hands out a fresh one.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        // can't await here; the task notices the token at its next sleep
        self.cancel.cancel();
    }
}

async fn run_periodic(
    job: Arc<SyncJob>,
    interval: Duration,
    cancel: CancellationToken,
    outcomes: mpsc::UnboundedSender<PassOutcome>,
) {
    info!(
        "Starting periodic sync of '{}' from '{}' every {:?}",
        job.replica.display(),
        job.source.display(),
        interval
    );

    let mut pass = 0;
    while !cancel.is_cancelled() {
        pass += 1;
        let started = Instant::now();
        let result = job.clone().run().await;
        let elapsed = started.elapsed();

        match &result {
            Ok(report) if report.has_failures() => {
                warn!(pass, "Pass finished with {} failed entries", report.failures().count())
            }
            Ok(_) => debug!(pass, "Pass finished in {:?}", elapsed),
            Err(e) => error!(pass, "Sync pass failed: {}", e),
        }

        if outcomes.send(PassOutcome { pass, elapsed, result }).is_err() {
            debug!("Pass outcome receiver dropped");
        }

        let wait = interval.saturating_sub(elapsed);
        debug!("Next pass in {:?}", wait);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(wait) => {}
        }
    }

    info!("Periodic sync stopped after {} passes", pass);
}
