//! Sync events and the per-pass report

use std::path::{Path, PathBuf};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Action recorded for one path during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncAction {
    /// File copied to a path missing from the replica
    Create,
    /// Stale replica file overwritten with the source copy
    Replace,
    /// Replica file (or other non-directory entry) removed
    Delete,
    /// Whole directory subtree copied
    CreateTree,
    /// Whole replica directory subtree removed
    DeleteTree,
    /// Source entry of an unsupported kind left alone
    Ignore,
    /// Entry or subtree could not be processed
    Fail,
}

impl SyncAction {
    /// Whether the action changes the replica
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            SyncAction::Create
                | SyncAction::Replace
                | SyncAction::Delete
                | SyncAction::CreateTree
                | SyncAction::DeleteTree
        )
    }
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncAction::Create => write!(f, "Create"),
            SyncAction::Replace => write!(f, "Replace"),
            SyncAction::Delete => write!(f, "Delete"),
            SyncAction::CreateTree => write!(f, "CreateTree"),
            SyncAction::DeleteTree => write!(f, "DeleteTree"),
            SyncAction::Ignore => write!(f, "Ignore"),
            SyncAction::Fail => write!(f, "Fail"),
        }
    }
}

/// One record of the event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub action: SyncAction,
    /// Path relative to both roots; `.` is the root itself
    pub path: PathBuf,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    pub fn new(action: SyncAction, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            action,
            path: if path.as_os_str().is_empty() { PathBuf::from(".") } else { path },
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.action, self.path.display(), self.reason)
    }
}

/// Destination for events as they are produced
pub trait EventSink {
    fn emit(&mut self, event: &SyncEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &SyncEvent) {}
}

impl EventSink for Vec<SyncEvent> {
    fn emit(&mut self, event: &SyncEvent) {
        self.push(event.clone());
    }
}

/// Writes every event to the `tracing` log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: &SyncEvent) {
        match event.action {
            SyncAction::Ignore | SyncAction::Fail => warn!(
                action = %event.action,
                path = %event.path.display(),
                "{}",
                event.reason
            ),
            _ => info!(
                action = %event.action,
                path = %event.path.display(),
                "{}",
                event.reason
            ),
        }
    }
}

/// Forwards events to a tokio channel; a closed receiver drops them
impl EventSink for mpsc::UnboundedSender<SyncEvent> {
    fn emit(&mut self, event: &SyncEvent) {
        let _ = self.send(event.clone());
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub dry_run: bool,
    pub events: Vec<SyncEvent>,
}

impl SyncReport {
    pub(crate) fn new(dry_run: bool) -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            dry_run,
            events: Vec::new(),
        }
    }

    /// Number of events with the given action
    pub fn count(&self, action: SyncAction) -> usize {
        self.events.iter().filter(|e| e.action == action).count()
    }

    /// Number of events that changed (or would change, in a dry run) the replica
    pub fn mutations(&self) -> usize {
        self.events.iter().filter(|e| e.action.is_mutation()).count()
    }

    /// True when the replica was already in sync
    pub fn is_noop(&self) -> bool {
        self.mutations() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &SyncEvent> {
        self.events.iter().filter(|e| e.action == SyncAction::Fail)
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Events recorded for a relative path
    pub fn events_for(&self, path: impl AsRef<Path>) -> Vec<&SyncEvent> {
        let path = path.as_ref();
        self.events.iter().filter(|e| e.path == path).collect()
    }

    /// (action, path) pairs, handy for assertions
    pub fn actions(&self) -> Vec<(SyncAction, PathBuf)> {
        self.events.iter().map(|e| (e.action, e.path.clone())).collect()
    }

    /// Pretty-printed JSON rendering of the report
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Pass {} {}in {:.2}s: {} created, {} replaced, {} trees created, {} deleted, {} trees deleted, {} ignored, {} failed",
            self.pass_id,
            if self.dry_run { "(dry run) " } else { "" },
            self.duration.as_secs_f64(),
            self.count(SyncAction::Create),
            self.count(SyncAction::Replace),
            self.count(SyncAction::CreateTree),
            self.count(SyncAction::Delete),
            self.count(SyncAction::DeleteTree),
            self.count(SyncAction::Ignore),
            self.count(SyncAction::Fail),
        )
    }
}
