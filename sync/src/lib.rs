//! Replica Sync Library
//!
//! One-way mirroring of a source directory tree into a replica tree:
//! - File comparison by content digest or by metadata
//! - Depth-first reconciliation that creates, replaces and prunes entries
//! - A structured event stream describing every action of a pass
//! - Timestamp and permission preservation on copies
//! - A cancellable periodic scheduler

pub mod comparator;
pub mod error;
pub mod filter;
pub mod preservation;
pub mod reconciler;
pub mod report;
pub mod scheduler;

// Re-export main types and functions
pub use comparator::{ComparisonMode, FileComparator, MetadataPolicy};
pub use error::{Result, SyncError};
pub use filter::{FileFilter, FilterOptions};
pub use preservation::{AttributePreserver, PreservationOptions};
pub use reconciler::{ItemKind, Reconciler, SyncOptions};
pub use report::{EventSink, NullSink, SyncAction, SyncEvent, SyncReport, TracingSink};
pub use scheduler::{PassOutcome, SyncScheduler, DEFAULT_INTERVAL};

/// Reconcile `replica_root` with `source_root` once, using default options
/// and the given comparison mode
pub fn reconcile(
    source_root: impl AsRef<std::path::Path>,
    replica_root: impl AsRef<std::path::Path>,
    mode: ComparisonMode,
) -> Result<SyncReport> {
    Reconciler::with_mode(mode).reconcile(source_root, replica_root)
}

/// Check whether one replica file is up to date with its source file
pub fn is_up_to_date(
    source: impl AsRef<std::path::Path>,
    replica: impl AsRef<std::path::Path>,
    mode: ComparisonMode,
) -> Result<bool> {
    FileComparator::new().is_up_to_date(source.as_ref(), replica.as_ref(), mode)
}
