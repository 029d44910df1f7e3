//! One-way reconciliation of a replica tree with its source tree

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::comparator::{ComparisonMode, FileComparator, MetadataPolicy};
use crate::error::{IoResultExt, Result, SyncError};
use crate::filter::{FileFilter, FilterOptions};
use crate::preservation::{AttributePreserver, PreservationOptions};
use crate::report::{EventSink, NullSink, SyncAction, SyncEvent, SyncReport};

const UNSUPPORTED_KIND: &str = "unsupported entry kind (symlink, device, socket or fifo)";

/// Options for reconciliation passes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// How replica files are judged up to date
    pub mode: ComparisonMode,
    /// Combination rule used in metadata mode
    pub metadata_policy: MetadataPolicy,
    /// Attribute preservation options
    pub preservation: PreservationOptions,
    /// Paths left out of the sync on both sides
    pub filter: FilterOptions,
    /// Report actions without touching the replica
    pub dry_run: bool,
}

/// Kind of a filesystem entry, without following links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    File,
    Directory,
    /// Symlinks, devices, sockets and FIFOs
    Other,
    Missing,
}

impl ItemKind {
    pub fn of(path: &Path) -> io::Result<Self> {
        match fs::symlink_metadata(path) {
            Ok(metadata) => {
                let file_type = metadata.file_type();
                Ok(if file_type.is_file() {
                    ItemKind::File
                } else if file_type.is_dir() {
                    ItemKind::Directory
                } else {
                    ItemKind::Other
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ItemKind::Missing),
            Err(e) => Err(e),
        }
    }

    /// Kind of a root path; unlike entries inside the trees, a root given as a
    /// symlink is followed
    pub fn of_root(path: &Path) -> io::Result<Self> {
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => Ok(ItemKind::Directory),
            Ok(metadata) if metadata.is_file() => Ok(ItemKind::File),
            Ok(_) => Ok(ItemKind::Other),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ItemKind::Missing),
            Err(e) => Err(e),
        }
    }
}

/// Brings replica trees into agreement with source trees
#[derive(Debug, Clone)]
pub struct Reconciler {
    options: SyncOptions,
    comparator: FileComparator,
    preserver: AttributePreserver,
    filter: FileFilter,
}

impl Reconciler {
    /// Create a reconciler; fails only on invalid filter patterns
    pub fn new(options: SyncOptions) -> Result<Self> {
        let filter = FileFilter::new(&options.filter)?;
        Ok(Self {
            comparator: FileComparator::with_policy(options.metadata_policy),
            preserver: AttributePreserver::new(options.preservation),
            filter,
            options,
        })
    }

    /// Reconciler with default options and the given comparison mode
    pub fn with_mode(mode: ComparisonMode) -> Self {
        let options = SyncOptions {
            mode,
            ..SyncOptions::default()
        };
        Self {
            comparator: FileComparator::with_policy(options.metadata_policy),
            preserver: AttributePreserver::new(options.preservation),
            filter: FileFilter::default(),
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Run one pass and return its report
    pub fn reconcile(&self, source_root: impl AsRef<Path>, replica_root: impl AsRef<Path>) -> Result<SyncReport> {
        self.reconcile_with_sink(source_root, replica_root, &mut NullSink)
    }

    /// Run one pass, streaming every event to `sink` as it happens.
    ///
    /// Errors on the roots, permission errors and a full disk abort the pass.
    /// Entries that vanish mid-pass and other IO failures become `Fail`
    /// events; the failing directory's remaining subtree is skipped.
    pub fn reconcile_with_sink(
        &self,
        source_root: impl AsRef<Path>,
        replica_root: impl AsRef<Path>,
        sink: &mut dyn EventSink,
    ) -> Result<SyncReport> {
        let pass = Pass {
            reconciler: self,
            source_root: source_root.as_ref(),
            replica_root: replica_root.as_ref(),
            report: SyncReport::new(self.options.dry_run),
            sink,
        };
        pass.run()
    }
}

/// State of a single pass
struct Pass<'a> {
    reconciler: &'a Reconciler,
    source_root: &'a Path,
    replica_root: &'a Path,
    report: SyncReport,
    sink: &'a mut dyn EventSink,
}

impl Pass<'_> {
    fn run(mut self) -> Result<SyncReport> {
        let started = Instant::now();
        info!(
            "Reconciling '{}' from '{}' ({} mode{})",
            self.replica_root.display(),
            self.source_root.display(),
            self.reconciler.options.mode,
            if self.reconciler.options.dry_run { ", dry run" } else { "" }
        );

        match root_kind(self.source_root)? {
            ItemKind::Directory => {}
            ItemKind::Missing => {
                return Err(SyncError::SourceNotFound {
                    path: self.source_root.to_path_buf(),
                })
            }
            _ => return Err(SyncError::path_error(self.source_root, "source root is not a directory")),
        }

        match root_kind(self.replica_root)? {
            ItemKind::Missing => {
                self.prepare_replica_parent()?;
                self.create_tree(Path::new(""), "replica root does not exist")?
            }
            ItemKind::Directory => self.walk()?,
            _ => return Err(SyncError::path_error(self.replica_root, "replica root is not a directory")),
        }

        self.report.duration = started.elapsed();
        info!("{}", self.report.summary());
        Ok(self.report)
    }

    /// Create the missing ancestors of the replica root
    fn prepare_replica_parent(&self) -> Result<()> {
        if self.reconciler.options.dry_run {
            return Ok(());
        }
        match self.replica_root.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).map_err(|e| {
                SyncError::path_error(self.replica_root, format!("cannot prepare replica root: {}", e))
            }),
            _ => Ok(()),
        }
    }

    /// Depth-first walk over an explicit stack of relative directory paths
    fn walk(&mut self) -> Result<()> {
        let mut pending = vec![PathBuf::new()];

        while let Some(relative) = pending.pop() {
            match self.sync_directory(&relative) {
                Ok(children) => pending.extend(children.into_iter().rev()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Abandoning '{}': {}", relative.display(), e);
                    self.record(SyncAction::Fail, &relative, e.to_string());
                }
            }
        }

        Ok(())
    }

    /// Update one directory pair and return the subdirectories to descend into
    fn sync_directory(&mut self, relative: &Path) -> Result<Vec<PathBuf>> {
        let source_names = list_names(&self.source_root.join(relative))?;
        let mut descend = Vec::new();

        for name in &source_names {
            let entry = relative.join(name);
            if !self.reconciler.filter.should_include(&entry) {
                debug!("Filtered out '{}'", entry.display());
                continue;
            }

            let result = self.sync_entry(&entry);
            if let Some(Some(directory)) = self.absorb(&entry, result)? {
                descend.push(directory);
            }
        }

        self.prune(relative, &source_names)?;
        Ok(descend)
    }

    /// Bring one source entry across; returns the path to descend into for
    /// directories present on both sides
    fn sync_entry(&mut self, relative: &Path) -> Result<Option<PathBuf>> {
        let source = self.source_root.join(relative);
        let replica = self.replica_root.join(relative);
        let source_kind = ItemKind::of(&source).at(&source)?;
        let replica_kind = ItemKind::of(&replica).at(&replica)?;

        match (source_kind, replica_kind) {
            (ItemKind::Missing, _) => Err(SyncError::ConcurrentModification {
                path: source,
                message: "entry vanished after listing".to_string(),
            }),
            (ItemKind::Other, _) => {
                warn!("Skipping '{}': {}", source.display(), UNSUPPORTED_KIND);
                self.record(SyncAction::Ignore, relative, UNSUPPORTED_KIND);
                Ok(None)
            }
            (ItemKind::File, ItemKind::Missing) => {
                self.copy_file(relative, SyncAction::Create, "missing from replica")?;
                Ok(None)
            }
            (ItemKind::File, ItemKind::File) => {
                let mode = self.reconciler.options.mode;
                if self.reconciler.comparator.is_up_to_date(&source, &replica, mode)? {
                    trace!("'{}' is up to date", relative.display());
                } else {
                    self.copy_file(relative, SyncAction::Replace, format!("out of date ({} mode)", mode))?;
                }
                Ok(None)
            }
            (ItemKind::File, existing) => {
                self.remove(relative, existing, "replaced by a file in source")?;
                self.copy_file(relative, SyncAction::Create, "missing from replica")?;
                Ok(None)
            }
            (ItemKind::Directory, ItemKind::Missing) => {
                self.create_tree(relative, "directory missing from replica")?;
                Ok(None)
            }
            (ItemKind::Directory, ItemKind::Directory) => Ok(Some(relative.to_path_buf())),
            (ItemKind::Directory, existing) => {
                self.remove(relative, existing, "replaced by a directory in source")?;
                self.create_tree(relative, "directory missing from replica")?;
                Ok(None)
            }
        }
    }

    /// Remove replica children whose names are absent from the source
    fn prune(&mut self, relative: &Path, source_names: &BTreeSet<OsString>) -> Result<()> {
        let replica_names = list_names(&self.replica_root.join(relative))?;

        for name in replica_names.difference(source_names) {
            let entry = relative.join(name);
            if !self.reconciler.filter.should_include(&entry) {
                continue;
            }

            let replica = self.replica_root.join(&entry);
            let result = ItemKind::of(&replica)
                .at(&replica)
                .and_then(|kind| self.remove(&entry, kind, "not present in source"));
            self.absorb(&entry, result)?;
        }

        Ok(())
    }

    fn copy_file(&mut self, relative: &Path, action: SyncAction, reason: impl Into<String>) -> Result<()> {
        if !self.reconciler.options.dry_run {
            self.reconciler
                .preserver
                .copy_file(&self.source_root.join(relative), &self.replica_root.join(relative))?;
        }
        self.record(action, relative, reason);
        Ok(())
    }

    fn create_tree(&mut self, relative: &Path, reason: &str) -> Result<()> {
        let skipped = if self.reconciler.options.dry_run {
            Vec::new()
        } else {
            let filter = &self.reconciler.filter;
            self.reconciler
                .preserver
                .copy_tree(
                    &self.source_root.join(relative),
                    &self.replica_root.join(relative),
                    |inner| filter.should_include(&relative.join(inner)),
                )?
                .skipped
        };

        self.record(SyncAction::CreateTree, relative, reason);
        for path in skipped {
            self.record(SyncAction::Ignore, &relative.join(path), UNSUPPORTED_KIND);
        }
        Ok(())
    }

    fn remove(&mut self, relative: &Path, kind: ItemKind, reason: &str) -> Result<()> {
        let replica = self.replica_root.join(relative);
        let dry_run = self.reconciler.options.dry_run;

        match kind {
            // already gone, nothing to converge
            ItemKind::Missing => {}
            ItemKind::Directory => {
                if !dry_run {
                    fs::remove_dir_all(&replica).at(&replica)?;
                }
                self.record(SyncAction::DeleteTree, relative, reason);
            }
            ItemKind::File | ItemKind::Other => {
                if !dry_run {
                    fs::remove_file(&replica).at(&replica)?;
                }
                self.record(SyncAction::Delete, relative, reason);
            }
        }
        Ok(())
    }

    /// Turn a vanished entry into a `Fail` event; every other error is returned
    fn absorb<T>(&mut self, relative: &Path, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e @ SyncError::ConcurrentModification { .. }) => {
                warn!("Skipping '{}': {}", relative.display(), e);
                self.record(SyncAction::Fail, relative, e.to_string());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn record(&mut self, action: SyncAction, relative: &Path, reason: impl Into<String>) {
        let event = SyncEvent::new(action, relative, reason);
        debug!("{}", event);
        self.sink.emit(&event);
        self.report.events.push(event);
    }
}

/// Classify a root; failures other than a refused access mean the path
/// cannot serve as a root
fn root_kind(root: &Path) -> Result<ItemKind> {
    ItemKind::of_root(root).map_err(|e| match e.kind() {
        io::ErrorKind::PermissionDenied => SyncError::from_io(root, e),
        _ => SyncError::path_error(root, e.to_string()),
    })
}

/// Names of the direct children of a directory
fn list_names(dir: &Path) -> Result<BTreeSet<OsString>> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir).at(dir)? {
        names.insert(entry.at(dir)?.file_name());
    }
    Ok(names)
}
