//! Whole-file and whole-tree copies that keep timestamps and permissions

use std::fs;
use std::path::{Path, PathBuf};
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{IoResultExt, Result, SyncError};

/// Options for attribute preservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreservationOptions {
    /// Preserve access and modification times
    pub preserve_mtime: bool,
    /// Preserve permission bits
    pub preserve_permissions: bool,
}

impl Default for PreservationOptions {
    fn default() -> Self {
        Self {
            preserve_mtime: true,
            preserve_permissions: true,
        }
    }
}

/// Attributes captured from a source entry
#[derive(Debug, Clone)]
pub struct FileAttributes {
    pub accessed: FileTime,
    pub modified: FileTime,
    pub permissions: fs::Permissions,
}

impl FileAttributes {
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self {
            accessed: FileTime::from_last_access_time(metadata),
            modified: FileTime::from_last_modification_time(metadata),
            permissions: metadata.permissions(),
        }
    }
}

/// Entries of a subtree that [`AttributePreserver::copy_tree`] did not copy
#[derive(Debug, Default)]
pub struct TreeCopy {
    pub files: usize,
    pub directories: usize,
    /// Paths relative to the copied root, skipped because they are neither
    /// regular files nor directories
    pub skipped: Vec<PathBuf>,
}

/// Copies files and trees, carrying attributes over
#[derive(Debug, Clone, Default)]
pub struct AttributePreserver {
    options: PreservationOptions,
}

impl AttributePreserver {
    /// Create a new attribute preserver with options
    pub fn new(options: PreservationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> PreservationOptions {
        self.options
    }

    /// Apply captured attributes to `path`
    pub fn apply_attributes(&self, path: &Path, attributes: &FileAttributes) -> Result<()> {
        if self.options.preserve_permissions {
            fs::set_permissions(path, attributes.permissions.clone()).at(path)?;
        }
        if self.options.preserve_mtime {
            filetime::set_file_times(path, attributes.accessed, attributes.modified).at(path)?;
        }
        Ok(())
    }

    /// Copy one regular file over `target`.
    ///
    /// The data lands in a hidden temporary sibling first and is renamed into
    /// place, so `target` is either the old or the new file, never a torn one.
    pub fn copy_file(&self, source: &Path, target: &Path) -> Result<()> {
        let metadata = fs::metadata(source).at(source)?;
        let temp = temp_sibling(target)?;

        let copied = fs::copy(source, &temp)
            .at(source)
            .and_then(|_| self.apply_attributes(&temp, &FileAttributes::from_metadata(&metadata)))
            .and_then(|_| fs::rename(&temp, target).at(target));

        if copied.is_err() {
            let _ = fs::remove_file(&temp);
        }
        copied
    }

    /// Copy the subtree rooted at `source` to `target`, which must not exist.
    ///
    /// `include` sees paths relative to `source`; rejected directories are not
    /// descended into. Directories get their attributes after their contents
    /// are written, deepest first, and always keep their owner-write bit.
    pub fn copy_tree<F>(&self, source: &Path, target: &Path, mut include: F) -> Result<TreeCopy>
    where
        F: FnMut(&Path) -> bool,
    {
        let mut summary = TreeCopy::default();
        let mut directories = Vec::new();

        let walker = WalkDir::new(source)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || include(e.path().strip_prefix(source).unwrap_or(e.path())));

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(source).to_path_buf();
                SyncError::from_io(path, e.into())
            })?;
            let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
            let destination = target.join(relative);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                fs::create_dir(&destination).at(&destination)?;
                let metadata = entry.metadata().map_err(|e| SyncError::from_io(entry.path(), e.into()))?;
                let mut attributes = FileAttributes::from_metadata(&metadata);
                attributes.permissions = owner_writable(attributes.permissions);
                directories.push((destination, attributes));
                summary.directories += 1;
            } else if file_type.is_file() {
                self.copy_file(entry.path(), &destination)?;
                summary.files += 1;
            } else {
                debug!("Not copying unsupported entry '{}'", entry.path().display());
                summary.skipped.push(relative.to_path_buf());
            }
        }

        for (directory, attributes) in directories.iter().rev() {
            self.apply_attributes(directory, attributes)?;
        }

        Ok(summary)
    }
}

/// Replica directories must stay writable for later passes to stage copies in them
#[cfg(unix)]
fn owner_writable(mut permissions: fs::Permissions) -> fs::Permissions {
    use std::os::unix::fs::PermissionsExt;
    permissions.set_mode(permissions.mode() | 0o200);
    permissions
}

#[cfg(not(unix))]
fn owner_writable(mut permissions: fs::Permissions) -> fs::Permissions {
    permissions.set_readonly(false);
    permissions
}

/// Unused hidden name next to `target` for staging a copy
fn temp_sibling(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .ok_or_else(|| SyncError::path_error(target, "copy target has no file name"))?;
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(name);
    temp_name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    Ok(target.with_file_name(temp_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_file_preserves_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source.txt");
        let target = temp_dir.path().join("target.txt");
        fs::write(&source, b"payload").unwrap();
        let mtime = FileTime::from_unix_time(1_600_000_000, 123_456_789);
        filetime::set_file_mtime(&source, mtime).unwrap();

        AttributePreserver::default().copy_file(&source, &target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"payload");
        let metadata = fs::metadata(&target).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&metadata), mtime);
    }

    #[test]
    fn test_copy_file_overwrites_and_leaves_no_temp() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source.txt");
        let target = temp_dir.path().join("target.txt");
        fs::write(&source, b"new").unwrap();
        fs::write(&target, b"old content").unwrap();

        AttributePreserver::default().copy_file(&source, &target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_file_replaces_read_only_target() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source.txt");
        let target = temp_dir.path().join("target.txt");
        fs::write(&source, b"fresh").unwrap();
        fs::set_permissions(&source, fs::Permissions::from_mode(0o444)).unwrap();

        let preserver = AttributePreserver::default();
        preserver.copy_file(&source, &target).unwrap();
        assert_eq!(fs::metadata(&target).unwrap().permissions().mode() & 0o777, 0o444);

        // replacing a read-only replica file must still work
        fs::set_permissions(&source, fs::Permissions::from_mode(0o644)).unwrap();
        fs::write(&source, b"fresher").unwrap();
        preserver.copy_file(&source, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"fresher");
        assert_eq!(fs::metadata(&target).unwrap().permissions().mode() & 0o777, 0o644);
    }

    #[test]
    fn test_copy_missing_source_fails_cleanly() {
        let temp_dir = TempDir::new().unwrap();
        let err = AttributePreserver::default()
            .copy_file(&temp_dir.path().join("missing"), &temp_dir.path().join("target"))
            .unwrap_err();
        assert!(matches!(err, SyncError::ConcurrentModification { .. }));
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_copy_tree() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        fs::create_dir_all(source.join("nested/deeper")).unwrap();
        fs::write(source.join("a.txt"), b"a").unwrap();
        fs::write(source.join("nested/deeper/b.txt"), b"b").unwrap();
        let dir_mtime = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(source.join("nested"), dir_mtime).unwrap();

        let target = temp_dir.path().join("target");
        let copy = AttributePreserver::default().copy_tree(&source, &target, |_| true).unwrap();

        assert_eq!(copy.files, 2);
        assert_eq!(copy.directories, 3);
        assert!(copy.skipped.is_empty());
        assert_eq!(fs::read(target.join("nested/deeper/b.txt")).unwrap(), b"b");
        let metadata = fs::metadata(target.join("nested")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&metadata), dir_mtime);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_skips_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("real.txt"), b"data").unwrap();
        std::os::unix::fs::symlink(source.join("real.txt"), source.join("link.txt")).unwrap();

        let target = temp_dir.path().join("target");
        let copy = AttributePreserver::default().copy_tree(&source, &target, |_| true).unwrap();

        assert_eq!(copy.skipped, vec![PathBuf::from("link.txt")]);
        assert!(target.join("real.txt").exists());
        assert!(fs::symlink_metadata(target.join("link.txt")).is_err());
    }

    #[test]
    fn test_copy_tree_honours_include() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        fs::create_dir_all(source.join("skip/inner")).unwrap();
        fs::write(source.join("skip/inner/x"), b"x").unwrap();
        fs::write(source.join("keep.txt"), b"k").unwrap();
        fs::write(source.join("drop.log"), b"d").unwrap();

        let target = temp_dir.path().join("target");
        let copy = AttributePreserver::default()
            .copy_tree(&source, &target, |p| p != Path::new("skip") && p.extension().map_or(true, |e| e != "log"))
            .unwrap();

        assert_eq!(copy.files, 1);
        assert_eq!(copy.directories, 1);
        assert!(target.join("keep.txt").exists());
        assert!(!target.join("skip").exists());
        assert!(!target.join("drop.log").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_source_directory_stays_writable_in_copy() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        fs::create_dir_all(source.join("locked")).unwrap();
        fs::write(source.join("locked/a.txt"), b"a").unwrap();
        fs::set_permissions(source.join("locked"), fs::Permissions::from_mode(0o555)).unwrap();

        let preserver = AttributePreserver::default();
        assert!(preserver.options().preserve_permissions);
        let target = temp_dir.path().join("target");
        preserver.copy_tree(&source, &target, |_| true).unwrap();
        fs::set_permissions(source.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();

        let mode = fs::metadata(target.join("locked")).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
        // a later pass can still stage a copy inside it
        fs::write(source.join("locked/b.txt"), b"b").unwrap();
        preserver.copy_file(&source.join("locked/b.txt"), &target.join("locked/b.txt")).unwrap();
    }
}
