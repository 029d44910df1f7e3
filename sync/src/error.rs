//! Error types for the reconciliation library

use std::io;
use std::path::{Path, PathBuf};

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised while reconciling a replica with its source
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The source root does not exist
    #[error("Source root '{path}' does not exist")]
    SourceNotFound { path: PathBuf },

    /// A root path exists but cannot be used as a directory
    #[error("Path error at '{path}': {message}")]
    Path { path: PathBuf, message: String },

    /// Access to an entry was refused by the operating system
    #[error("Permission denied at '{path}': {source}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The replica filesystem ran out of space
    #[error("No space left while writing '{path}': {source}")]
    StorageFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An entry vanished or changed between being listed and being used
    #[error("'{path}' changed during the pass: {message}")]
    ConcurrentModification { path: PathBuf, message: String },

    /// Any other read, write or copy failure
    #[error("IO error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Filter pattern errors
    #[error("Filter pattern error: {0}")]
    FilterPattern(String),

    /// The scheduler task could not run a pass
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Classify an IO error raised while touching `path`
    pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => Self::ConcurrentModification {
                path,
                message: source.to_string(),
            },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path, source },
            io::ErrorKind::StorageFull => Self::StorageFull { path, source },
            _ => Self::Io { path, source },
        }
    }

    /// Create a new path error
    pub fn path_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Errors that abort the whole pass instead of being reported as events
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound { .. }
                | Self::Path { .. }
                | Self::PermissionDenied { .. }
                | Self::StorageFull { .. }
                | Self::FilterPattern(_)
                | Self::Scheduler(_)
                | Self::Serialization(_)
        )
    }

    /// Path the error refers to, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::SourceNotFound { path }
            | Self::Path { path, .. }
            | Self::PermissionDenied { path, .. }
            | Self::StorageFull { path, .. }
            | Self::ConcurrentModification { path, .. }
            | Self::Io { path, .. } => Some(path),
            Self::FilterPattern(_) | Self::Scheduler(_) | Self::Serialization(_) => None,
        }
    }
}

/// Attach a path to IO results, classifying the failure
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| SyncError::from_io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_concurrent_modification() {
        let err = SyncError::from_io("a.txt", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, SyncError::ConcurrentModification { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_permission_and_disk_full_are_fatal() {
        let denied = SyncError::from_io("a", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(denied, SyncError::PermissionDenied { .. }));
        assert!(denied.is_fatal());

        let full = SyncError::from_io("a", io::Error::from(io::ErrorKind::StorageFull));
        assert!(matches!(full, SyncError::StorageFull { .. }));
        assert!(full.is_fatal());
    }

    #[test]
    fn test_other_io_errors_are_recoverable() {
        let err = SyncError::from_io("dir", io::Error::other("boom"));
        assert!(matches!(err, SyncError::Io { .. }));
        assert!(!err.is_fatal());
        assert_eq!(err.path(), Some(Path::new("dir")));
    }
}
