//! File comparison deciding whether a replica file is up to date

use std::fs;
use std::path::Path;
use filetime::FileTime;
use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};

/// Strategy used to decide whether a replica file needs a fresh copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonMode {
    /// Compare BLAKE3 digests of the full file contents
    #[default]
    ContentHash,
    /// Compare modification time and size
    Metadata,
}

impl std::fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComparisonMode::ContentHash => write!(f, "content-hash"),
            ComparisonMode::Metadata => write!(f, "metadata"),
        }
    }
}

/// How metadata evidence is combined in [`ComparisonMode::Metadata`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataPolicy {
    /// Up to date when the mtime OR the size matches.
    ///
    /// A file rewritten with the same length keeps being treated as unchanged.
    #[default]
    Lenient,
    /// Up to date only when both mtime and size match
    Strict,
}

/// Decides whether replica files are in sync with their source
#[derive(Debug, Clone, Default)]
pub struct FileComparator {
    metadata_policy: MetadataPolicy,
}

impl FileComparator {
    /// Create a comparator using the lenient metadata policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a comparator with an explicit metadata policy
    pub fn with_policy(metadata_policy: MetadataPolicy) -> Self {
        Self { metadata_policy }
    }

    pub fn metadata_policy(&self) -> MetadataPolicy {
        self.metadata_policy
    }

    /// Check whether `replica` already matches `source`.
    ///
    /// Both paths must name existing regular files. Nothing is written; a
    /// failure to stat or read either side is returned as an error.
    pub fn is_up_to_date(&self, source: &Path, replica: &Path, mode: ComparisonMode) -> Result<bool> {
        match mode {
            ComparisonMode::Metadata => self.compare_metadata(source, replica),
            ComparisonMode::ContentHash => self.compare_content(source, replica),
        }
    }

    fn compare_metadata(&self, source: &Path, replica: &Path) -> Result<bool> {
        let source_metadata = fs::metadata(source).at(source)?;
        let replica_metadata = fs::metadata(replica).at(replica)?;

        let same_mtime = FileTime::from_last_modification_time(&source_metadata)
            == FileTime::from_last_modification_time(&replica_metadata);
        let same_size = source_metadata.len() == replica_metadata.len();

        Ok(match self.metadata_policy {
            MetadataPolicy::Lenient => same_mtime || same_size,
            MetadataPolicy::Strict => same_mtime && same_size,
        })
    }

    fn compare_content(&self, source: &Path, replica: &Path) -> Result<bool> {
        // Whole files are hashed even when their sizes already differ.
        let source_hash = content_hash(source)?;
        let replica_hash = content_hash(replica)?;
        Ok(source_hash == replica_hash)
    }
}

/// Digest of a file read entirely into memory
pub fn content_hash(path: &Path) -> Result<blake3::Hash> {
    let data = fs::read(path).at(path)?;
    Ok(blake3::hash(&data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use rstest::rstest;
    use tempfile::TempDir;

    fn write_pair(dir: &TempDir, source: &[u8], replica: &[u8]) -> (std::path::PathBuf, std::path::PathBuf) {
        let source_path = dir.path().join("source.txt");
        let replica_path = dir.path().join("replica.txt");
        fs::write(&source_path, source).unwrap();
        fs::write(&replica_path, replica).unwrap();
        (source_path, replica_path)
    }

    fn set_mtime(path: &Path, secs: i64) {
        filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    #[test]
    fn test_hash_comparison() {
        let temp_dir = TempDir::new().unwrap();
        let (source, replica) = write_pair(&temp_dir, b"hello world", b"hello world");

        let comparator = FileComparator::new();
        assert_eq!(comparator.metadata_policy(), MetadataPolicy::Lenient);
        assert!(comparator.is_up_to_date(&source, &replica, ComparisonMode::ContentHash).unwrap());

        fs::write(&replica, b"hello rust!").unwrap();
        assert!(!comparator.is_up_to_date(&source, &replica, ComparisonMode::ContentHash).unwrap());
    }

    #[test]
    fn test_hash_ignores_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let (source, replica) = write_pair(&temp_dir, b"same", b"same");
        set_mtime(&source, 1_000);
        set_mtime(&replica, 2_000);

        let comparator = FileComparator::new();
        assert!(comparator.is_up_to_date(&source, &replica, ComparisonMode::ContentHash).unwrap());
    }

    #[rstest]
    // same mtime, same size
    #[case(b"abc".as_slice(), b"xyz".as_slice(), 10, 10, MetadataPolicy::Lenient, true)]
    #[case(b"abc".as_slice(), b"xyz".as_slice(), 10, 10, MetadataPolicy::Strict, true)]
    // different mtime, same size
    #[case(b"abc".as_slice(), b"xyz".as_slice(), 10, 20, MetadataPolicy::Lenient, true)]
    #[case(b"abc".as_slice(), b"xyz".as_slice(), 10, 20, MetadataPolicy::Strict, false)]
    // same mtime, different size
    #[case(b"abc".as_slice(), b"wxyz".as_slice(), 10, 10, MetadataPolicy::Lenient, true)]
    #[case(b"abc".as_slice(), b"wxyz".as_slice(), 10, 10, MetadataPolicy::Strict, false)]
    // nothing matches
    #[case(b"abc".as_slice(), b"wxyz".as_slice(), 10, 20, MetadataPolicy::Lenient, false)]
    #[case(b"abc".as_slice(), b"wxyz".as_slice(), 10, 20, MetadataPolicy::Strict, false)]
    fn test_metadata_policies(
        #[case] source_content: &[u8],
        #[case] replica_content: &[u8],
        #[case] source_mtime: i64,
        #[case] replica_mtime: i64,
        #[case] policy: MetadataPolicy,
        #[case] expected: bool,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let (source, replica) = write_pair(&temp_dir, source_content, replica_content);
        set_mtime(&source, source_mtime);
        set_mtime(&replica, replica_mtime);

        let comparator = FileComparator::with_policy(policy);
        assert_eq!(comparator.metadata_policy(), policy);
        let result = comparator.is_up_to_date(&source, &replica, ComparisonMode::Metadata).unwrap();
        assert_eq!(result, expected);
    }

    #[rstest]
    #[case(ComparisonMode::ContentHash)]
    #[case(ComparisonMode::Metadata)]
    fn test_missing_replica_propagates(#[case] mode: ComparisonMode) {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source.txt");
        fs::write(&source, b"data").unwrap();
        let replica = temp_dir.path().join("gone.txt");

        let err = FileComparator::new().is_up_to_date(&source, &replica, mode).unwrap_err();
        assert!(matches!(err, SyncError::ConcurrentModification { .. }));
    }

    #[test]
    fn test_comparison_never_writes() {
        let temp_dir = TempDir::new().unwrap();
        let (source, replica) = write_pair(&temp_dir, b"one", b"two");
        set_mtime(&replica, 42);

        FileComparator::new().is_up_to_date(&source, &replica, ComparisonMode::ContentHash).unwrap();
        FileComparator::new().is_up_to_date(&source, &replica, ComparisonMode::Metadata).unwrap();

        assert_eq!(fs::read(&replica).unwrap(), b"two");
        let metadata = fs::metadata(&replica).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&metadata), FileTime::from_unix_time(42, 0));
    }
}
