//! Path filtering using globset
//!
//! Filtered paths are outside the sync scope on both sides: they are never
//! copied from the source and never pruned from the replica.

use std::path::Path;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// File filter options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Skip entries whose name starts with `.`
    pub skip_hidden: bool,
    /// Glob patterns matched against the path relative to the roots
    pub exclude: Vec<String>,
}

/// File filter using globset patterns
#[derive(Debug, Clone)]
pub struct FileFilter {
    exclude_set: Option<GlobSet>,
    skip_hidden: bool,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            exclude_set: None,
            skip_hidden: false,
        }
    }
}

impl FileFilter {
    /// Create a new file filter with the given options
    pub fn new(options: &FilterOptions) -> Result<Self> {
        let exclude_set = if options.exclude.is_empty() {
            None
        } else {
            Some(Self::build_globset(&options.exclude)?)
        };

        Ok(Self {
            exclude_set,
            skip_hidden: options.skip_hidden,
        })
    }

    /// Check whether a relative path takes part in the sync
    pub fn should_include(&self, relative: &Path) -> bool {
        if self.skip_hidden && Self::is_hidden(relative) {
            return false;
        }

        match &self.exclude_set {
            Some(set) => !set.is_match(relative),
            None => true,
        }
    }

    fn is_hidden(path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
    }

    /// Build a globset from patterns
    fn build_globset(patterns: &[String]) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| SyncError::FilterPattern(format!("Failed to compile glob '{}': {}", pattern, e)))?;
            builder.add(glob);
        }

        builder
            .build()
            .map_err(|e| SyncError::FilterPattern(format!("Failed to build globset: {}", e)))
    }
}
