use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use replica_sync::{ComparisonMode, FilterOptions, MetadataPolicy, SyncOptions, DEFAULT_INTERVAL};

/// Settings read from the TOML file; command-line flags override them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub replica: Option<PathBuf>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default)]
    pub mode: ComparisonMode,
    #[serde(default)]
    pub metadata_policy: MetadataPolicy,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub filter: FilterOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: None,
            replica: None,
            log_file: None,
            interval: default_interval(),
            mode: ComparisonMode::default(),
            metadata_policy: MetadataPolicy::default(),
            dry_run: false,
            log_level: default_log_level(),
            json_logs: false,
            filter: FilterOptions::default(),
        }
    }
}

impl AppConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let (source, replica) = self.roots()?;

        if self.interval.is_zero() {
            anyhow::bail!("Sync interval must be greater than zero");
        }
        // each pass would copy the replica into itself, or prune the source
        let (resolved_source, resolved_replica) = (resolve(source)?, resolve(replica)?);
        if resolved_replica.starts_with(&resolved_source) || resolved_source.starts_with(&resolved_replica) {
            anyhow::bail!(
                "Source '{}' and replica '{}' must not contain each other",
                source.display(),
                replica.display()
            );
        }
        if !matches!(
            self.log_level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            anyhow::bail!("Unknown log level: {}", self.log_level);
        }

        Ok(())
    }

    /// Source and replica roots, both of which must be set
    pub fn roots(&self) -> Result<(&Path, &Path)> {
        let source = self
            .source
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No source path given (use --source or `source` in the config file)"))?;
        let replica = self
            .replica
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No replica path given (use --replica or `replica` in the config file)"))?;
        Ok((source, replica))
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            mode: self.mode,
            metadata_policy: self.metadata_policy,
            filter: self.filter.clone(),
            dry_run: self.dry_run,
            ..SyncOptions::default()
        }
    }
}

/// Absolute form of `path` with links and `..` resolved as far as the path
/// exists; the missing tail is appended unchanged
fn resolve(path: &Path) -> Result<PathBuf> {
    let absolute = std::env::current_dir()?.join(path);
    for existing in absolute.ancestors() {
        if let Ok(canonical) = existing.canonicalize() {
            let tail = absolute.strip_prefix(existing)?;
            return Ok(canonical.join(tail));
        }
    }
    Ok(absolute)
}

fn default_interval() -> Duration { DEFAULT_INTERVAL }
fn default_log_level() -> String { "info".to_string() }
