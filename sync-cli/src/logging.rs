//! Logging setup: stdout plus an optional append-only log file

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level` when set. The returned guard flushes the file
/// writer on drop and must live until the process exits.
pub fn init(level: &str, json: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("warn,replica_sync={}", level.to_lowercase())))
        .context("Invalid log filter")?;

    let stdout_text = (!json).then(|| fmt::layer().with_target(false));
    let stdout_json = json.then(|| fmt::layer().json().with_current_span(false));

    let (file_writer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .with_context(|| format!("Log file path '{}' has no file name", path.display()))?;
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(directory)
                .with_context(|| format!("Cannot create log directory '{}'", directory.display()))?;

            let (writer, guard) = tracing_appender::non_blocking(rolling::never(directory, file_name));
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };
    let file_text = file_writer
        .clone()
        .filter(|_| !json)
        .map(|writer| fmt::layer().with_ansi(false).with_writer(writer));
    let file_json = file_writer
        .filter(|_| json)
        .map(|writer| fmt::layer().json().with_writer(writer));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_text)
        .with(stdout_json)
        .with(file_text)
        .with(file_json)
        .try_init()
        .context("Logging was already initialized")?;

    Ok(guard)
}
