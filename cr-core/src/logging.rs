//! Tracing subscriber setup: a compact stderr console plus a daily log file.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{CrError, CrResult};

const LOG_FILE_PREFIX: &str = "chaos-route-tracking.log";

/// Keeps the background file writer alive; dropping it flushes the log.
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Install the global subscriber.
///
/// `level` accepts any `EnvFilter` directive (`info`, `cr_tracking=debug`);
/// an unparsable one falls back to `info`. With `json_output` the file gets
/// one JSON object per event. Fails if a subscriber is already installed.
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> CrResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;
    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE_PREFIX));

    let file_layer = if json_output {
        fmt::layer().with_writer(writer).json().boxed()
    } else {
        fmt::layer().with_writer(writer).with_ansi(false).boxed()
    };
    let console_layer = fmt::layer().with_writer(std::io::stderr).compact();
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(filter)
        .try_init()
        .map_err(|e| CrError::Internal(format!("logging already initialized: {e}")))?;

    tracing::debug!("logging to {} at {level}", log_dir.display());
    Ok(LogGuard { _guard: guard })
}

/// Initialize from the `[logging]` section; `level_override` (from
/// `--verbose`) wins over the configured level.
pub fn init_from_config(
    config: &LoggingConfig,
    log_dir: &Path,
    level_override: Option<&str>,
) -> CrResult<LogGuard> {
    let level = level_override.unwrap_or(&config.level);
    init_logging(level, log_dir, config.json_output)
}
