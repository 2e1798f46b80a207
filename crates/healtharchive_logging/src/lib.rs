//! Shared logging utilities for HealthArchive binaries.
//!
//! Process logs (worker, watchdogs, CLI) rotate daily under `<home>/logs`
//! via `tracing-appender`; a stderr layer carries warnings (everything,
//! with `verbose`). Per-job combined crawl logs are written next to the
//! job's output directory by the crawler driver and are not managed here.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "healtharchive=info,healtharchive_store=info,healtharchive_crawler=info,\
     healtharchive_indexer=info,healtharchive_worker=info,healtharchive_watchdog=info";

/// Logging configuration shared by HealthArchive binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Keeps the non-blocking file writer flushing. Hold it for the life of
/// the process; dropping it flushes and stops the writer thread.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize tracing: a daily-rotated file layer plus a stderr layer.
///
/// A logs directory that cannot be created downgrades to stderr-only
/// rather than refusing to start.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogGuard> {
    let filter_spec =
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());

    let mut file_guard = None;
    let file_layer = match ensure_logs_dir() {
        Ok(log_dir) => {
            let appender =
                tracing_appender::rolling::daily(log_dir, format!("{}.log", config.app_name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(EnvFilter::new(&filter_spec)),
            )
        }
        Err(e) => {
            eprintln!("warning: file logging disabled: {e:#}");
            None
        }
    };

    let console_filter = if config.verbose {
        EnvFilter::new(&filter_spec)
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

/// State directory: `$HEALTHARCHIVE_HOME` or `~/.healtharchive`.
pub fn healtharchive_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("HEALTHARCHIVE_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".healtharchive")
}

/// Process log directory: `<home>/logs`.
pub fn logs_dir() -> PathBuf {
    healtharchive_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    std::fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}
