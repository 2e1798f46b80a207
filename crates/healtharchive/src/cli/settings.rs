//! Runtime settings from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Everything the commands need from the environment, parsed once.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub archive_root: PathBuf,
    pub lock_dir: PathBuf,
    pub disk_high_watermark_pct: f64,
    pub infra_cooldown: Duration,
    pub stall_threshold: Duration,
    pub sentinel_dir: PathBuf,
    pub auto_dedupe: bool,
    pub crawler_bin: PathBuf,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let archive_root = PathBuf::from(
            std::env::var("ARCHIVE_ROOT").context("ARCHIVE_ROOT is required")?,
        );
        if !archive_root.is_absolute() {
            bail!("ARCHIVE_ROOT must be an absolute path");
        }

        let lock_dir = PathBuf::from(env_or("JOB_LOCK_DIR", "/srv/healtharchive/ops/locks/jobs"));
        let sentinel_dir = PathBuf::from(env_or("WATCHDOG_SENTINEL_DIR", "/etc/healtharchive"));
        let crawler_bin = PathBuf::from(env_or("CRAWLER_BIN", "archive-crawler"));

        let disk_high_watermark_pct = parse_env("DISK_HIGH_WATERMARK_PCT", 85.0)?;
        let infra_cooldown =
            Duration::from_secs(parse_env("INFRA_COOLDOWN_SECONDS", 60u64)?);
        let stall_threshold =
            Duration::from_secs(parse_env("STALL_THRESHOLD_MINUTES", 60u64)? * 60);
        let auto_dedupe = is_truthy(&std::env::var("AUTO_DEDUPE").unwrap_or_default());

        Ok(Self {
            database_url,
            archive_root,
            lock_dir,
            disk_high_watermark_pct,
            infra_cooldown,
            stall_threshold,
            sentinel_dir,
            auto_dedupe,
            crawler_bin,
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{name}={raw:?} is invalid: {e}")),
        Err(_) => Ok(default),
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
