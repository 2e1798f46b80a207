//! Sentinel-file gating for watchdog apply mode.
//!
//! A control action is only applied when the loop's sentinel file exists;
//! otherwise the loop runs dry and only counts planned actions. A separate
//! deploy-lock sentinel suppresses apply mode everywhere during deploys.

use std::path::{Path, PathBuf};

/// Sentinel file names inside the sentinel directory.
pub const STALL_SENTINEL: &str = "stall-detector.apply";
pub const STORAGE_SENTINEL: &str = "storage-recovery.apply";
pub const RECONCILER_SENTINEL: &str = "reconciler.apply";
pub const DEPLOY_LOCK: &str = "deploy.lock";

#[derive(Debug, Clone)]
pub struct SentinelGate {
    dir: PathBuf,
}

impl SentinelGate {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a deploy is in progress; all apply-mode actions pause.
    pub fn deploy_locked(&self) -> bool {
        self.dir.join(DEPLOY_LOCK).exists()
    }

    /// Whether the named loop may apply actions right now.
    pub fn apply_enabled(&self, sentinel_name: &str) -> bool {
        !self.deploy_locked() && self.dir.join(sentinel_name).exists()
    }
}
