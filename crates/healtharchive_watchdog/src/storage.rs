//! Storage hot-path recovery.
//!
//! Probes the filesystem paths the pipeline is about to depend on (running
//! job output dirs, the next pick's output dir, configured storage roots)
//! and repairs stale mounts. A path must look stale for N consecutive runs
//! before anything is attempted, and recovery is a bounded script run, not
//! an open-ended remount loop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use healtharchive_store::{JobFilter, Store};

use crate::action::WatchdogAction;
use crate::gate::{SentinelGate, STORAGE_SENTINEL};
use crate::metrics::{Metrics, METRICS};

pub const LOOP_NAME: &str = "storage-recovery";

/// Errnos that mark a mount as stale rather than merely empty.
const STALE_ERRNOS: &[i32] = &[libc::ENOTCONN, libc::EIO];

#[derive(Debug, Clone)]
pub struct StorageRecoveryConfig {
    /// Always-probed paths (tiered storage roots, archive root).
    pub extra_paths: Vec<PathBuf>,
    /// Consecutive stale probes required before acting.
    pub confirm_runs: u32,
    /// Recovery script invoked with the stale path as its argument.
    pub recovery_script: Option<PathBuf>,
    pub script_timeout: Duration,
}

impl Default for StorageRecoveryConfig {
    fn default() -> Self {
        Self {
            extra_paths: Vec::new(),
            confirm_runs: 3,
            recovery_script: None,
            script_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeResult {
    Readable,
    Stale,
    /// Missing or otherwise unreadable, but not a stale-mount signature.
    Other,
}

pub struct StorageRecovery {
    store: Store,
    gate: SentinelGate,
    config: StorageRecoveryConfig,
    stale_counts: HashMap<PathBuf, u32>,
}

impl StorageRecovery {
    pub fn new(store: Store, gate: SentinelGate, config: StorageRecoveryConfig) -> Self {
        Self {
            store,
            gate,
            config,
            stale_counts: HashMap::new(),
        }
    }

    pub async fn run_once(&mut self) -> Vec<WatchdogAction> {
        let mut actions = Vec::new();

        for path in self.hot_paths().await {
            Metrics::inc(&METRICS.storage_probes);
            match probe(&path) {
                ProbeResult::Readable | ProbeResult::Other => {
                    self.stale_counts.remove(&path);
                    continue;
                }
                ProbeResult::Stale => {}
            }
            Metrics::inc(&METRICS.storage_stale_detected);

            let count = self.stale_counts.entry(path.clone()).or_insert(0);
            *count += 1;
            if *count < self.config.confirm_runs {
                continue;
            }

            Metrics::inc(&METRICS.storage_recoveries_planned);
            let apply = self.gate.apply_enabled(STORAGE_SENTINEL);
            let mut applied = false;
            if apply {
                applied = true;
                Metrics::inc(&METRICS.storage_recoveries_applied);
                let recovered = self.attempt_recovery(&path).await;
                if recovered {
                    Metrics::inc(&METRICS.storage_recoveries_succeeded);
                    METRICS
                        .storage_last_apply_ok
                        .store(1, std::sync::atomic::Ordering::Relaxed);
                    self.stale_counts.remove(&path);
                    info!(path = %path.display(), "Stale mount recovered");
                } else {
                    METRICS
                        .storage_last_apply_ok
                        .store(0, std::sync::atomic::Ordering::Relaxed);
                    warn!(path = %path.display(), "Stale mount recovery did not restore reads");
                }
            }

            actions.push(WatchdogAction {
                loop_name: LOOP_NAME,
                job_id: None,
                target: Some(path.display().to_string()),
                reason: "stale_mount_confirmed".to_string(),
                applied,
            });
        }

        actions
    }

    /// The paths whose health gates forward progress right now.
    async fn hot_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.config.extra_paths.clone();

        match self.store.list_running_jobs().await {
            Ok(jobs) => paths.extend(jobs.iter().map(|j| PathBuf::from(&j.output_dir))),
            Err(e) => {
                Metrics::inc(&METRICS.store_errors);
                warn!(error = %e, "Storage recovery could not list running jobs");
            }
        }
        match self.store.pick_next_job(&JobFilter::default()).await {
            Ok(Some(job)) => paths.push(PathBuf::from(&job.output_dir)),
            Ok(None) => {}
            Err(e) => {
                Metrics::inc(&METRICS.store_errors);
                warn!(error = %e, "Storage recovery could not peek next job");
            }
        }

        paths.sort();
        paths.dedup();
        paths
    }

    /// Bounded recovery: run the documented storage script, then re-probe.
    async fn attempt_recovery(&self, path: &Path) -> bool {
        if let Some(script) = &self.config.recovery_script {
            let mut command = tokio::process::Command::new(script);
            command.arg(path);
            match tokio::time::timeout(self.config.script_timeout, command.output()).await {
                Ok(Ok(output)) if output.status.success() => {}
                Ok(Ok(output)) => {
                    warn!(
                        path = %path.display(),
                        code = ?output.status.code(),
                        "Recovery script exited nonzero"
                    );
                }
                Ok(Err(e)) => {
                    warn!(path = %path.display(), error = %e, "Recovery script failed to run");
                }
                Err(_) => {
                    warn!(path = %path.display(), "Recovery script timed out");
                }
            }
        }
        probe(path) == ProbeResult::Readable
    }
}

fn probe(path: &Path) -> ProbeResult {
    match std::fs::metadata(path) {
        Ok(_) => ProbeResult::Readable,
        Err(e) => match e.raw_os_error() {
            Some(errno) if STALE_ERRNOS.contains(&errno) => ProbeResult::Stale,
            _ => ProbeResult::Other,
        },
    }
}
