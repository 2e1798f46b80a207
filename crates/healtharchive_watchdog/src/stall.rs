//! Stall detector.
//!
//! A `running` job whose crawler has stopped making progress — stale state
//! file AND a combined log that stopped growing — is put back to
//! `retryable` once its lock is gone or its holder is dead. Infra-driven,
//! so the retry budget is untouched. Recoveries are rate limited per job
//! and globally.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use healtharchive_crawler::{
    lock_path, pid_alive, read_holder_pid, read_state, StateFileError,
};
use healtharchive_store::{ArchiveJob, JobStatus, Store, StoreError, TransitionFields};

use crate::action::WatchdogAction;
use crate::gate::{SentinelGate, STALL_SENTINEL};
use crate::metrics::{Metrics, METRICS};
use crate::rate_limit::RateLimiter;

pub const LOOP_NAME: &str = "stall-detector";

#[derive(Debug, Clone)]
pub struct StallDetectorConfig {
    pub stall_threshold: Duration,
    pub lock_dir: PathBuf,
    /// Consecutive stalled observations required before acting; one stale
    /// read can be a state-file write racing the probe.
    pub confirm_runs: u32,
    pub per_job_recovery_interval: Duration,
    pub global_recoveries_per_hour: usize,
}

impl Default for StallDetectorConfig {
    fn default() -> Self {
        Self {
            stall_threshold: Duration::from_secs(60 * 60),
            lock_dir: PathBuf::from("/srv/healtharchive/ops/locks/jobs"),
            confirm_runs: 3,
            per_job_recovery_interval: Duration::from_secs(10 * 60),
            global_recoveries_per_hour: 6,
        }
    }
}

pub struct StallDetector {
    store: Store,
    gate: SentinelGate,
    config: StallDetectorConfig,
    limiter: RateLimiter,
    stalled_counts: std::collections::HashMap<i64, u32>,
}

impl StallDetector {
    pub fn new(store: Store, gate: SentinelGate, config: StallDetectorConfig) -> Self {
        let limiter = RateLimiter::new(
            config.per_job_recovery_interval,
            config.global_recoveries_per_hour,
        );
        Self {
            store,
            gate,
            config,
            limiter,
            stalled_counts: std::collections::HashMap::new(),
        }
    }

    /// One pass over the running jobs.
    pub async fn run_once(&mut self) -> Vec<WatchdogAction> {
        let mut actions = Vec::new();

        let running = match self.store.list_running_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                Metrics::inc(&METRICS.store_errors);
                warn!(error = %e, "Stall detector could not list running jobs");
                return actions;
            }
        };

        for job in running {
            Metrics::inc(&METRICS.stall_checks);
            if !self.is_stalled(&job) {
                self.stalled_counts.remove(&job.id);
                continue;
            }
            Metrics::inc(&METRICS.stalls_detected);

            let seen = self.stalled_counts.entry(job.id).or_insert(0);
            *seen += 1;
            if *seen < self.config.confirm_runs {
                continue;
            }

            // A live lock holder means the worker still owns the job; the
            // reconciler direction covers that world.
            let lock = lock_path(&self.config.lock_dir, job.id);
            if lock.exists() {
                let holder_alive = read_holder_pid(&lock).map(pid_alive).unwrap_or(false);
                if holder_alive {
                    continue;
                }
            }

            if !self.limiter.allow(job.id) {
                Metrics::inc(&METRICS.stall_rate_limited);
                actions.push(WatchdogAction {
                    loop_name: LOOP_NAME,
                    job_id: Some(job.id),
                    target: None,
                    reason: "stalled_rate_limited".to_string(),
                    applied: false,
                });
                continue;
            }

            Metrics::inc(&METRICS.stall_recoveries_planned);
            let apply = self.gate.apply_enabled(STALL_SENTINEL);
            let mut applied = false;
            if apply {
                match self
                    .store
                    .transition_job(
                        job.id,
                        JobStatus::Running,
                        JobStatus::Retryable,
                        TransitionFields::default(),
                    )
                    .await
                {
                    Ok(()) => {
                        Metrics::inc(&METRICS.stall_recoveries_applied);
                        applied = true;
                        self.stalled_counts.remove(&job.id);
                        info!(job_id = job.id, "Stalled job returned to retryable");
                    }
                    Err(StoreError::StaleTransition { .. }) => {
                        // The world moved underneath us; nothing to do.
                    }
                    Err(e) => {
                        Metrics::inc(&METRICS.store_errors);
                        warn!(job_id = job.id, error = %e, "Stall recovery failed");
                    }
                }
            }

            actions.push(WatchdogAction {
                loop_name: LOOP_NAME,
                job_id: Some(job.id),
                target: None,
                reason: "stalled_no_live_owner".to_string(),
                applied,
            });
        }

        actions
    }

    /// Stalled: state-file progress AND log growth both older than the
    /// threshold. Either signal alone can lag legitimately.
    fn is_stalled(&self, job: &ArchiveJob) -> bool {
        let output_dir = Path::new(&job.output_dir);
        let threshold = chrono::Duration::from_std(self.config.stall_threshold)
            .unwrap_or_else(|_| chrono::Duration::minutes(60));
        let now = Utc::now();

        let state_stale = match read_state(output_dir) {
            Ok(state) => match state.last_progress_timestamp {
                Some(ts) => now - ts > threshold,
                None => job
                    .started_at
                    .map(|started| now - started > threshold)
                    .unwrap_or(false),
            },
            Err(StateFileError::NotFound(_)) => job
                .started_at
                .map(|started| now - started > threshold)
                .unwrap_or(false),
            Err(_) => false,
        };
        if !state_stale {
            return false;
        }

        log_stale(job, self.config.stall_threshold, now)
    }
}

fn log_stale(job: &ArchiveJob, threshold: Duration, now: chrono::DateTime<Utc>) -> bool {
    let Some(log_path) = &job.combined_log_path else {
        // No log yet: fall back to the state-file judgement alone.
        return true;
    };
    let Ok(metadata) = std::fs::metadata(log_path) else {
        return true;
    };
    let Ok(modified) = metadata.modified() else {
        return true;
    };
    let modified: chrono::DateTime<Utc> = modified.into();
    let threshold = chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::minutes(60));
    now - modified > threshold
}
