//! DB/runtime reconciler.
//!
//! Runtime-is-truth direction: a job whose lock is held by a live process,
//! or whose crawler is visibly running against its output directory, must
//! read `status = running` no matter what the row says. The opposite
//! direction (row says running, nothing is alive) belongs to the stall
//! detector and is deliberately not handled here.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use healtharchive_crawler::{lock_path, pid_alive, read_holder_pid};
use healtharchive_store::{
    ArchiveJob, JobFilter, JobStatus, Store, StoreError, TransitionFields,
};

use crate::action::WatchdogAction;
use crate::gate::{SentinelGate, RECONCILER_SENTINEL};
use crate::metrics::{Metrics, METRICS};

pub const LOOP_NAME: &str = "reconciler";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub lock_dir: PathBuf,
}

pub struct Reconciler {
    store: Store,
    gate: SentinelGate,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(store: Store, gate: SentinelGate, config: ReconcilerConfig) -> Self {
        Self {
            store,
            gate,
            config,
        }
    }

    pub async fn run_once(&self) -> Vec<WatchdogAction> {
        let mut actions = Vec::new();

        // Only non-running, non-terminal jobs can be out of sync this way.
        let mut candidates = Vec::new();
        for status in [JobStatus::Queued, JobStatus::Retryable] {
            let filter = JobFilter {
                status: Some(status),
                ..Default::default()
            };
            match self.store.list_jobs(&filter).await {
                Ok(jobs) => candidates.extend(jobs),
                Err(e) => {
                    Metrics::inc(&METRICS.store_errors);
                    warn!(error = %e, "Reconciler could not list jobs");
                    return actions;
                }
            }
        }

        for job in candidates {
            Metrics::inc(&METRICS.reconcile_checks);
            let Some(reason) = self.runtime_owner(&job) else {
                continue;
            };

            Metrics::inc(&METRICS.reconcile_planned);
            let apply = self.gate.apply_enabled(RECONCILER_SENTINEL);
            let mut applied = false;
            if apply {
                match self
                    .store
                    .transition_job(
                        job.id,
                        job.status,
                        JobStatus::Running,
                        TransitionFields {
                            started_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    Ok(()) => {
                        applied = true;
                        Metrics::inc(&METRICS.reconcile_applied);
                        info!(job_id = job.id, reason = %reason, "Restored status=running");
                    }
                    Err(StoreError::StaleTransition { .. }) => {}
                    Err(e) => {
                        Metrics::inc(&METRICS.store_errors);
                        warn!(job_id = job.id, error = %e, "Reconcile transition failed");
                    }
                }
            }

            actions.push(WatchdogAction {
                loop_name: LOOP_NAME,
                job_id: Some(job.id),
                target: None,
                reason,
                applied,
            });
        }

        actions
    }

    /// Evidence that some process still owns this job at runtime.
    fn runtime_owner(&self, job: &ArchiveJob) -> Option<String> {
        let lock = lock_path(&self.config.lock_dir, job.id);
        if lock.exists() {
            if let Some(pid) = read_holder_pid(&lock) {
                if pid_alive(pid) {
                    return Some(format!("lock_held_by_pid_{pid}"));
                }
            }
        }

        if let Some(pid) = find_process_referencing(&job.output_dir) {
            return Some(format!("crawler_process_{pid}"));
        }
        None
    }
}

/// Scan /proc for a process whose command line references `needle`.
pub fn find_process_referencing(needle: &str) -> Option<i32> {
    let own_pid = std::process::id() as i32;
    let proc_dir = std::fs::read_dir("/proc").ok()?;
    for entry in proc_dir.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        let cmdline_path = Path::new("/proc").join(name).join("cmdline");
        let Ok(cmdline) = std::fs::read(&cmdline_path) else {
            continue;
        };
        if !cmdline.is_empty()
            && cmdline
                .split(|b| *b == 0)
                .any(|arg| String::from_utf8_lossy(arg).contains(needle))
        {
            return Some(pid);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn queued_job(store: &Store, output_dir: &str) -> i64 {
        store.seed_sources().await.unwrap();
        store
            .create_job(healtharchive_store::NewJob {
                source_code: "hc".to_string(),
                name: "hc-20260801".to_string(),
                output_dir: output_dir.to_string(),
                config: json!({"seeds": ["https://example.ca/"]}),
                max_retries: 2,
                campaign_kind: None,
                campaign_year: None,
            })
            .await
            .unwrap()
    }

    fn reconciler(store: &Store, scratch: &Path, apply: bool) -> Reconciler {
        let sentinel_dir = scratch.join("sentinels");
        std::fs::create_dir_all(&sentinel_dir).unwrap();
        if apply {
            std::fs::write(sentinel_dir.join(RECONCILER_SENTINEL), b"").unwrap();
        }
        Reconciler::new(
            store.clone(),
            SentinelGate::new(sentinel_dir),
            ReconcilerConfig {
                lock_dir: scratch.join("locks"),
            },
        )
    }

    #[tokio::test]
    async fn live_lock_holder_restores_running() {
        let scratch = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let job_id = queued_job(&store, "/srv/healtharchive/jobs/hc-20260801").await;

        // A lock held by this (live) test process.
        let lock_dir = scratch.path().join("locks");
        std::fs::create_dir_all(&lock_dir).unwrap();
        std::fs::write(
            lock_dir.join(format!("job-{job_id}.lock")),
            format!("{}\n", std::process::id()),
        )
        .unwrap();

        let reconciler = reconciler(&store, scratch.path(), true);
        let actions = reconciler.run_once().await;
        assert_eq!(actions.len(), 1);
        assert!(actions[0].applied);
        assert!(actions[0].reason.starts_with("lock_held_by_pid_"));

        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_none());
    }

    #[tokio::test]
    async fn dead_lock_holder_is_ignored() {
        let scratch = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let job_id = queued_job(&store, "/srv/healtharchive/jobs/hc-20260801").await;

        let lock_dir = scratch.path().join("locks");
        std::fs::create_dir_all(&lock_dir).unwrap();
        std::fs::write(lock_dir.join(format!("job-{job_id}.lock")), "999999999\n").unwrap();

        let reconciler = reconciler(&store, scratch.path(), true);
        assert!(reconciler.run_once().await.is_empty());
        assert_eq!(store.get_job(job_id).await.unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn dry_run_never_writes() {
        let scratch = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let job_id = queued_job(&store, "/srv/healtharchive/jobs/hc-20260801").await;

        let lock_dir = scratch.path().join("locks");
        std::fs::create_dir_all(&lock_dir).unwrap();
        std::fs::write(
            lock_dir.join(format!("job-{job_id}.lock")),
            format!("{}\n", std::process::id()),
        )
        .unwrap();

        let reconciler = reconciler(&store, scratch.path(), false);
        let actions = reconciler.run_once().await;
        assert_eq!(actions.len(), 1);
        assert!(!actions[0].applied);
        assert_eq!(store.get_job(job_id).await.unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn idle_jobs_are_untouched() {
        let scratch = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        queued_job(&store, "/srv/healtharchive/jobs/hc-20260801").await;

        let reconciler = reconciler(&store, scratch.path(), true);
        assert!(reconciler.run_once().await.is_empty());
    }
}
