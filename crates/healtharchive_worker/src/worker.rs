//! The single-writer worker loop.
//!
//! One job at a time per host: pick, lock, crawl, index, release, repeat.
//! The per-job lock spans crawl *and* index so a concurrent reindex can
//! never interleave with a crawl. Guardrails run before every pick; they
//! block work instead of burning retries on a doomed attempt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use healtharchive_crawler::{CrawlError, CrawlerDriver, JobLock, LockError};
use healtharchive_indexer::{IndexError, IndexingPipeline};
use healtharchive_store::{ArchiveJob, JobFilter, Store, StoreError};

use crate::disk::{disk_usage_pct, is_on_root_device, over_watermark};

#[derive(Debug, Error)]
pub enum WorkerError {
    /// An annual crawl's output directory resolves to the root filesystem:
    /// the storage volume is missing and starting would fill the root disk.
    #[error("guardrail: annual job {job_id} output dir {output_dir} is on the root filesystem")]
    AnnualOutputOnRoot { job_id: i64, output_dir: String },
}

/// Worker settings (plain data, built by the CLI from env + flags).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub archive_root: PathBuf,
    pub lock_dir: PathBuf,
    pub poll_interval: Duration,
    pub disk_high_watermark_pct: f64,
    /// Refuse annual jobs whose output dir sits on the root device. On by
    /// default; hosts that genuinely archive to the root volume turn it off.
    pub root_guard: bool,
    /// Process at most one job, then return.
    pub once: bool,
    /// Eligibility filter applied at pick time (e.g. annual-only).
    pub filter: JobFilter,
}

impl WorkerConfig {
    pub fn new(archive_root: PathBuf, lock_dir: PathBuf) -> Self {
        Self {
            archive_root,
            lock_dir,
            poll_interval: Duration::from_secs(10),
            disk_high_watermark_pct: 85.0,
            root_guard: true,
            once: false,
            filter: JobFilter::default(),
        }
    }
}

pub struct Worker {
    store: Store,
    driver: CrawlerDriver,
    pipeline: IndexingPipeline,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        store: Store,
        driver: CrawlerDriver,
        pipeline: IndexingPipeline,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            driver,
            pipeline,
            config,
        }
    }

    /// Run until shutdown (or after one job with `once`).
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        info!(
            archive_root = %self.config.archive_root.display(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            once = self.config.once,
            "Worker started"
        );

        loop {
            if cancel.is_cancelled() {
                info!("Shutdown requested; worker exiting");
                return Ok(());
            }

            if self.disk_gate_blocks() {
                if self.config.once {
                    return Ok(());
                }
                self.idle(cancel).await;
                continue;
            }

            let job = match self.store.pick_next_job(&self.config.filter).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    if self.config.once {
                        info!("No eligible job; exiting (--once)");
                        return Ok(());
                    }
                    self.idle(cancel).await;
                    continue;
                }
                Err(e) => {
                    self.log_store_error("pick_next_job", &e);
                    if self.config.once {
                        return Ok(());
                    }
                    self.idle(cancel).await;
                    continue;
                }
            };

            if self.config.root_guard && job.campaign_kind.as_deref() == Some("annual") {
                match is_on_root_device(Path::new(&job.output_dir)) {
                    Ok(true) => {
                        return Err(WorkerError::AnnualOutputOnRoot {
                            job_id: job.id,
                            output_dir: job.output_dir,
                        });
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(job_id = job.id, error = %e, "Device check failed; skipping pick");
                        if self.config.once {
                            return Ok(());
                        }
                        self.idle(cancel).await;
                        continue;
                    }
                }
            }

            // Lock spans crawl + index.
            let lock = match JobLock::acquire(&self.config.lock_dir, job.id) {
                Ok(lock) => lock,
                Err(LockError::Held { holder_pid, .. }) => {
                    warn!(job_id = job.id, ?holder_pid, "Job lock held; will retry later");
                    if self.config.once {
                        return Ok(());
                    }
                    self.idle(cancel).await;
                    continue;
                }
                Err(e) => {
                    error!(job_id = job.id, error = %e, "Lock directory unusable");
                    if self.config.once {
                        return Ok(());
                    }
                    self.idle(cancel).await;
                    continue;
                }
            };

            self.process_job(&job, cancel).await;

            if let Err(e) = lock.release() {
                warn!(job_id = job.id, error = %e, "Failed to release job lock");
            }

            if self.config.once {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Ok(());
            }
            // Immediately try the next job.
        }
    }

    async fn process_job(&self, job: &ArchiveJob, cancel: &CancellationToken) {
        let report = match self.driver.run(job.id, cancel, false).await {
            Ok(report) => report,
            Err(CrawlError::Store(e)) => {
                self.log_store_error("crawl", &e);
                return;
            }
            Err(e) => {
                // The watchdogs own recovery from here.
                error!(job_id = job.id, error = %e, "Crawl attempt errored");
                return;
            }
        };

        if report.cancelled || !report.is_success() {
            return;
        }

        match self.pipeline.index_job(job.id).await {
            Ok(index_report) => {
                info!(
                    job_id = job.id,
                    indexed_pages = index_report.indexed_pages,
                    "Job crawled and indexed"
                );
            }
            Err(IndexError::Store(e)) => self.log_store_error("index", &e),
            Err(e) => {
                // The job row already says index_failed with a reason.
                error!(job_id = job.id, error = %e, "Indexing failed");
            }
        }
    }

    fn disk_gate_blocks(&self) -> bool {
        match disk_usage_pct(&self.config.archive_root) {
            Ok(pct) => {
                if over_watermark(pct, self.config.disk_high_watermark_pct) {
                    warn!(
                        usage_pct = pct,
                        watermark_pct = self.config.disk_high_watermark_pct,
                        "Disk above high watermark; pausing picks"
                    );
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                // Can't see the disk: treat like a full one.
                warn!(error = %e, "Disk usage probe failed; pausing picks");
                true
            }
        }
    }

    fn log_store_error(&self, during: &str, err: &StoreError) {
        if err.is_unavailable() {
            warn!(during, error = %err, "Store unavailable; backing off");
        } else {
            error!(during, error = %err, "Store error");
        }
    }

    async fn idle(&self, cancel: &CancellationToken) {
        if !cancel.is_cancelled() {
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
