//! One crawl attempt, end to end.
//!
//! The driver owns every job-row write for the crawl phase: claim to
//! `running`, run the subprocess, classify, and apply the retry policy.
//! Infra conditions never charge the retry budget; they park the job in
//! `retryable` behind a cooldown so a stale mount can't cause a hot
//! re-pick loop.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use healtharchive_store::{
    ArchiveJob, CrawlerStatus, JobStatus, Store, StoreError, TransitionFields,
};

use crate::classify::{classify, Classification, ClassifyInput, OutcomeKind};
use crate::command::build_crawler_args;
use crate::config::{ConfigError, JobConfig};
use crate::lock::{JobLock, LockError};
use crate::process::{run_crawler, ProcessExit};
use crate::state_file::{read_state, ArchiveState, StateFileError};

/// File name of the combined crawler log inside the output directory.
pub const COMBINED_LOG_NAME: &str = "crawler-combined.log";

/// Bytes of combined log kept for classification and diagnostics.
const LOG_TAIL_BYTES: u64 = 8 * 1024;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job {job_id} is '{status}', not runnable")]
    NotRunnable { job_id: i64, status: JobStatus },

    #[error("lock error: {0}")]
    Lock(#[source] LockError),

    #[error("I/O error during crawl of job {job_id}: {source}")]
    Io {
        job_id: i64,
        #[source]
        source: std::io::Error,
    },
}

/// Driver settings, owned by whoever runs jobs (worker loop or CLI).
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub lock_dir: PathBuf,
    pub crawler_bin: PathBuf,
    pub infra_cooldown: Duration,
    pub term_grace: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            lock_dir: PathBuf::from("/srv/healtharchive/ops/locks/jobs"),
            crawler_bin: PathBuf::from("archive-crawler"),
            infra_cooldown: Duration::from_secs(60),
            term_grace: Duration::from_secs(30),
        }
    }
}

/// What one crawl attempt did, for the caller and the logs.
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub job_id: i64,
    pub classification: Classification,
    pub exit_code: Option<i32>,
    pub warc_file_count: Option<i64>,
    pub log_tail: String,
    /// Shutdown interrupted the attempt; the row is left `running` for the
    /// reconciler and no classification was applied.
    pub cancelled: bool,
}

impl CrawlReport {
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.classification.kind == OutcomeKind::Success
    }
}

pub struct CrawlerDriver {
    store: Store,
    config: DriverConfig,
}

impl CrawlerDriver {
    pub fn new(store: Store, config: DriverConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Run one crawl attempt for `job_id`.
    ///
    /// The job must be `queued` or `retryable`. The per-job lock is
    /// acquired here and released before returning; callers holding their
    /// own lock (the worker loop does, spanning crawl + index) pass
    /// `with_lock = false`.
    pub async fn run(
        &self,
        job_id: i64,
        cancel: &CancellationToken,
        with_lock: bool,
    ) -> Result<CrawlReport, CrawlError> {
        let job = self.store.get_job(job_id).await?;
        if !matches!(job.status, JobStatus::Queued | JobStatus::Retryable) {
            return Err(CrawlError::NotRunnable {
                job_id,
                status: job.status,
            });
        }

        // Malformed config is terminal before anything is spawned.
        let config = match JobConfig::from_value(&job.config) {
            Ok(config) => config,
            Err(e) => {
                return self
                    .conclude_config_error(&job, job.status, None, config_error_reason(&e))
                    .await;
            }
        };

        self.store
            .transition_job(
                job_id,
                job.status,
                JobStatus::Running,
                TransitionFields {
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        // Hard precondition: a stale FUSE mount must not be confused with a
        // crawl bug, so probe before spending anything.
        let output_dir = PathBuf::from(&job.output_dir);
        if let Err(probe) = ensure_writable(&output_dir) {
            warn!(job_id, error = %probe, "Output directory not writable");
            return self
                .conclude_infra(&job, None, "output_dir_not_writable", String::new())
                .await;
        }

        let _lock = if with_lock {
            match JobLock::acquire(&self.config.lock_dir, job_id) {
                Ok(lock) => Some(lock),
                Err(LockError::Held { .. }) => {
                    return self.conclude_infra(&job, None, "lock_held", String::new()).await;
                }
                Err(e) => return Err(CrawlError::Lock(e)),
            }
        } else {
            None
        };

        let combined_log_path = output_dir.join(COMBINED_LOG_NAME);
        let args = build_crawler_args(&job.name, &output_dir, &config);
        let hard_timeout = config
            .tool_options
            .hard_timeout_minutes
            .map(|minutes| Duration::from_secs(minutes * 60));

        info!(job_id, name = %job.name, "Starting crawl");
        let exit = run_crawler(
            &self.config.crawler_bin,
            &args,
            &combined_log_path,
            hard_timeout,
            self.config.term_grace,
            cancel,
        )
        .await
        .map_err(|source| CrawlError::Io { job_id, source })?;

        if exit.cancelled {
            // Leave the row `running`; the reconciler and stall detector
            // own recovery after a shutdown.
            info!(job_id, "Crawl cancelled by shutdown");
            return Ok(CrawlReport {
                job_id,
                classification: Classification {
                    kind: OutcomeKind::CrawlFailure,
                    reason: "cancelled".to_string(),
                },
                exit_code: None,
                warc_file_count: None,
                log_tail: String::new(),
                cancelled: true,
            });
        }

        let state = match read_state(&output_dir) {
            Ok(state) => Some(state),
            Err(StateFileError::NotFound(_)) => None,
            Err(e) => {
                warn!(job_id, error = %e, "State file unreadable");
                None
            }
        };
        let log_tail = read_log_tail(&combined_log_path);

        let classification = classify(&ClassifyInput {
            exit_code: exit.exit_code,
            timed_out: exit.timed_out,
            log_tail: &log_tail,
            state: state.as_ref(),
        });
        info!(
            job_id,
            kind = ?classification.kind,
            reason = %classification.reason,
            exit_code = ?exit.exit_code,
            "Crawl finished"
        );

        self.conclude(&job, &exit, classification, state.as_ref(), log_tail, &combined_log_path)
            .await
    }

    async fn conclude(
        &self,
        job: &ArchiveJob,
        exit: &ProcessExit,
        classification: Classification,
        state: Option<&ArchiveState>,
        log_tail: String,
        combined_log_path: &Path,
    ) -> Result<CrawlReport, CrawlError> {
        let job_id = job.id;
        let exit_code = exit.exit_code.map(i64::from);
        let log_path_text = combined_log_path.display().to_string();

        let report = match classification.kind {
            OutcomeKind::Success => {
                let warc_count = count_warc_files(Path::new(&job.output_dir));
                self.store
                    .transition_job(
                        job_id,
                        JobStatus::Running,
                        JobStatus::Completed,
                        TransitionFields {
                            finished_at: Some(Utc::now()),
                            crawler_exit_code: exit_code,
                            crawler_status: Some(CrawlerStatus::Ok),
                            combined_log_path: Some(log_path_text),
                            warc_file_count: Some(warc_count),
                            ..Default::default()
                        },
                    )
                    .await?;
                if let Some(state) = state {
                    info!(job_id, pages_crawled = state.pages_crawled, "Crawl completed");
                }
                CrawlReport {
                    job_id,
                    classification,
                    exit_code: exit.exit_code,
                    warc_file_count: Some(warc_count),
                    log_tail,
                    cancelled: false,
                }
            }
            OutcomeKind::CrawlFailure => {
                let crawler_status = if exit.timed_out {
                    CrawlerStatus::Timeout
                } else {
                    CrawlerStatus::Other
                };
                let retries_left = job.retry_count + 1 <= job.max_retries;
                let (new_status, retry_count) = if retries_left {
                    (JobStatus::Retryable, job.retry_count + 1)
                } else {
                    (JobStatus::Failed, job.retry_count)
                };
                self.store
                    .transition_job(
                        job_id,
                        JobStatus::Running,
                        new_status,
                        TransitionFields {
                            finished_at: Some(Utc::now()),
                            retry_count: Some(retry_count),
                            crawler_exit_code: exit_code,
                            crawler_status: Some(crawler_status),
                            combined_log_path: Some(log_path_text),
                            ..Default::default()
                        },
                    )
                    .await?;
                CrawlReport {
                    job_id,
                    classification,
                    exit_code: exit.exit_code,
                    warc_file_count: None,
                    log_tail,
                    cancelled: false,
                }
            }
            OutcomeKind::InfraError => {
                return self
                    .conclude_infra(job, exit.exit_code, &classification.reason, log_tail)
                    .await;
            }
            OutcomeKind::ConfigError => {
                return self
                    .conclude_config_error(
                        job,
                        JobStatus::Running,
                        exit.exit_code,
                        classification.reason,
                    )
                    .await;
            }
        };

        Ok(report)
    }

    /// Park the job in `retryable` behind the infra cooldown without
    /// touching the retry budget.
    async fn conclude_infra(
        &self,
        job: &ArchiveJob,
        exit_code: Option<i32>,
        reason: &str,
        log_tail: String,
    ) -> Result<CrawlReport, CrawlError> {
        let cooldown_until = Utc::now()
            + chrono::Duration::seconds(self.config.infra_cooldown.as_secs() as i64);
        self.store
            .transition_job(
                job.id,
                JobStatus::Running,
                JobStatus::Retryable,
                TransitionFields {
                    finished_at: Some(Utc::now()),
                    cooldown_until: Some(Some(cooldown_until)),
                    crawler_exit_code: exit_code.map(i64::from),
                    crawler_status: Some(CrawlerStatus::InfraError),
                    ..Default::default()
                },
            )
            .await?;
        warn!(job_id = job.id, reason, "Crawl hit infra error; cooling down");
        Ok(CrawlReport {
            job_id: job.id,
            classification: Classification {
                kind: OutcomeKind::InfraError,
                reason: reason.to_string(),
            },
            exit_code,
            warc_file_count: None,
            log_tail,
            cancelled: false,
        })
    }

    /// Halt retries: bad configuration needs an operator, not a re-pick.
    async fn conclude_config_error(
        &self,
        job: &ArchiveJob,
        expected: JobStatus,
        exit_code: Option<i32>,
        reason: String,
    ) -> Result<CrawlReport, CrawlError> {
        self.store
            .transition_job(
                job.id,
                expected,
                JobStatus::InfraErrorConfig,
                TransitionFields {
                    finished_at: Some(Utc::now()),
                    crawler_exit_code: exit_code.map(i64::from),
                    crawler_status: Some(CrawlerStatus::InfraErrorConfig),
                    ..Default::default()
                },
            )
            .await?;
        error!(job_id = job.id, reason = %reason, "Job config rejected; operator action required");
        Ok(CrawlReport {
            job_id: job.id,
            classification: Classification {
                kind: OutcomeKind::ConfigError,
                reason,
            },
            exit_code,
            warc_file_count: None,
            log_tail: String::new(),
            cancelled: false,
        })
    }
}

fn config_error_reason(err: &ConfigError) -> String {
    match err {
        ConfigError::Invalid(msg) => format!("config_invalid: {msg}"),
        ConfigError::Json(e) => format!("config_parse: {e}"),
    }
}

/// Probe that the output directory exists and accepts writes from the
/// effective worker identity. Stale FUSE mounts fail here.
fn ensure_writable(output_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let probe = output_dir.join(".ha-write-probe");
    std::fs::write(&probe, b"probe")?;
    std::fs::remove_file(&probe)
}

/// Count `.warc.gz` files anywhere under the output directory.
pub fn count_warc_files(output_dir: &Path) -> i64 {
    fn walk(dir: &Path, count: &mut i64) {
        let Ok(entries) = std::fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, count);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".warc.gz"))
            {
                *count += 1;
            }
        }
    }
    let mut count = 0;
    walk(output_dir, &mut count);
    count
}

/// Last chunk of the combined log, for classification and diagnostics.
pub fn read_log_tail(path: &Path) -> String {
    let Ok(mut file) = std::fs::File::open(path) else {
        return String::new();
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    let start = len.saturating_sub(LOG_TAIL_BYTES);
    if file.seek(SeekFrom::Start(start)).is_err() {
        return String::new();
    }
    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}
