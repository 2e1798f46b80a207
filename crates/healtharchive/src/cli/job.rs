//! Job lifecycle commands: create, run, retry, patch, cleanup.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;

use tokio_util::sync::CancellationToken;

use healtharchive_crawler::{CrawlerDriver, DriverConfig, JobConfig, OutcomeKind};
use healtharchive_store::{JobStatus, NewJob, StoreError, TransitionFields};

use crate::cli::settings::Settings;
use crate::cli::{get_job_or_exit, open_store, EXIT_FAILURE, EXIT_OK};

#[derive(Debug, Args)]
pub struct CreateJobArgs {
    /// Source code (e.g. hc, phac)
    #[arg(long)]
    pub source: String,

    /// Job name; defaults to <source>-<YYYYMMDD>
    #[arg(long)]
    pub name: Option<String>,

    /// Seed URL (repeatable); defaults to the source's base URL
    #[arg(long = "seed")]
    pub seeds: Vec<String>,

    /// Output directory; defaults to <ARCHIVE_ROOT>/<name>
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Full config payload as JSON (replaces seeds/tool-option defaults)
    #[arg(long)]
    pub config_json: Option<String>,

    #[arg(long, default_value_t = 2)]
    pub max_retries: i64,

    /// Campaign kind (e.g. annual)
    #[arg(long)]
    pub campaign_kind: Option<String>,

    #[arg(long)]
    pub campaign_year: Option<i64>,
}

pub async fn create_job(settings: &Settings, args: CreateJobArgs) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    let source = store.get_source(&args.source).await?;

    let name = args
        .name
        .unwrap_or_else(|| format!("{}-{}", source.code, Utc::now().format("%Y%m%d")));
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| settings.archive_root.join(&name));

    // Unknown keys and bad types are rejected here, not hours into a crawl.
    let config = match &args.config_json {
        Some(raw) => {
            let payload: serde_json::Value =
                serde_json::from_str(raw).context("--config-json is not valid JSON")?;
            JobConfig::from_value(&payload).context("--config-json rejected")?
        }
        None => {
            let seeds = if args.seeds.is_empty() {
                let base = source
                    .base_url
                    .clone()
                    .context("source has no base URL; pass --seed")?;
                vec![base]
            } else {
                args.seeds.clone()
            };
            let config = JobConfig {
                seeds,
                tool_options: Default::default(),
                include_non_2xx: false,
                auto_dedupe: None,
            };
            config.validate().context("seed list rejected")?;
            config
        }
    };

    let job_id = store
        .create_job(NewJob {
            source_code: source.code.clone(),
            name: name.clone(),
            output_dir: output_dir.display().to_string(),
            config: config.to_value()?,
            max_retries: args.max_retries,
            campaign_kind: args.campaign_kind,
            campaign_year: args.campaign_year,
        })
        .await;

    match job_id {
        Ok(id) => {
            println!("Created job {id}: {name} -> {}", output_dir.display());
            Ok(ExitCode::from(EXIT_OK))
        }
        Err(StoreError::DuplicateName(name)) => {
            eprintln!("a job named {name:?} already exists");
            Ok(ExitCode::from(EXIT_FAILURE))
        }
        Err(e) => Err(e.into()),
    }
}

/// `run-db-job` — run one crawl attempt for a stored job, holding the
/// per-job lock for the duration.
pub async fn run_db_job(settings: &Settings, job_id: i64) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    let job = match get_job_or_exit(&store, job_id).await? {
        Ok(job) => job,
        Err(code) => return Ok(code),
    };
    if !matches!(job.status, JobStatus::Queued | JobStatus::Retryable) {
        eprintln!("job {job_id} is '{}', not runnable", job.status);
        return Ok(ExitCode::from(EXIT_FAILURE));
    }

    let driver = CrawlerDriver::new(store, driver_config(settings));
    let cancel = shutdown_token();
    let report = driver.run(job_id, &cancel, true).await?;

    if report.cancelled {
        eprintln!("crawl interrupted by shutdown; job left running for the watchdogs");
        return Ok(ExitCode::from(EXIT_FAILURE));
    }
    println!(
        "job {job_id}: {:?} ({})",
        report.classification.kind, report.classification.reason
    );
    if report.classification.kind == OutcomeKind::Success {
        Ok(ExitCode::from(EXIT_OK))
    } else {
        Ok(ExitCode::from(EXIT_FAILURE))
    }
}

/// `retry-job` — put a terminal job back on the queue's path.
pub async fn retry_job(settings: &Settings, job_id: i64) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    let job = match get_job_or_exit(&store, job_id).await? {
        Ok(job) => job,
        Err(code) => return Ok(code),
    };

    match job.status {
        JobStatus::Failed | JobStatus::InfraErrorConfig => {
            store
                .transition_job(
                    job_id,
                    job.status,
                    JobStatus::Retryable,
                    TransitionFields {
                        cooldown_until: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
            println!("job {job_id}: {} -> retryable", job.status);
        }
        JobStatus::IndexFailed => {
            // Re-index rather than re-crawl: the WARCs are already there.
            store
                .transition_job(
                    job_id,
                    JobStatus::IndexFailed,
                    JobStatus::Completed,
                    TransitionFields::default(),
                )
                .await?;
            println!("job {job_id}: index_failed -> completed (re-indexable)");
        }
        other => {
            eprintln!("job {job_id} is '{other}'; nothing to retry");
            return Ok(ExitCode::from(EXIT_FAILURE));
        }
    }
    Ok(ExitCode::from(EXIT_OK))
}

/// `reset-retry-count` — zero the retry budget. Dry-run by default.
pub async fn reset_retry_count(settings: &Settings, job_id: i64, apply: bool) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    let job = match get_job_or_exit(&store, job_id).await? {
        Ok(job) => job,
        Err(code) => return Ok(code),
    };

    println!(
        "job {job_id}: retry_count {} / max_retries {}",
        job.retry_count, job.max_retries
    );
    if !apply {
        println!("dry-run: pass --apply to reset");
        return Ok(ExitCode::from(EXIT_OK));
    }
    store.reset_retry_count(job_id).await?;
    println!("retry_count reset to 0");
    Ok(ExitCode::from(EXIT_OK))
}

/// `patch-job-config` — apply `--set-tool-option k=v` patches.
pub async fn patch_job_config(
    settings: &Settings,
    job_id: i64,
    set_tool_options: Vec<String>,
    apply: bool,
) -> Result<ExitCode> {
    if set_tool_options.is_empty() {
        bail!("pass at least one --set-tool-option k=v");
    }

    let store = open_store(settings).await?;
    let job = match get_job_or_exit(&store, job_id).await? {
        Ok(job) => job,
        Err(code) => return Ok(code),
    };

    let mut config = JobConfig::from_value(&job.config)
        .context("stored config does not parse; fix it with a full replacement")?;
    for patch in &set_tool_options {
        let (key, value) = patch
            .split_once('=')
            .with_context(|| format!("--set-tool-option {patch:?} is not k=v"))?;
        config = config
            .patch_tool_option(key, value)
            .with_context(|| format!("patch {patch:?} rejected"))?;
    }

    let new_payload = config.to_value()?;
    println!("old: {}", serde_json::to_string(&job.config)?);
    println!("new: {}", serde_json::to_string(&new_payload)?);
    if !apply {
        println!("dry-run: pass --apply to persist");
        return Ok(ExitCode::from(EXIT_OK));
    }
    store.update_job_config(job_id, &new_payload).await?;
    println!("config updated");
    Ok(ExitCode::from(EXIT_OK))
}

/// `cleanup-job --mode temp` — drop `.tmp*` crawl directories once their
/// WARCs are consolidated.
pub async fn cleanup_job(settings: &Settings, job_id: i64, mode: &str) -> Result<ExitCode> {
    if mode != "temp" {
        bail!("unsupported cleanup mode {mode:?} (supported: temp)");
    }

    let store = open_store(settings).await?;
    let job = match get_job_or_exit(&store, job_id).await? {
        Ok(job) => job,
        Err(code) => return Ok(code),
    };

    let output_dir = PathBuf::from(&job.output_dir);
    let artifacts = healtharchive_indexer::discover_artifacts(&output_dir)?;
    if artifacts.location != healtharchive_indexer::WarcLocation::Stable {
        eprintln!("job {job_id} has no consolidated warcs/; refusing to delete temp dirs");
        return Ok(ExitCode::from(EXIT_FAILURE));
    }
    if let Some(manifest) = &artifacts.manifest {
        let warcs_dir = output_dir.join(healtharchive_indexer::STABLE_WARC_DIR);
        let report = healtharchive_indexer::verify_manifest(
            &warcs_dir,
            manifest,
            healtharchive_indexer::VerifyLevel::Presence,
        );
        if !report.all_ok() {
            eprintln!("manifest presence check failed; refusing to delete temp dirs");
            return Ok(ExitCode::from(EXIT_FAILURE));
        }
    }

    let removed = healtharchive_indexer::remove_temp_dirs(&output_dir)
        .with_context(|| format!("cleaning temp dirs under {}", output_dir.display()))?;
    store.mark_temp_cleaned(job_id).await?;
    println!("removed {removed} temp dir(s); cleanup_status=temp_cleaned");
    Ok(ExitCode::from(EXIT_OK))
}

pub fn driver_config(settings: &Settings) -> DriverConfig {
    DriverConfig {
        lock_dir: settings.lock_dir.clone(),
        crawler_bin: settings.crawler_bin.clone(),
        infra_cooldown: settings.infra_cooldown,
        term_grace: std::time::Duration::from_secs(30),
    }
}

/// Cancellation token wired to SIGINT/SIGTERM.
pub fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();

    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let on_term = cancel.clone();
    tokio::spawn(async move {
        if let Ok(mut term) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            term.recv().await;
            on_term.cancel();
        }
    });

    cancel
}

/// `recover-stale-jobs` — manual sweep of `running` rows whose runtime
/// owner is gone. Dry-run by default.
pub async fn recover_stale_jobs(settings: &Settings, apply: bool) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    let running = store.list_running_jobs().await?;
    let threshold = chrono::Duration::from_std(settings.stall_threshold)
        .unwrap_or_else(|_| chrono::Duration::minutes(60));
    let now = Utc::now();

    let mut recovered = 0;
    for job in running {
        let old_enough = job
            .started_at
            .map(|started| now - started > threshold)
            .unwrap_or(true);
        if !old_enough {
            continue;
        }
        if runtime_owner_alive(settings, &job) {
            continue;
        }

        println!(
            "job {}: running since {:?}, no live owner -> retryable",
            job.id, job.started_at
        );
        if apply {
            match store
                .transition_job(
                    job.id,
                    JobStatus::Running,
                    JobStatus::Retryable,
                    TransitionFields::default(),
                )
                .await
            {
                Ok(()) => recovered += 1,
                Err(StoreError::StaleTransition { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            // Reclaim the dead owner's lock file too.
            let _ = healtharchive_crawler::remove_if_stale(&settings.lock_dir, job.id);
        }
    }

    if apply {
        println!("recovered {recovered} job(s)");
    } else {
        println!("dry-run: pass --apply to recover");
    }
    Ok(ExitCode::from(EXIT_OK))
}

fn runtime_owner_alive(settings: &Settings, job: &healtharchive_store::ArchiveJob) -> bool {
    let lock = healtharchive_crawler::lock_path(&settings.lock_dir, job.id);
    if lock.exists() {
        if let Some(pid) = healtharchive_crawler::read_holder_pid(&lock) {
            if healtharchive_crawler::pid_alive(pid) {
                return true;
            }
        }
    }
    healtharchive_watchdog::find_process_referencing(&job.output_dir).is_some()
}
