//! Read commands: list-jobs, show-job, worker-status.

use std::process::ExitCode;

use anyhow::Result;
use serde_json::json;

use healtharchive_store::{JobFilter, JobStatus};
use healtharchive_watchdog::METRICS;

use crate::cli::output::{opt_num, opt_str, print_json, status_cell, table};
use crate::cli::settings::Settings;
use crate::cli::{get_job_or_exit, open_store, EXIT_FAILURE, EXIT_OK};

pub async fn list_jobs(
    settings: &Settings,
    status: Option<String>,
    source: Option<String>,
    limit: i64,
    json: bool,
) -> Result<ExitCode> {
    let status = match status.as_deref() {
        None => None,
        Some(raw) => match JobStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                eprintln!("unknown status {raw:?}");
                return Ok(ExitCode::from(EXIT_FAILURE));
            }
        },
    };

    let store = open_store(settings).await?;
    let jobs = store
        .list_jobs(&JobFilter {
            status,
            source_code: source,
            campaign_kind: None,
            limit: Some(limit),
        })
        .await?;

    if json {
        print_json(&jobs)?;
        return Ok(ExitCode::from(EXIT_OK));
    }

    let mut out = table(&["id", "source", "name", "status", "retries", "queued_at", "pages"]);
    for job in &jobs {
        out.add_row(vec![
            comfy_table::Cell::new(job.id),
            comfy_table::Cell::new(&job.source_code),
            comfy_table::Cell::new(&job.name),
            status_cell(job.status),
            comfy_table::Cell::new(format!("{}/{}", job.retry_count, job.max_retries)),
            comfy_table::Cell::new(job.queued_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            comfy_table::Cell::new(opt_num(job.indexed_pages)),
        ]);
    }
    println!("{out}");
    println!("{} job(s)", jobs.len());
    Ok(ExitCode::from(EXIT_OK))
}

pub async fn show_job(settings: &Settings, job_id: i64, json: bool) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    let job = match get_job_or_exit(&store, job_id).await? {
        Ok(job) => job,
        Err(code) => return Ok(code),
    };

    if json {
        print_json(&job)?;
        return Ok(ExitCode::from(EXIT_OK));
    }

    println!("job {} ({})", job.id, job.name);
    println!("  source:          {}", job.source_code);
    println!("  status:          {}", job.status);
    println!("  output_dir:      {}", job.output_dir);
    println!("  retries:         {}/{}", job.retry_count, job.max_retries);
    println!("  queued_at:       {}", job.queued_at.to_rfc3339());
    println!("  started_at:      {}", fmt_opt_ts(&job.started_at));
    println!("  finished_at:     {}", fmt_opt_ts(&job.finished_at));
    println!("  cooldown_until:  {}", fmt_opt_ts(&job.cooldown_until));
    println!(
        "  crawler:         exit={} status={}",
        opt_num(job.crawler_exit_code),
        job.crawler_status.map(|s| s.as_str()).unwrap_or("-"),
    );
    println!("  combined_log:    {}", opt_str(&job.combined_log_path));
    println!("  warc_files:      {}", opt_num(job.warc_file_count));
    println!("  indexed_pages:   {}", opt_num(job.indexed_pages));
    println!("  index_error:     {}", opt_str(&job.index_error));
    println!("  cleanup_status:  {}", job.cleanup_status.as_str());
    if let Some(kind) = &job.campaign_kind {
        println!("  campaign:        {} {}", kind, opt_num(job.campaign_year));
    }
    println!("  config:          {}", serde_json::to_string(&job.config)?);
    Ok(ExitCode::from(EXIT_OK))
}

/// `worker-status` — job counts plus this process's watchdog counters.
pub async fn worker_status(settings: &Settings, json: bool) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    let counts = store.count_by_status().await?;
    let running = store.list_running_jobs().await?;

    if json {
        print_json(&json!({
            "counts": counts,
            "running": running,
            "watchdog_metrics": METRICS.snapshot(),
        }))?;
        return Ok(ExitCode::from(EXIT_OK));
    }

    println!("jobs by status (total {}):", counts.total());
    println!("  queued:             {}", counts.queued);
    println!("  running:            {}", counts.running);
    println!("  retryable:          {}", counts.retryable);
    println!("  completed:          {}", counts.completed);
    println!("  indexed:            {}", counts.indexed);
    println!("  index_failed:       {}", counts.index_failed);
    println!("  failed:             {}", counts.failed);
    println!("  infra_error:        {}", counts.infra_error);
    println!("  infra_error_config: {}", counts.infra_error_config);
    for job in running {
        println!(
            "running: job {} ({}) since {}",
            job.id,
            job.name,
            fmt_opt_ts(&job.started_at)
        );
    }
    Ok(ExitCode::from(EXIT_OK))
}

fn fmt_opt_ts(ts: &Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}
