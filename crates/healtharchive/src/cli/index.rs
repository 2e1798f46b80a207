//! Indexing and snapshot-maintenance commands.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use serde_json::json;

use healtharchive_crawler::JobLock;
use healtharchive_indexer::{
    discover_artifacts, verify_manifest, IndexError, IndexerConfig, IndexingPipeline,
    VerifyLevel, STABLE_WARC_DIR,
};
use healtharchive_store::JobStatus;

use crate::cli::output::print_json;
use crate::cli::settings::Settings;
use crate::cli::{get_job_or_exit, open_store, EXIT_FAILURE, EXIT_MISSING_STATE, EXIT_OK};

/// `index-job` — run the indexing pipeline for one completed job, under
/// the per-job lock so a concurrent crawl or reindex can't interleave.
pub async fn index_job(settings: &Settings, job_id: i64) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    let job = match get_job_or_exit(&store, job_id).await? {
        Ok(job) => job,
        Err(code) => return Ok(code),
    };
    if job.status != JobStatus::Completed {
        eprintln!("job {job_id} is '{}', not indexable", job.status);
        return Ok(ExitCode::from(EXIT_FAILURE));
    }

    let lock = match JobLock::acquire(&settings.lock_dir, job_id) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("cannot index job {job_id}: {e}");
            return Ok(ExitCode::from(EXIT_FAILURE));
        }
    };

    let pipeline = IndexingPipeline::new(
        store,
        IndexerConfig {
            auto_dedupe: settings.auto_dedupe,
        },
    );
    let result = pipeline.index_job(job_id).await;
    if let Err(e) = lock.release() {
        eprintln!("warning: failed to release lock: {e}");
    }

    match result {
        Ok(report) => {
            println!(
                "job {job_id}: indexed {} page(s) ({} new, {} already present, {} skipped, {} errors{})",
                report.indexed_pages,
                report.inserted,
                report.skipped_existing,
                report.records_skipped,
                report.record_errors,
                if report.deduplicated > 0 {
                    format!(", {} deduplicated", report.deduplicated)
                } else {
                    String::new()
                }
            );
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
            Ok(ExitCode::from(EXIT_OK))
        }
        Err(IndexError::Fatal { reason, .. }) => {
            eprintln!("indexing failed: {reason}");
            Ok(ExitCode::from(EXIT_FAILURE))
        }
        Err(e) => Err(e.into()),
    }
}

/// `verify-warc-manifest` — check the consolidated WARCs against their
/// manifest at the requested level.
pub async fn verify_warc_manifest(
    settings: &Settings,
    job_id: i64,
    level: &str,
    json: bool,
) -> Result<ExitCode> {
    let Some(level) = VerifyLevel::parse(level) else {
        eprintln!("unknown level {level:?} (presence|size|hash)");
        return Ok(ExitCode::from(EXIT_FAILURE));
    };

    let store = open_store(settings).await?;
    let job = match get_job_or_exit(&store, job_id).await? {
        Ok(job) => job,
        Err(code) => return Ok(code),
    };

    let output_dir = PathBuf::from(&job.output_dir);
    let artifacts = discover_artifacts(&output_dir)?;
    let Some(manifest) = &artifacts.manifest else {
        eprintln!("job {job_id} has no readable manifest.json");
        return Ok(ExitCode::from(EXIT_MISSING_STATE));
    };

    let report = verify_manifest(&output_dir.join(STABLE_WARC_DIR), manifest, level);
    if json {
        print_json(&json!({
            "job_id": job_id,
            "ok": report.all_ok(),
            "report": report,
        }))?;
    } else {
        for entry in &report.entries {
            match &entry.problem {
                None => println!("ok   {}", entry.stable_name),
                Some(problem) => println!("FAIL {}: {}", entry.stable_name, problem),
            }
        }
        println!(
            "{} of {} entries ok at level {}",
            report.entries.iter().filter(|e| e.ok).count(),
            report.entries.len(),
            report.level
        );
    }
    if report.all_ok() {
        Ok(ExitCode::from(EXIT_OK))
    } else {
        Ok(ExitCode::from(EXIT_FAILURE))
    }
}

/// `dedupe-snapshots` — same-day dedup pass. Dry-run by default.
pub async fn dedupe_snapshots(settings: &Settings, job_id: i64, apply: bool) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    if let Err(code) = get_job_or_exit(&store, job_id).await? {
        return Ok(code);
    }

    let plan = store.plan_same_day_dedup(job_id).await?;
    println!(
        "{} group(s), {} duplicate snapshot(s)",
        plan.groups.len(),
        plan.duplicate_count()
    );
    for group in &plan.groups {
        println!(
            "  {} @ {} ({} duplicates of snapshot {})",
            group.normalized_url,
            group.day,
            group.duplicate_snapshot_ids.len(),
            group.canonical_snapshot_id
        );
    }

    if !apply {
        println!("dry-run: pass --apply to flag duplicates");
        return Ok(ExitCode::from(EXIT_OK));
    }
    let flagged = store.apply_dedup_plan(&plan).await?;
    println!("flagged {flagged} snapshot(s) as deduplicated");
    Ok(ExitCode::from(EXIT_OK))
}

/// `restore-deduped-snapshots` — reverse a dedup pass via the audit table.
pub async fn restore_deduped_snapshots(
    settings: &Settings,
    job_id: i64,
    apply: bool,
) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    if let Err(code) = get_job_or_exit(&store, job_id).await? {
        return Ok(code);
    }

    if !apply {
        let snapshots = store.list_snapshots_for_job(job_id).await?;
        let flagged = snapshots.iter().filter(|s| s.deduplicated).count();
        println!("{flagged} deduplicated snapshot(s); pass --apply to restore");
        return Ok(ExitCode::from(EXIT_OK));
    }
    let restored = store.restore_deduped_snapshots(job_id).await?;
    println!("restored {restored} snapshot(s)");
    Ok(ExitCode::from(EXIT_OK))
}

pub async fn recompute_page_signals(settings: &Settings) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    let rows = store.recompute_page_signals().await?;
    println!("recomputed signals for {rows} page group(s)");
    Ok(ExitCode::from(EXIT_OK))
}

pub async fn rebuild_pages(settings: &Settings) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    let rows = store.rebuild_pages().await?;
    println!("rebuilt pages aggregate: {rows} row(s)");
    Ok(ExitCode::from(EXIT_OK))
}
