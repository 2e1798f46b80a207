//! The indexing pipeline: completed crawl in, snapshot rows out.
//!
//! Per-record failures are logged and skipped; the job only fails when the
//! whole input is unusable (no WARCs, broken manifest, unreadable stable
//! dir) or the store goes away. Inserts ride the capture-key conflict skip,
//! so a partial re-index converges to the same rows.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use healtharchive_crawler::JobConfig;
use healtharchive_store::{
    ArchiveJob, JobStatus, NewSnapshot, Outlink, Store, StoreError, TransitionFields,
};

use crate::discover::{discover_artifacts, CrawlArtifacts, WarcLocation};
use crate::extract::extract_page;
use crate::manifest::{verify_manifest, VerifyLevel};
use crate::urlnorm::{normalize_url, url_group};
use crate::warc::{is_html, parse_http_response, WarcGzReader, WarcRecord};

/// Snapshots accumulated before each store write.
const WRITE_BATCH_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job {job_id} is '{status}', not indexable")]
    NotIndexable { job_id: i64, status: JobStatus },

    #[error("indexing job {job_id} failed: {reason}")]
    Fatal { job_id: i64, reason: String },
}

/// Pipeline-wide settings (the job config can override per job).
#[derive(Debug, Clone, Default)]
pub struct IndexerConfig {
    /// Apply same-day dedup after indexing (the AUTO_DEDUPE default).
    pub auto_dedupe: bool,
}

/// What one indexing run did.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub job_id: i64,
    pub indexed_pages: i64,
    pub inserted: usize,
    pub skipped_existing: usize,
    pub records_seen: usize,
    pub records_skipped: usize,
    pub record_errors: usize,
    pub deduplicated: usize,
    pub warnings: Vec<String>,
}

pub struct IndexingPipeline {
    store: Store,
    config: IndexerConfig,
}

impl IndexingPipeline {
    pub fn new(store: Store, config: IndexerConfig) -> Self {
        Self { store, config }
    }

    /// Index a `completed` job's WARCs into snapshot rows.
    ///
    /// On success the job moves to `indexed` with `indexed_pages` set; on a
    /// fatal condition it moves to `index_failed` with the reason recorded.
    pub async fn index_job(&self, job_id: i64) -> Result<IndexReport, IndexError> {
        let job = self.store.get_job(job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(IndexError::NotIndexable {
                job_id,
                status: job.status,
            });
        }
        self.store.mark_index_started(job_id).await?;

        let mut report = IndexReport {
            job_id,
            ..Default::default()
        };

        // A config that no longer parses shouldn't block indexing a crawl
        // that already ran; fall back to defaults.
        let job_config = match JobConfig::from_value(&job.config) {
            Ok(config) => Some(config),
            Err(e) => {
                report.warnings.push(format!("job config unparseable, using defaults: {e}"));
                None
            }
        };
        let include_non_2xx = job_config.as_ref().map(|c| c.include_non_2xx).unwrap_or(false);
        let auto_dedupe = job_config
            .as_ref()
            .and_then(|c| c.auto_dedupe)
            .unwrap_or(self.config.auto_dedupe);

        let source = self.store.get_source(&job.source_code).await?;
        let output_dir = PathBuf::from(&job.output_dir);

        let artifacts = match discover_artifacts(&output_dir) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                return self.fail(&job, format!("output directory unreadable: {e}"), report).await
            }
        };
        report.warnings.extend(artifacts.warnings.iter().cloned());

        if let Some(reason) = &artifacts.manifest_error {
            return self.fail(&job, format!("manifest unparseable: {reason}"), report).await;
        }
        if artifacts.is_empty() {
            return self.fail(&job, "no WARC files found".to_string(), report).await;
        }

        let warc_files = self.verified_files(&artifacts, &mut report);

        let mut batch: Vec<NewSnapshot> = Vec::new();
        let mut opened_any = false;
        for warc_path in &warc_files {
            let reader = match WarcGzReader::open(warc_path) {
                Ok(reader) => reader,
                Err(e) => {
                    if artifacts.location == WarcLocation::Stable {
                        return self.fail(&job, format!("stable WARC unreadable: {e}"), report).await;
                    }
                    report.warnings.push(format!("skipping unreadable WARC: {e}"));
                    continue;
                }
            };
            opened_any = true;

            let rel_path = warc_path
                .strip_prefix(&output_dir)
                .unwrap_or(warc_path)
                .display()
                .to_string();

            for record in reader {
                let record = match record {
                    Ok(record) => record,
                    Err(e) => {
                        // Offsets are unknowable past a broken member; move
                        // on to the next file.
                        report.record_errors += 1;
                        report.warnings.push(format!("WARC read aborted: {e}"));
                        break;
                    }
                };
                report.records_seen += 1;

                match self.snapshot_from_record(&job, source.id, &rel_path, &record, include_non_2xx)
                {
                    RecordOutcome::Snapshot(snapshot) => batch.push(*snapshot),
                    RecordOutcome::Skipped => report.records_skipped += 1,
                    RecordOutcome::Error(reason) => {
                        report.record_errors += 1;
                        warn!(job_id, uri = ?record.target_uri, reason = %reason, "Record skipped");
                    }
                }

                if batch.len() >= WRITE_BATCH_SIZE {
                    self.flush(&mut batch, &mut report).await?;
                }
            }
        }

        if !opened_any {
            return self.fail(&job, "no WARC file could be opened".to_string(), report).await;
        }
        self.flush(&mut batch, &mut report).await?;

        if auto_dedupe {
            let plan = self.store.plan_same_day_dedup(job_id).await?;
            report.deduplicated = self.store.apply_dedup_plan(&plan).await?;
        }

        let indexed_pages = self.store.count_snapshots(job_id).await?;
        self.store
            .update_job_index_result(job_id, indexed_pages, JobStatus::Indexed)
            .await?;
        report.indexed_pages = indexed_pages;

        info!(
            job_id,
            indexed_pages,
            inserted = report.inserted,
            skipped_existing = report.skipped_existing,
            records_skipped = report.records_skipped,
            record_errors = report.record_errors,
            deduplicated = report.deduplicated,
            "Indexing finished"
        );
        Ok(report)
    }

    /// Drop manifest entries that fail size verification; their records
    /// are logged and skipped rather than aborting the job.
    fn verified_files(&self, artifacts: &CrawlArtifacts, report: &mut IndexReport) -> Vec<PathBuf> {
        let Some(manifest) = &artifacts.manifest else {
            return artifacts.warc_files.clone();
        };

        let stable_dir = artifacts
            .warc_files
            .first()
            .and_then(|p| p.parent().map(Path::to_path_buf));
        let Some(stable_dir) = stable_dir else {
            return artifacts.warc_files.clone();
        };

        let verification = verify_manifest(&stable_dir, manifest, VerifyLevel::Size);
        let bad: Vec<&str> = verification
            .entries
            .iter()
            .filter(|e| !e.ok)
            .map(|e| e.stable_name.as_str())
            .collect();
        for entry in verification.entries.iter().filter(|e| !e.ok) {
            report.warnings.push(format!(
                "manifest check failed for {}: {}",
                entry.stable_name,
                entry.problem.as_deref().unwrap_or("unknown")
            ));
        }

        artifacts
            .warc_files
            .iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|name| !bad.contains(&name))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    fn snapshot_from_record(
        &self,
        job: &ArchiveJob,
        source_id: i64,
        rel_warc_path: &str,
        record: &WarcRecord,
        include_non_2xx: bool,
    ) -> RecordOutcome {
        if record.warc_type != "response" {
            return RecordOutcome::Skipped;
        }
        let Some(url) = record.target_uri.clone() else {
            return RecordOutcome::Error("response record has no WARC-Target-URI".to_string());
        };
        let Some(capture_timestamp) = record.warc_date.as_deref().and_then(capture_ts14) else {
            return RecordOutcome::Error("response record has no usable WARC-Date".to_string());
        };

        let Some(response) = parse_http_response(&record.body) else {
            return RecordOutcome::Error("record block is not an HTTP response".to_string());
        };
        if !is_html(response.content_type.as_deref()) {
            return RecordOutcome::Skipped;
        }
        if !include_non_2xx && !(200..300).contains(&(response.status as i64)) {
            return RecordOutcome::Skipped;
        }

        let html = String::from_utf8_lossy(&response.body);
        let page = extract_page(&html, &url);

        let normalized_url = normalize_url(&url);
        let normalized_url_group = url_group(&normalized_url);
        let outlinks = page
            .outlinks
            .iter()
            .map(|target| Outlink {
                target_url: target.clone(),
                target_url_group: url_group(target),
            })
            .collect();

        RecordOutcome::Snapshot(Box::new(NewSnapshot {
            job_id: job.id,
            source_id,
            url,
            normalized_url,
            normalized_url_group,
            capture_timestamp,
            warc_path: rel_warc_path.to_string(),
            warc_record_offset: record.offset as i64,
            warc_record_length: record.length as i64,
            title: page.title,
            text: page.text,
            snippet: page.snippet,
            language: page.language,
            content_hash: page.content_hash,
            is_archived: page.is_archived,
            http_status: Some(response.status as i64),
            content_type: response.content_type,
            outlinks,
        }))
    }

    async fn flush(
        &self,
        batch: &mut Vec<NewSnapshot>,
        report: &mut IndexReport,
    ) -> Result<(), IndexError> {
        if batch.is_empty() {
            return Ok(());
        }
        let outcome = self.store.insert_snapshots(batch).await?;
        report.inserted += outcome.inserted;
        report.skipped_existing += outcome.skipped;
        batch.clear();
        Ok(())
    }

    /// Record a fatal indexing failure and surface it to the caller.
    async fn fail(
        &self,
        job: &ArchiveJob,
        reason: String,
        report: IndexReport,
    ) -> Result<IndexReport, IndexError> {
        warn!(job_id = job.id, reason = %reason, warnings = ?report.warnings, "Indexing failed");
        self.store
            .transition_job(
                job.id,
                JobStatus::Completed,
                JobStatus::IndexFailed,
                TransitionFields {
                    index_error: Some(Some(reason.clone())),
                    index_started_at: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        Err(IndexError::Fatal {
            job_id: job.id,
            reason,
        })
    }
}

enum RecordOutcome {
    Snapshot(Box<NewSnapshot>),
    Skipped,
    Error(String),
}

/// WARC-Date (ISO 8601) to the 14-digit capture timestamp.
fn capture_ts14(warc_date: &str) -> Option<String> {
    let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(warc_date)
        .ok()?
        .with_timezone(&Utc);
    Some(parsed.format("%Y%m%d%H%M%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_timestamp_is_fourteen_digits() {
        assert_eq!(
            capture_ts14("2026-08-01T12:34:56Z").as_deref(),
            Some("20260801123456")
        );
        assert_eq!(
            capture_ts14("2026-08-01T12:34:56-04:00").as_deref(),
            Some("20260801163456")
        );
        assert!(capture_ts14("not a date").is_none());
    }
}
