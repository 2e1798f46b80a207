//! Row types for the archive store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job status (matches the database CHECK constraint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Retryable,
    Indexed,
    IndexFailed,
    InfraError,
    InfraErrorConfig,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retryable => "retryable",
            Self::Indexed => "indexed",
            Self::IndexFailed => "index_failed",
            Self::InfraError => "infra_error",
            Self::InfraErrorConfig => "infra_error_config",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "retryable" => Some(Self::Retryable),
            "indexed" => Some(Self::Indexed),
            "index_failed" => Some(Self::IndexFailed),
            "infra_error" => Some(Self::InfraError),
            "infra_error_config" => Some(Self::InfraErrorConfig),
            _ => None,
        }
    }

    /// Terminal states need operator action (or nothing at all) to leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::Indexed | Self::InfraErrorConfig
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crawler outcome summary stored on the job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlerStatus {
    Ok,
    InfraError,
    InfraErrorConfig,
    Timeout,
    Other,
}

impl CrawlerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InfraError => "infra_error",
            Self::InfraErrorConfig => "infra_error_config",
            Self::Timeout => "timeout",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "infra_error" => Some(Self::InfraError),
            "infra_error_config" => Some(Self::InfraErrorConfig),
            "timeout" => Some(Self::Timeout),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Per-job temp cleanup state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    None,
    TempCleaned,
}

impl CleanupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::TempCleaned => "temp_cleaned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "temp_cleaned" => Some(Self::TempCleaned),
            _ => None,
        }
    }
}

/// A logical content origin (e.g. `hc`, `phac`).
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: i64,
    pub code: String,
    pub label: String,
    pub base_url: Option<String>,
    /// Seconds added to `queued_at` at job creation so that same-instant
    /// batch creation still yields a deterministic pick order.
    pub stagger_offset_seconds: i64,
}

/// One crawl attempt for one source.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveJob {
    pub id: i64,
    pub source_code: String,
    pub name: String,
    pub output_dir: String,
    pub status: JobStatus,
    /// Opaque structured payload; parsed into a typed config at every
    /// ingress point. Single source of truth for the crawler command line.
    pub config: serde_json::Value,
    pub retry_count: i64,
    pub max_retries: i64,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cleaned_at: Option<DateTime<Utc>>,
    pub index_started_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub crawler_exit_code: Option<i64>,
    pub crawler_status: Option<CrawlerStatus>,
    pub combined_log_path: Option<String>,
    pub cleanup_status: CleanupStatus,
    pub warc_file_count: Option<i64>,
    pub indexed_pages: Option<i64>,
    /// Reason recorded when indexing last ended in `index_failed`.
    pub index_error: Option<String>,
    pub campaign_kind: Option<String>,
    pub campaign_year: Option<i64>,
}

/// A single captured page, ready for insertion.
///
/// `capture_timestamp` is the 14-digit `YYYYMMDDhhmmss` UTC form used in
/// replay URLs; `(job_id, url, capture_timestamp)` is the idempotence key.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub job_id: i64,
    pub source_id: i64,
    pub url: String,
    pub normalized_url: String,
    pub normalized_url_group: String,
    pub capture_timestamp: String,
    pub warc_path: String,
    pub warc_record_offset: i64,
    pub warc_record_length: i64,
    pub title: Option<String>,
    pub text: String,
    pub snippet: String,
    pub language: Option<String>,
    pub content_hash: String,
    pub is_archived: Option<bool>,
    pub http_status: Option<i64>,
    pub content_type: Option<String>,
    /// Outbound links discovered on the page, absolutized.
    pub outlinks: Vec<Outlink>,
}

/// A stored snapshot row.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub id: i64,
    pub job_id: i64,
    pub source_id: i64,
    pub url: String,
    pub normalized_url: String,
    pub normalized_url_group: String,
    pub capture_timestamp: String,
    pub warc_path: String,
    pub warc_record_offset: i64,
    pub warc_record_length: i64,
    pub title: Option<String>,
    pub text: String,
    pub snippet: String,
    pub language: Option<String>,
    pub content_hash: String,
    pub is_archived: Option<bool>,
    pub deduplicated: bool,
    pub http_status: Option<i64>,
    pub content_type: Option<String>,
}

/// An outbound link extracted from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outlink {
    pub target_url: String,
    pub target_url_group: String,
}

/// Tag with slug and label; many-to-many with snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct Topic {
    pub id: i64,
    pub slug: String,
    pub label: String,
}

/// Input for job creation.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub source_code: String,
    pub name: String,
    pub output_dir: String,
    pub config: serde_json::Value,
    pub max_retries: i64,
    pub campaign_kind: Option<String>,
    pub campaign_year: Option<i64>,
}

/// Filter for job listings and picks.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub source_code: Option<String>,
    /// Restrict eligibility to a campaign kind (e.g. annual-only workers).
    pub campaign_kind: Option<String>,
    pub limit: Option<i64>,
}

/// Job counts grouped by status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub retryable: i64,
    pub indexed: i64,
    pub index_failed: i64,
    pub infra_error: i64,
    pub infra_error_config: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.queued
            + self.running
            + self.completed
            + self.failed
            + self.retryable
            + self.indexed
            + self.index_failed
            + self.infra_error
            + self.infra_error_config
    }
}

/// Fields settable alongside a status transition.
///
/// Only `Some` fields are written; the transition itself is compare-and-set
/// on the expected status.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub index_started_at: Option<Option<DateTime<Utc>>>,
    pub cooldown_until: Option<Option<DateTime<Utc>>>,
    pub retry_count: Option<i64>,
    pub crawler_exit_code: Option<i64>,
    pub crawler_status: Option<CrawlerStatus>,
    pub combined_log_path: Option<String>,
    pub warc_file_count: Option<i64>,
    pub indexed_pages: Option<i64>,
    pub index_error: Option<Option<String>>,
}
