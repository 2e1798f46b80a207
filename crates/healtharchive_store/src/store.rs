//! SQLite-backed store: sources and job lifecycle.
//!
//! Every status change goes through [`Store::transition_job`], a
//! compare-and-set UPDATE. The worker loop and the watchdogs are the only
//! writers; CAS keeps them from trampling each other.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::models::{
    ArchiveJob, CleanupStatus, CrawlerStatus, JobFilter, JobStatus, NewJob, Source, StatusCounts,
    TransitionFields,
};
use crate::schema::SCHEMA_SQL;

/// Connection-level timeout; exceeding it surfaces as `Unavailable`.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Sources seeded by `seed-sources`, with stagger offsets so that jobs
/// created in the same batch pick in a fixed order.
pub const DEFAULT_SOURCES: &[(&str, &str, &str, i64)] = &[
    ("hc", "Health Canada", "https://www.canada.ca/en/health-canada.html", 0),
    (
        "phac",
        "Public Health Agency of Canada",
        "https://www.canada.ca/en/public-health.html",
        1,
    ),
    ("cihr", "Canadian Institutes of Health Research", "https://cihr-irsc.gc.ca/", 2),
];

/// Fixed-width RFC 3339 UTC so lexical order matches chronological order.
pub fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRow(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(&s)).transpose()
}

/// Handle to the archive database.
///
/// Cheap to clone; each component owns its own handle (no process-global
/// session state).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (and bootstrap) the store at a `sqlite:` URL or plain path.
    pub async fn open(database_url: &str) -> Result<Self> {
        let trimmed = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{trimmed}"))
            .map_err(StoreError::from)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(ACQUIRE_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(StoreError::from)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    /// Seed the default source rows; existing codes are left untouched.
    pub async fn seed_sources(&self) -> Result<usize> {
        let mut seeded = 0;
        for (code, label, base_url, stagger) in DEFAULT_SOURCES {
            let now = fmt_ts(Utc::now());
            let result = sqlx::query(
                r#"
                INSERT INTO sources (code, label, base_url, stagger_offset_seconds, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(code) DO NOTHING
                "#,
            )
            .bind(code)
            .bind(label)
            .bind(base_url)
            .bind(stagger)
            .bind(&now)
            .execute(&self.pool)
            .await?;
            seeded += result.rows_affected() as usize;
        }
        info!("Seeded {} source rows", seeded);
        Ok(seeded)
    }

    pub async fn get_source(&self, code: &str) -> Result<Source> {
        let row = sqlx::query(
            "SELECT id, code, label, base_url, stagger_offset_seconds FROM sources WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| StoreError::SourceNotFound(code.to_string()))?;
        Ok(Source {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            label: row.try_get("label")?,
            base_url: row.try_get("base_url")?,
            stagger_offset_seconds: row.try_get("stagger_offset_seconds")?,
        })
    }

    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            "SELECT id, code, label, base_url, stagger_offset_seconds FROM sources ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Source {
                    id: row.try_get("id")?,
                    code: row.try_get("code")?,
                    label: row.try_get("label")?,
                    base_url: row.try_get("base_url")?,
                    stagger_offset_seconds: row.try_get("stagger_offset_seconds")?,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Job lifecycle
    // ------------------------------------------------------------------

    /// Insert a `queued` job row.
    ///
    /// `queued_at` carries the source's stagger offset so same-instant batch
    /// creation still yields a deterministic pick order. Name and output-dir
    /// collisions surface as `DuplicateName`.
    pub async fn create_job(&self, new_job: NewJob) -> Result<i64> {
        let source = self.get_source(&new_job.source_code).await?;
        let queued_at = Utc::now() + chrono::Duration::seconds(source.stagger_offset_seconds);

        let config_text = serde_json::to_string(&new_job.config)
            .map_err(|e| StoreError::InvalidRow(format!("config not serializable: {e}")))?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO archive_jobs
                (source_code, name, output_dir, status, config, max_retries,
                 queued_at, campaign_kind, campaign_year)
            VALUES (?, ?, ?, 'queued', ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&new_job.source_code)
        .bind(&new_job.name)
        .bind(&new_job.output_dir)
        .bind(&config_text)
        .bind(new_job.max_retries)
        .bind(fmt_ts(queued_at))
        .bind(&new_job.campaign_kind)
        .bind(new_job.campaign_year)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, &new_job.name))?;

        info!(job_id = id, name = %new_job.name, "Created job");
        Ok(id)
    }

    pub async fn get_job(&self, job_id: i64) -> Result<ArchiveJob> {
        let row = sqlx::query("SELECT * FROM archive_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        let row = row.ok_or(StoreError::JobNotFound(job_id))?;
        row_to_job(&row)
    }

    pub async fn get_job_by_name(&self, name: &str) -> Result<Option<ArchiveJob>> {
        let row = sqlx::query("SELECT * FROM archive_jobs WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    /// Return the next eligible job without claiming it.
    ///
    /// Eligible: `queued` or `retryable`, past any infra cooldown, matching
    /// the filter. Order is `(queued_at ASC, id ASC)` and therefore
    /// deterministic. Claiming is the caller's CAS transition to `running`.
    pub async fn pick_next_job(&self, filter: &JobFilter) -> Result<Option<ArchiveJob>> {
        let now = fmt_ts(Utc::now());
        let mut qb = QueryBuilder::new(
            "SELECT * FROM archive_jobs \
             WHERE status IN ('queued', 'retryable') \
             AND (cooldown_until IS NULL OR cooldown_until <= ",
        );
        qb.push_bind(&now);
        qb.push(")");
        if let Some(kind) = &filter.campaign_kind {
            qb.push(" AND campaign_kind = ");
            qb.push_bind(kind);
        }
        if let Some(source) = &filter.source_code {
            qb.push(" AND source_code = ");
            qb.push_bind(source);
        }
        qb.push(" ORDER BY queued_at ASC, id ASC LIMIT 1");

        let row = qb.build().fetch_optional(&self.pool).await?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    /// Compare-and-set status transition.
    ///
    /// Fails with `StaleTransition` when the row is no longer in
    /// `expected`; the caller decides whether the world has moved.
    pub async fn transition_job(
        &self,
        job_id: i64,
        expected: JobStatus,
        new_status: JobStatus,
        fields: TransitionFields,
    ) -> Result<()> {
        let mut qb = QueryBuilder::new("UPDATE archive_jobs SET status = ");
        qb.push_bind(new_status.as_str());

        if let Some(ts) = fields.started_at {
            qb.push(", started_at = ");
            qb.push_bind(fmt_ts(ts));
            // A fresh run invalidates the previous attempt's end state.
            qb.push(", finished_at = NULL");
        }
        if let Some(ts) = fields.finished_at {
            qb.push(", finished_at = ");
            qb.push_bind(fmt_ts(ts));
        }
        if let Some(opt) = fields.index_started_at {
            qb.push(", index_started_at = ");
            qb.push_bind(opt.map(fmt_ts));
        }
        if let Some(opt) = fields.cooldown_until {
            qb.push(", cooldown_until = ");
            qb.push_bind(opt.map(fmt_ts));
        }
        if let Some(count) = fields.retry_count {
            qb.push(", retry_count = ");
            qb.push_bind(count);
        }
        if let Some(code) = fields.crawler_exit_code {
            qb.push(", crawler_exit_code = ");
            qb.push_bind(code);
        }
        if let Some(status) = fields.crawler_status {
            qb.push(", crawler_status = ");
            qb.push_bind(status.as_str());
        }
        if let Some(path) = &fields.combined_log_path {
            qb.push(", combined_log_path = ");
            qb.push_bind(path);
        }
        if let Some(count) = fields.warc_file_count {
            qb.push(", warc_file_count = ");
            qb.push_bind(count);
        }
        if let Some(count) = fields.indexed_pages {
            qb.push(", indexed_pages = ");
            qb.push_bind(count);
        }
        if let Some(opt) = &fields.index_error {
            qb.push(", index_error = ");
            qb.push_bind(opt.clone());
        }

        qb.push(" WHERE id = ");
        qb.push_bind(job_id);
        qb.push(" AND status = ");
        qb.push_bind(expected.as_str());

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            let actual: Option<String> =
                sqlx::query_scalar("SELECT status FROM archive_jobs WHERE id = ?")
                    .bind(job_id)
                    .fetch_optional(&self.pool)
                    .await?;
            return match actual {
                None => Err(StoreError::JobNotFound(job_id)),
                Some(actual) => Err(StoreError::StaleTransition {
                    job_id,
                    expected: expected.as_str().to_string(),
                    actual,
                }),
            };
        }

        debug!(job_id, from = %expected, to = %new_status, "Job transition");
        Ok(())
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<ArchiveJob>> {
        let mut qb = QueryBuilder::new("SELECT * FROM archive_jobs WHERE 1 = 1");
        if let Some(status) = filter.status {
            qb.push(" AND status = ");
            qb.push_bind(status.as_str());
        }
        if let Some(source) = &filter.source_code {
            qb.push(" AND source_code = ");
            qb.push_bind(source);
        }
        if let Some(kind) = &filter.campaign_kind {
            qb.push(" AND campaign_kind = ");
            qb.push_bind(kind);
        }
        qb.push(" ORDER BY id DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_job).collect()
    }

    /// Jobs currently in `running`, oldest start first.
    pub async fn list_running_jobs(&self) -> Result<Vec<ArchiveJob>> {
        let rows =
            sqlx::query("SELECT * FROM archive_jobs WHERE status = 'running' ORDER BY started_at")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_job).collect()
    }

    pub async fn count_by_status(&self) -> Result<StatusCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM archive_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match JobStatus::parse(&status) {
                Some(JobStatus::Queued) => counts.queued = n,
                Some(JobStatus::Running) => counts.running = n,
                Some(JobStatus::Completed) => counts.completed = n,
                Some(JobStatus::Failed) => counts.failed = n,
                Some(JobStatus::Retryable) => counts.retryable = n,
                Some(JobStatus::Indexed) => counts.indexed = n,
                Some(JobStatus::IndexFailed) => counts.index_failed = n,
                Some(JobStatus::InfraError) => counts.infra_error = n,
                Some(JobStatus::InfraErrorConfig) => counts.infra_error_config = n,
                None => return Err(StoreError::InvalidRow(format!("unknown status {status:?}"))),
            }
        }
        Ok(counts)
    }

    /// Finalize an indexing run: CAS from `completed`, record the page count
    /// and clear the in-progress marker.
    pub async fn update_job_index_result(
        &self,
        job_id: i64,
        indexed_pages: i64,
        new_status: JobStatus,
    ) -> Result<()> {
        self.transition_job(
            job_id,
            JobStatus::Completed,
            new_status,
            TransitionFields {
                indexed_pages: Some(indexed_pages),
                index_started_at: Some(None),
                index_error: Some(None),
                ..Default::default()
            },
        )
        .await
    }

    /// Replace a job's stored config payload (operator patch path).
    pub async fn update_job_config(&self, job_id: i64, config: &serde_json::Value) -> Result<()> {
        let config_text = serde_json::to_string(config)
            .map_err(|e| StoreError::InvalidRow(format!("config not serializable: {e}")))?;
        let result = sqlx::query("UPDATE archive_jobs SET config = ? WHERE id = ?")
            .bind(&config_text)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(())
    }

    pub async fn reset_retry_count(&self, job_id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE archive_jobs SET retry_count = 0 WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(())
    }

    /// Record a completed temp cleanup.
    pub async fn mark_temp_cleaned(&self, job_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE archive_jobs SET cleanup_status = 'temp_cleaned', cleaned_at = ? WHERE id = ?",
        )
        .bind(fmt_ts(Utc::now()))
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(())
    }

    /// Mark that an indexing pass has begun on a `completed` job.
    ///
    /// Idempotent; the marker is cleared by `update_job_index_result`. A
    /// crash mid-index leaves the job `completed` and re-indexable.
    pub async fn mark_index_started(&self, job_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE archive_jobs SET index_started_at = ? WHERE id = ? AND status = 'completed'",
        )
        .bind(fmt_ts(Utc::now()))
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            let job = self.get_job(job_id).await?;
            return Err(StoreError::StaleTransition {
                job_id,
                expected: JobStatus::Completed.as_str().to_string(),
                actual: job.status.as_str().to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) fn row_to_job(row: &SqliteRow) -> Result<ArchiveJob> {
    let status_raw: String = row.try_get("status")?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::InvalidRow(format!("unknown status {status_raw:?}")))?;

    let crawler_status_raw: Option<String> = row.try_get("crawler_status")?;
    let crawler_status = match crawler_status_raw {
        None => None,
        Some(raw) => Some(
            CrawlerStatus::parse(&raw)
                .ok_or_else(|| StoreError::InvalidRow(format!("unknown crawler status {raw:?}")))?,
        ),
    };

    let cleanup_raw: String = row.try_get("cleanup_status")?;
    let cleanup_status = CleanupStatus::parse(&cleanup_raw)
        .ok_or_else(|| StoreError::InvalidRow(format!("unknown cleanup status {cleanup_raw:?}")))?;

    let config_raw: String = row.try_get("config")?;
    let config = serde_json::from_str(&config_raw)
        .map_err(|e| StoreError::InvalidRow(format!("bad config JSON: {e}")))?;

    let queued_at_raw: String = row.try_get("queued_at")?;

    Ok(ArchiveJob {
        id: row.try_get("id")?,
        source_code: row.try_get("source_code")?,
        name: row.try_get("name")?,
        output_dir: row.try_get("output_dir")?,
        status,
        config,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        queued_at: parse_ts(&queued_at_raw)?,
        started_at: parse_opt_ts(row.try_get("started_at")?)?,
        finished_at: parse_opt_ts(row.try_get("finished_at")?)?,
        cleaned_at: parse_opt_ts(row.try_get("cleaned_at")?)?,
        index_started_at: parse_opt_ts(row.try_get("index_started_at")?)?,
        cooldown_until: parse_opt_ts(row.try_get("cooldown_until")?)?,
        crawler_exit_code: row.try_get("crawler_exit_code")?,
        crawler_status,
        combined_log_path: row.try_get("combined_log_path")?,
        cleanup_status,
        warc_file_count: row.try_get("warc_file_count")?,
        indexed_pages: row.try_get("indexed_pages")?,
        index_error: row.try_get("index_error")?,
        campaign_kind: row.try_get("campaign_kind")?,
        campaign_year: row.try_get("campaign_year")?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) async fn test_store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store.seed_sources().await.unwrap();
        store
    }

    pub(crate) fn job_request(source: &str, name: &str) -> NewJob {
        NewJob {
            source_code: source.to_string(),
            name: name.to_string(),
            output_dir: format!("/srv/healtharchive/jobs/{name}"),
            config: json!({
                "seeds": ["https://www.canada.ca/en/health-canada.html"],
                "tool_options": {}
            }),
            max_retries: 2,
            campaign_kind: Some("annual".to_string()),
            campaign_year: Some(2026),
        }
    }

    #[tokio::test]
    async fn create_and_get_job() {
        let store = test_store().await;
        let id = store.create_job(job_request("hc", "hc-20260801")).await.unwrap();

        let job = store.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.source_code, "hc");
        assert_eq!(job.retry_count, 0);
        assert!(job.started_at.is_none());
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let store = test_store().await;
        store.create_job(job_request("hc", "hc-20260801")).await.unwrap();

        let mut second = job_request("hc", "hc-20260801");
        second.output_dir = "/srv/healtharchive/jobs/other".to_string();
        let err = store.create_job(second).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(_)), "{err:?}");
    }

    #[tokio::test]
    async fn stagger_offsets_order_same_batch_picks() {
        let store = test_store().await;
        // Created in reverse of the expected pick order.
        let cihr = store.create_job(job_request("cihr", "cihr-20260801")).await.unwrap();
        let phac = store.create_job(job_request("phac", "phac-20260801")).await.unwrap();
        let hc = store.create_job(job_request("hc", "hc-20260801")).await.unwrap();

        let picked = store.pick_next_job(&JobFilter::default()).await.unwrap().unwrap();
        assert_eq!(picked.id, hc, "hc has offset 0 and picks first");

        store
            .transition_job(hc, JobStatus::Queued, JobStatus::Running, TransitionFields {
                started_at: Some(Utc::now()),
                ..Default::default()
            })
            .await
            .unwrap();

        let picked = store.pick_next_job(&JobFilter::default()).await.unwrap().unwrap();
        assert_eq!(picked.id, phac);

        store
            .transition_job(phac, JobStatus::Queued, JobStatus::Running, TransitionFields {
                started_at: Some(Utc::now()),
                ..Default::default()
            })
            .await
            .unwrap();

        let picked = store.pick_next_job(&JobFilter::default()).await.unwrap().unwrap();
        assert_eq!(picked.id, cihr);
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = test_store().await;
        let id = store.create_job(job_request("hc", "hc-20260801")).await.unwrap();

        store
            .transition_job(id, JobStatus::Queued, JobStatus::Running, TransitionFields {
                started_at: Some(Utc::now()),
                ..Default::default()
            })
            .await
            .unwrap();

        // Second claim against the stale expectation fails.
        let err = store
            .transition_job(id, JobStatus::Queued, JobStatus::Running, TransitionFields::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaleTransition { .. }), "{err:?}");

        let job = store.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_none());
    }

    #[tokio::test]
    async fn transition_round_trip_restores_prior_state() {
        let store = test_store().await;
        let id = store.create_job(job_request("hc", "hc-20260801")).await.unwrap();

        store
            .transition_job(id, JobStatus::Queued, JobStatus::Retryable, TransitionFields::default())
            .await
            .unwrap();
        store
            .transition_job(id, JobStatus::Retryable, JobStatus::Queued, TransitionFields::default())
            .await
            .unwrap();

        let job = store.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn cooldown_excludes_job_from_pick() {
        let store = test_store().await;
        let id = store.create_job(job_request("hc", "hc-20260801")).await.unwrap();

        store
            .transition_job(id, JobStatus::Queued, JobStatus::Retryable, TransitionFields {
                cooldown_until: Some(Some(Utc::now() + chrono::Duration::seconds(60))),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(store.pick_next_job(&JobFilter::default()).await.unwrap().is_none());

        // An expired cooldown no longer blocks.
        store
            .transition_job(id, JobStatus::Retryable, JobStatus::Retryable, TransitionFields {
                cooldown_until: Some(Some(Utc::now() - chrono::Duration::seconds(1))),
                ..Default::default()
            })
            .await
            .unwrap();
        let picked = store.pick_next_job(&JobFilter::default()).await.unwrap();
        assert_eq!(picked.map(|j| j.id), Some(id));
    }

    #[tokio::test]
    async fn campaign_filter_restricts_pick() {
        let store = test_store().await;
        let mut req = job_request("hc", "hc-adhoc-20260801");
        req.campaign_kind = None;
        store.create_job(req).await.unwrap();

        let filter = JobFilter {
            campaign_kind: Some("annual".to_string()),
            ..Default::default()
        };
        assert!(store.pick_next_job(&filter).await.unwrap().is_none());

        let annual = store.create_job(job_request("hc", "hc-20260802")).await.unwrap();
        let picked = store.pick_next_job(&filter).await.unwrap().unwrap();
        assert_eq!(picked.id, annual);
    }

    #[tokio::test]
    async fn counts_by_status() {
        let store = test_store().await;
        store.create_job(job_request("hc", "hc-20260801")).await.unwrap();
        let id = store.create_job(job_request("phac", "phac-20260801")).await.unwrap();
        store
            .transition_job(id, JobStatus::Queued, JobStatus::Running, TransitionFields {
                started_at: Some(Utc::now()),
                ..Default::default()
            })
            .await
            .unwrap();

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.total(), 2);
    }

    #[tokio::test]
    async fn mark_index_started_requires_completed() {
        let store = test_store().await;
        let id = store.create_job(job_request("hc", "hc-20260801")).await.unwrap();
        let err = store.mark_index_started(id).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleTransition { .. }), "{err:?}");
    }
}
