//! Snapshot writes and reads.
//!
//! Inserts are idempotent on `(job_id, url, capture_timestamp)`: conflicts
//! are skipped silently so partial re-indexes converge instead of failing.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use crate::error::Result;
use crate::models::{NewSnapshot, Snapshot};
use crate::store::{fmt_ts, Store};

/// Rows per insert transaction.
pub const INSERT_BATCH_SIZE: usize = 500;

/// Result of a batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    /// Rows skipped because an identical capture already existed.
    pub skipped: usize,
}

impl Store {
    /// Insert a batch of snapshots, populating the search table and the
    /// outlink rows for every row that actually lands.
    pub async fn insert_snapshots(&self, batch: &[NewSnapshot]) -> Result<InsertOutcome> {
        let mut outcome = InsertOutcome::default();

        for chunk in batch.chunks(INSERT_BATCH_SIZE) {
            let mut tx = self.pool().begin().await?;

            for snapshot in chunk {
                let created_at = fmt_ts(chrono::Utc::now());
                let inserted_id: Option<i64> = sqlx::query_scalar(
                    r#"
                    INSERT INTO snapshots
                        (job_id, source_id, url, normalized_url, normalized_url_group,
                         capture_timestamp, warc_path, warc_record_offset, warc_record_length,
                         title, text, snippet, language, content_hash, is_archived,
                         http_status, content_type, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(job_id, url, capture_timestamp) DO NOTHING
                    RETURNING id
                    "#,
                )
                .bind(snapshot.job_id)
                .bind(snapshot.source_id)
                .bind(&snapshot.url)
                .bind(&snapshot.normalized_url)
                .bind(&snapshot.normalized_url_group)
                .bind(&snapshot.capture_timestamp)
                .bind(&snapshot.warc_path)
                .bind(snapshot.warc_record_offset)
                .bind(snapshot.warc_record_length)
                .bind(&snapshot.title)
                .bind(&snapshot.text)
                .bind(&snapshot.snippet)
                .bind(&snapshot.language)
                .bind(&snapshot.content_hash)
                .bind(snapshot.is_archived)
                .bind(snapshot.http_status)
                .bind(&snapshot.content_type)
                .bind(&created_at)
                .fetch_optional(&mut *tx)
                .await?;

                let Some(snapshot_id) = inserted_id else {
                    outcome.skipped += 1;
                    continue;
                };
                outcome.inserted += 1;

                sqlx::query(
                    r#"
                    INSERT INTO snapshot_search (rowid, title, snippet, url_tokens, body)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(snapshot_id)
                .bind(snapshot.title.as_deref().unwrap_or(""))
                .bind(&snapshot.snippet)
                .bind(url_tokens(&snapshot.normalized_url))
                .bind(&snapshot.text)
                .execute(&mut *tx)
                .await?;

                for outlink in &snapshot.outlinks {
                    sqlx::query(
                        r#"
                        INSERT INTO snapshot_outlinks (snapshot_id, target_url, target_url_group)
                        VALUES (?, ?, ?)
                        "#,
                    )
                    .bind(snapshot_id)
                    .bind(&outlink.target_url)
                    .bind(&outlink.target_url_group)
                    .execute(&mut *tx)
                    .await?;
                }
            }

            tx.commit().await?;
        }

        debug!(
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            "Snapshot batch insert"
        );
        Ok(outcome)
    }

    pub async fn count_snapshots(&self, job_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshots WHERE job_id = ?")
            .bind(job_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    pub async fn get_snapshot(&self, snapshot_id: i64) -> Result<Option<Snapshot>> {
        let row = sqlx::query("SELECT * FROM snapshots WHERE id = ?")
            .bind(snapshot_id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| row_to_snapshot(&r)).transpose()
    }

    /// All snapshots for a job in capture order; used by the dedup pass and
    /// by tests.
    pub async fn list_snapshots_for_job(&self, job_id: i64) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM snapshots WHERE job_id = ? ORDER BY capture_timestamp ASC, id ASC",
        )
        .bind(job_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_snapshot).collect()
    }
}

/// Tokenize a normalized URL for the search table's url field.
pub(crate) fn url_tokens(normalized_url: &str) -> String {
    normalized_url
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| token.len() > 1 && !matches!(*token, "https" | "http" | "www" | "html"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn row_to_snapshot(row: &SqliteRow) -> Result<Snapshot> {
    let is_archived: Option<i64> = row.try_get("is_archived")?;
    let deduplicated: i64 = row.try_get("deduplicated")?;
    Ok(Snapshot {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        source_id: row.try_get("source_id")?,
        url: row.try_get("url")?,
        normalized_url: row.try_get("normalized_url")?,
        normalized_url_group: row.try_get("normalized_url_group")?,
        capture_timestamp: row.try_get("capture_timestamp")?,
        warc_path: row.try_get("warc_path")?,
        warc_record_offset: row.try_get("warc_record_offset")?,
        warc_record_length: row.try_get("warc_record_length")?,
        title: row.try_get("title")?,
        text: row.try_get("text")?,
        snippet: row.try_get("snippet")?,
        language: row.try_get("language")?,
        content_hash: row.try_get("content_hash")?,
        is_archived: is_archived.map(|v| v != 0),
        deduplicated: deduplicated != 0,
        http_status: row.try_get("http_status")?,
        content_type: row.try_get("content_type")?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Outlink;
    use crate::store::tests::{job_request, test_store};

    pub(crate) fn sample_snapshot(job_id: i64, url: &str, ts: &str) -> NewSnapshot {
        NewSnapshot {
            job_id,
            source_id: 1,
            url: url.to_string(),
            normalized_url: url.to_lowercase(),
            normalized_url_group: url.to_lowercase(),
            capture_timestamp: ts.to_string(),
            warc_path: "warcs/hc-20260801.warc.gz".to_string(),
            warc_record_offset: 0,
            warc_record_length: 512,
            title: Some("Food recalls".to_string()),
            text: "Recent food recall warnings and allergy alerts.".to_string(),
            snippet: "Recent food recall warnings".to_string(),
            language: Some("eng".to_string()),
            content_hash: "abc123".to_string(),
            is_archived: None,
            http_status: Some(200),
            content_type: Some("text/html".to_string()),
            outlinks: vec![Outlink {
                target_url: "https://www.canada.ca/en/services/health.html".to_string(),
                target_url_group: "https://www.canada.ca/en/services/health.html".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_capture_key() {
        let store = test_store().await;
        let job_id = store.create_job(job_request("hc", "hc-20260801")).await.unwrap();

        let batch = vec![
            sample_snapshot(job_id, "https://example.ca/a", "20260801120000"),
            sample_snapshot(job_id, "https://example.ca/b", "20260801120001"),
        ];
        let first = store.insert_snapshots(&batch).await.unwrap();
        assert_eq!(first, InsertOutcome { inserted: 2, skipped: 0 });

        // Re-indexing the same records produces zero new rows.
        let second = store.insert_snapshots(&batch).await.unwrap();
        assert_eq!(second, InsertOutcome { inserted: 0, skipped: 2 });
        assert_eq!(store.count_snapshots(job_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn outlinks_written_only_for_new_rows() {
        let store = test_store().await;
        let job_id = store.create_job(job_request("hc", "hc-20260801")).await.unwrap();

        let batch = vec![sample_snapshot(job_id, "https://example.ca/a", "20260801120000")];
        store.insert_snapshots(&batch).await.unwrap();
        store.insert_snapshots(&batch).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshot_outlinks")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn search_rows_mirror_snapshot_ids() {
        let store = test_store().await;
        let job_id = store.create_job(job_request("hc", "hc-20260801")).await.unwrap();
        store
            .insert_snapshots(&[sample_snapshot(job_id, "https://example.ca/a", "20260801120000")])
            .await
            .unwrap();

        let hits: Vec<i64> =
            sqlx::query_scalar("SELECT rowid FROM snapshot_search WHERE snapshot_search MATCH ?")
                .bind("recall")
                .fetch_all(store.pool())
                .await
                .unwrap();
        let snapshots = store.list_snapshots_for_job(job_id).await.unwrap();
        assert_eq!(hits, vec![snapshots[0].id]);
    }

    #[test]
    fn url_tokens_drop_noise() {
        let tokens = url_tokens("https://www.canada.ca/en/health-canada/services/food.html");
        assert_eq!(tokens, "canada ca en health canada services food");
    }
}
