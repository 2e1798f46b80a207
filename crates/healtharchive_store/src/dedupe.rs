//! Same-day snapshot deduplication.
//!
//! Contract: within one job, rows sharing `(normalized_url,
//! DATE(capture_timestamp), content_hash)` collapse to the earliest capture;
//! the rest are flagged `deduplicated` and recorded in the audit table so
//! the pass can be reversed.

use std::collections::BTreeMap;

use sqlx::Row;
use tracing::info;

use crate::error::Result;
use crate::store::{fmt_ts, Store};

pub const DEDUP_REASON_SAME_DAY: &str = "same_day_duplicate";

/// One group of same-day duplicates.
#[derive(Debug, Clone)]
pub struct DedupGroup {
    pub normalized_url: String,
    pub day: String,
    pub content_hash: String,
    pub canonical_snapshot_id: i64,
    pub duplicate_snapshot_ids: Vec<i64>,
}

/// Outcome of planning (and optionally applying) a dedup pass.
#[derive(Debug, Clone, Default)]
pub struct DedupPlan {
    pub groups: Vec<DedupGroup>,
}

impl DedupPlan {
    pub fn duplicate_count(&self) -> usize {
        self.groups.iter().map(|g| g.duplicate_snapshot_ids.len()).sum()
    }
}

impl Store {
    /// Compute the same-day dedup plan for a job. Read-only.
    pub async fn plan_same_day_dedup(&self, job_id: i64) -> Result<DedupPlan> {
        let rows = sqlx::query(
            r#"
            SELECT id, normalized_url, substr(capture_timestamp, 1, 8) AS day, content_hash
            FROM snapshots
            WHERE job_id = ? AND deduplicated = 0
            ORDER BY capture_timestamp ASC, id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(self.pool())
        .await?;

        let mut groups: BTreeMap<(String, String, String), Vec<i64>> = BTreeMap::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let key = (
                row.try_get::<String, _>("normalized_url")?,
                row.try_get::<String, _>("day")?,
                row.try_get::<String, _>("content_hash")?,
            );
            groups.entry(key).or_default().push(id);
        }

        let plan_groups = groups
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|((normalized_url, day, content_hash), ids)| DedupGroup {
                normalized_url,
                day,
                content_hash,
                canonical_snapshot_id: ids[0],
                duplicate_snapshot_ids: ids[1..].to_vec(),
            })
            .collect();

        Ok(DedupPlan { groups: plan_groups })
    }

    /// Apply a dedup plan: flag duplicates and write audit rows.
    pub async fn apply_dedup_plan(&self, plan: &DedupPlan) -> Result<usize> {
        let now = fmt_ts(chrono::Utc::now());
        let mut flagged = 0;

        let mut tx = self.pool().begin().await?;
        for group in &plan.groups {
            for &dup_id in &group.duplicate_snapshot_ids {
                let updated = sqlx::query(
                    "UPDATE snapshots SET deduplicated = 1 WHERE id = ? AND deduplicated = 0",
                )
                .bind(dup_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
                if updated == 0 {
                    // Already flagged by an earlier pass; the audit row exists.
                    continue;
                }

                sqlx::query(
                    r#"
                    INSERT INTO snapshot_deduplication
                        (deduped_snapshot_id, canonical_snapshot_id, reason, deduped_at)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(dup_id)
                .bind(group.canonical_snapshot_id)
                .bind(DEDUP_REASON_SAME_DAY)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                flagged += 1;
            }
        }
        tx.commit().await?;

        info!(flagged, "Applied same-day dedup");
        Ok(flagged)
    }

    /// Reverse every dedup recorded for a job: clear the flags and drop the
    /// audit rows. Returns the number of snapshots restored.
    pub async fn restore_deduped_snapshots(&self, job_id: i64) -> Result<usize> {
        let mut tx = self.pool().begin().await?;

        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT d.deduped_snapshot_id
            FROM snapshot_deduplication d
            JOIN snapshots s ON s.id = d.deduped_snapshot_id
            WHERE s.job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_all(&mut *tx)
        .await?;

        for &id in &ids {
            sqlx::query("UPDATE snapshots SET deduplicated = 0 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM snapshot_deduplication WHERE deduped_snapshot_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(restored = ids.len(), job_id, "Restored deduplicated snapshots");
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use crate::snapshots::tests::sample_snapshot;
    use crate::store::tests::{job_request, test_store};

    #[tokio::test]
    async fn same_day_same_hash_collapses_to_earliest() {
        let store = test_store().await;
        let job_id = store.create_job(job_request("hc", "hc-20260801")).await.unwrap();

        // Two same-day captures with the same hash, one same-day capture
        // with a different hash, one next-day capture with the same hash.
        let mut batch = vec![
            sample_snapshot(job_id, "https://example.ca/a", "20260801080000"),
            sample_snapshot(job_id, "https://example.ca/a", "20260801200000"),
            sample_snapshot(job_id, "https://example.ca/a", "20260801120000"),
            sample_snapshot(job_id, "https://example.ca/a", "20260802080000"),
        ];
        batch[2].content_hash = "different".to_string();
        store.insert_snapshots(&batch).await.unwrap();

        let plan = store.plan_same_day_dedup(job_id).await.unwrap();
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.duplicate_count(), 1);

        let flagged = store.apply_dedup_plan(&plan).await.unwrap();
        assert_eq!(flagged, 1);

        let snapshots = store.list_snapshots_for_job(job_id).await.unwrap();
        let deduped: Vec<_> = snapshots.iter().filter(|s| s.deduplicated).collect();
        assert_eq!(deduped.len(), 1);
        // The later capture of the identical pair is the one flagged.
        assert_eq!(deduped[0].capture_timestamp, "20260801200000");
    }

    #[tokio::test]
    async fn apply_then_restore_round_trips() {
        let store = test_store().await;
        let job_id = store.create_job(job_request("hc", "hc-20260801")).await.unwrap();

        store
            .insert_snapshots(&[
                sample_snapshot(job_id, "https://example.ca/a", "20260801080000"),
                sample_snapshot(job_id, "https://example.ca/a", "20260801200000"),
            ])
            .await
            .unwrap();

        let plan = store.plan_same_day_dedup(job_id).await.unwrap();
        store.apply_dedup_plan(&plan).await.unwrap();

        let restored = store.restore_deduped_snapshots(job_id).await.unwrap();
        assert_eq!(restored, 1);
        let snapshots = store.list_snapshots_for_job(job_id).await.unwrap();
        assert!(snapshots.iter().all(|s| !s.deduplicated));

        // Audit table is empty again; a second restore is a no-op.
        assert_eq!(store.restore_deduped_snapshots(job_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let store = test_store().await;
        let job_id = store.create_job(job_request("hc", "hc-20260801")).await.unwrap();
        store
            .insert_snapshots(&[
                sample_snapshot(job_id, "https://example.ca/a", "20260801080000"),
                sample_snapshot(job_id, "https://example.ca/a", "20260801200000"),
            ])
            .await
            .unwrap();

        let plan = store.plan_same_day_dedup(job_id).await.unwrap();
        assert_eq!(store.apply_dedup_plan(&plan).await.unwrap(), 1);
        assert_eq!(store.apply_dedup_plan(&plan).await.unwrap(), 0);
    }
}
