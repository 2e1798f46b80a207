//! Derived aggregates: the `pages` materialization and per-group link
//! signals. Both are rebuilt from scratch on demand and are safe to re-run.

use tracing::info;

use crate::error::Result;
use crate::store::{fmt_ts, Store};

impl Store {
    /// Rebuild the `pages` table: one row per `(source, normalized url
    /// group)` with latest-capture metadata and a capture count.
    /// Deduplicated snapshots do not contribute.
    pub async fn rebuild_pages(&self) -> Result<u64> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM pages").execute(&mut *tx).await?;

        // Latest capture per group, ties broken by id. The sort key pads the
        // id so lexical MAX matches (capture_timestamp, id) order.
        let inserted = sqlx::query(
            r#"
            INSERT INTO pages (source_id, normalized_url_group, latest_snapshot_id,
                               latest_capture_timestamp, latest_url, latest_title, capture_count)
            SELECT s.source_id, s.normalized_url_group, s.id,
                   s.capture_timestamp, s.url, s.title, agg.n
            FROM snapshots s
            JOIN (
                SELECT source_id, normalized_url_group,
                       MAX(capture_timestamp || printf('%012d', id)) AS latest_key,
                       COUNT(*) AS n
                FROM snapshots
                WHERE deduplicated = 0
                GROUP BY source_id, normalized_url_group
            ) agg
              ON agg.source_id = s.source_id
             AND agg.normalized_url_group = s.normalized_url_group
             AND (s.capture_timestamp || printf('%012d', s.id)) = agg.latest_key
            WHERE s.deduplicated = 0
            "#,
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        info!(rows = inserted, "Rebuilt pages aggregate");
        Ok(inserted)
    }

    /// Recompute `page_signals` from the outlink table.
    ///
    /// Outlink count: distinct target groups linked from the group's
    /// snapshots. Inlink count: distinct groups linking to it (self-links
    /// excluded). PageRank stays null; a separate job owns it.
    pub async fn recompute_page_signals(&self) -> Result<u64> {
        let now = fmt_ts(chrono::Utc::now());
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM page_signals").execute(&mut *tx).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO page_signals (source_id, normalized_url_group,
                                      inlink_count, outlink_count, recomputed_at)
            SELECT g.source_id, g.grp,
                   COALESCE(inl.n, 0), COALESCE(outl.n, 0), ?
            FROM (
                SELECT DISTINCT source_id, normalized_url_group AS grp
                FROM snapshots
                WHERE deduplicated = 0
            ) g
            LEFT JOIN (
                SELECT s.source_id, s.normalized_url_group AS grp,
                       COUNT(DISTINCT o.target_url_group) AS n
                FROM snapshot_outlinks o
                JOIN snapshots s ON s.id = o.snapshot_id
                WHERE s.deduplicated = 0
                GROUP BY s.source_id, s.normalized_url_group
            ) outl ON outl.source_id = g.source_id AND outl.grp = g.grp
            LEFT JOIN (
                SELECT o.target_url_group AS grp,
                       COUNT(DISTINCT s.source_id || '|' || s.normalized_url_group) AS n
                FROM snapshot_outlinks o
                JOIN snapshots s ON s.id = o.snapshot_id
                WHERE s.deduplicated = 0 AND s.normalized_url_group <> o.target_url_group
                GROUP BY o.target_url_group
            ) inl ON inl.grp = g.grp
            "#,
        )
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        info!(rows = inserted, "Recomputed page signals");
        Ok(inserted)
    }
}
