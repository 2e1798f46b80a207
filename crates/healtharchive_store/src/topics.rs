//! Topic taxonomy: static tags, many-to-many with snapshots.

use sqlx::Row;

use crate::error::Result;
use crate::models::Topic;
use crate::store::Store;

impl Store {
    /// Insert a topic if its slug is new; returns its id either way.
    pub async fn ensure_topic(&self, slug: &str, label: &str) -> Result<i64> {
        sqlx::query("INSERT INTO topics (slug, label) VALUES (?, ?) ON CONFLICT(slug) DO NOTHING")
            .bind(slug)
            .bind(label)
            .execute(self.pool())
            .await?;
        let id: i64 = sqlx::query_scalar("SELECT id FROM topics WHERE slug = ?")
            .bind(slug)
            .fetch_one(self.pool())
            .await?;
        Ok(id)
    }

    pub async fn list_topics(&self) -> Result<Vec<Topic>> {
        let rows = sqlx::query("SELECT id, slug, label FROM topics ORDER BY slug")
            .fetch_all(self.pool())
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Topic {
                    id: row.try_get("id")?,
                    slug: row.try_get("slug")?,
                    label: row.try_get("label")?,
                })
            })
            .collect()
    }

    pub async fn tag_snapshot(&self, snapshot_id: i64, topic_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO snapshot_topics (snapshot_id, topic_id) VALUES (?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(snapshot_id)
        .bind(topic_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
