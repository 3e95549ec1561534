//! Tracked resource registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::models::TrackedResourceDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::{datetime_to_ms, now_ms};
use crate::domain::{ShardKey, TrackedResource};
use crate::{Error, Result};

/// Tracked resources plus polling health bookkeeping.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    /// Resources due in this invocation: healthy resources in `shard`, plus
    /// failing resources (above `error_ceiling`) last polled before `cooldown_cutoff`.
    async fn list_due(
        &self,
        shard: ShardKey,
        error_ceiling: i32,
        cooldown_cutoff: DateTime<Utc>,
    ) -> Result<Vec<TrackedResource>>;

    /// Record a poll attempt: success resets the error streak, failure extends it.
    async fn record_outcome(&self, resource_id: i64, success: bool, now: DateTime<Utc>)
    -> Result<()>;

    /// Return the resource for `owner/name`, creating it if needed.
    async fn ensure_resource(&self, owner: &str, name: &str) -> Result<TrackedResource>;

    async fn get(&self, id: i64) -> Result<TrackedResource>;
}

/// SQLx implementation of ResourceRegistry.
pub struct SqlxResourceRegistry {
    pool: SqlitePool,
}

impl SqlxResourceRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceRegistry for SqlxResourceRegistry {
    async fn list_due(
        &self,
        shard: ShardKey,
        error_ceiling: i32,
        cooldown_cutoff: DateTime<Utc>,
    ) -> Result<Vec<TrackedResource>> {
        let rows = sqlx::query_as::<_, TrackedResourceDbModel>(
            r#"
            SELECT * FROM tracked_resources
            WHERE (consecutive_errors <= ? AND (id % ?) = ?)
               OR (consecutive_errors > ? AND (last_polled_at IS NULL OR last_polled_at < ?))
            ORDER BY id
            "#,
        )
        .bind(error_ceiling)
        .bind(shard.count)
        .bind(shard.index)
        .bind(error_ceiling)
        .bind(datetime_to_ms(cooldown_cutoff))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TrackedResource::from).collect())
    }

    async fn record_outcome(
        &self,
        resource_id: i64,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let sql = if success {
            "UPDATE tracked_resources SET consecutive_errors = 0, last_polled_at = ? WHERE id = ?"
        } else {
            "UPDATE tracked_resources SET consecutive_errors = consecutive_errors + 1, last_polled_at = ? WHERE id = ?"
        };

        retry_on_sqlite_busy("record_outcome", || async {
            let result = sqlx::query(sql)
                .bind(datetime_to_ms(now))
                .bind(resource_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(Error::not_found("TrackedResource", resource_id.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn ensure_resource(&self, owner: &str, name: &str) -> Result<TrackedResource> {
        let valid = |part: &str| !part.trim().is_empty() && !part.contains('/');
        if !valid(owner) || !valid(name) {
            return Err(Error::validation(format!(
                "invalid repository {owner:?}/{name:?}"
            )));
        }

        sqlx::query(
            "INSERT OR IGNORE INTO tracked_resources (owner, name, created_at) VALUES (?, ?, ?)",
        )
        .bind(owner)
        .bind(name)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, TrackedResourceDbModel>(
            "SELECT * FROM tracked_resources WHERE owner = ? AND name = ?",
        )
        .bind(owner)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get(&self, id: i64) -> Result<TrackedResource> {
        sqlx::query_as::<_, TrackedResourceDbModel>("SELECT * FROM tracked_resources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(TrackedResource::from)
            .ok_or_else(|| Error::not_found("TrackedResource", id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;

    #[tokio::test]
    async fn test_ensure_resource_is_idempotent() {
        let registry = SqlxResourceRegistry::new(test_pool().await);

        let first = registry.ensure_resource("acme", "widget").await.unwrap();
        let second = registry.ensure_resource("acme", "widget").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.consecutive_errors, 0);
        assert!(first.last_polled_at.is_none());
    }

    #[tokio::test]
    async fn test_ensure_resource_rejects_malformed_names() {
        let registry = SqlxResourceRegistry::new(test_pool().await);
        for (owner, name) in [("", "widget"), ("acme", " "), ("acme", "widget/extra")] {
            assert!(matches!(
                registry.ensure_resource(owner, name).await,
                Err(Error::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_record_outcome_updates_health() {
        let registry = SqlxResourceRegistry::new(test_pool().await);
        let resource = registry.ensure_resource("acme", "widget").await.unwrap();
        let now = Utc::now();

        registry.record_outcome(resource.id, false, now).await.unwrap();
        registry.record_outcome(resource.id, false, now).await.unwrap();
        let failing = registry.get(resource.id).await.unwrap();
        assert_eq!(failing.consecutive_errors, 2);
        assert_eq!(
            failing.last_polled_at.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );

        registry.record_outcome(resource.id, true, now).await.unwrap();
        assert_eq!(registry.get(resource.id).await.unwrap().consecutive_errors, 0);
    }

    #[tokio::test]
    async fn test_record_outcome_unknown_resource() {
        let registry = SqlxResourceRegistry::new(test_pool().await);
        let err = registry.record_outcome(999, true, Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_due_shards_and_reprobes_failing() {
        let registry = SqlxResourceRegistry::new(test_pool().await);
        let now = Utc::now();
        let mut ids = Vec::new();
        for name in ["a", "b", "c", "d"] {
            ids.push(registry.ensure_resource("acme", name).await.unwrap().id);
        }

        let shard = ShardKey {
            index: ids[0].rem_euclid(2),
            count: 2,
        };
        let due = registry.list_due(shard, 3, now).await.unwrap();
        let due_ids: Vec<i64> = due.iter().map(|r| r.id).collect();
        assert_eq!(due_ids, vec![ids[0], ids[2]]);

        // Push `b` above the ceiling; it leaves its shard and is re-probed only
        // once its last poll is older than the cutoff.
        for _ in 0..4 {
            registry.record_outcome(ids[1], false, now).await.unwrap();
        }
        let other_shard = ShardKey {
            index: ids[1].rem_euclid(2),
            count: 2,
        };
        let due = registry.list_due(other_shard, 3, now).await.unwrap();
        assert_eq!(due.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[3]]);

        let later = now + chrono::Duration::hours(2);
        let due = registry.list_due(shard, 3, later).await.unwrap();
        let due_ids: Vec<i64> = due.iter().map(|r| r.id).collect();
        assert_eq!(due_ids, vec![ids[0], ids[1], ids[2]]);
    }
}
