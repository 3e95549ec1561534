//! Subscription index.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::warn;

use crate::Result;
use crate::database::models::SubscriptionDbModel;
use crate::database::time::now_ms;
use crate::domain::{EventKind, NewSubscription, Subscription};

/// Resolves the subscriptions registered for a (resource, kind) pair.
#[async_trait]
pub trait SubscriptionIndex: Send + Sync {
    async fn list_for(&self, resource_id: i64, kind: EventKind) -> Result<Vec<Subscription>>;

    /// Seed a subscription. The management surface normally owns writes.
    async fn insert(&self, subscription: &NewSubscription) -> Result<i64>;
}

/// SQLx implementation of SubscriptionIndex.
pub struct SqlxSubscriptionIndex {
    pool: SqlitePool,
}

impl SqlxSubscriptionIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionIndex for SqlxSubscriptionIndex {
    async fn list_for(&self, resource_id: i64, kind: EventKind) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionDbModel>(
            "SELECT * FROM subscriptions WHERE resource_id = ? AND kind = ? ORDER BY id",
        )
        .bind(resource_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match row.into_subscription() {
                Ok(sub) => subscriptions.push(sub),
                Err(e) => warn!(
                    subscription_id = id,
                    error = %e,
                    "Skipping subscription with invalid channel configuration"
                ),
            }
        }
        Ok(subscriptions)
    }

    async fn insert(&self, subscription: &NewSubscription) -> Result<i64> {
        let filter = serde_json::to_string(&subscription.filter)?;
        let channels = serde_json::to_string(&subscription.channels)?;

        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (subscriber_id, resource_id, kind, filter, channels, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&subscription.subscriber_id)
        .bind(subscription.resource_id)
        .bind(subscription.kind.as_str())
        .bind(&filter)
        .bind(&channels)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}
