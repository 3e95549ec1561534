//! Notification repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::models::NotificationDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::datetime_to_ms;
use crate::domain::{ChannelTarget, DeliveryStatus, Notification};
use crate::{Error, Result};

/// Filters for notification status/history queries.
#[derive(Debug, Clone)]
pub struct NotificationQuery {
    pub status: Option<DeliveryStatus>,
    pub subscription_id: Option<i64>,
    pub event_id: Option<i64>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for NotificationQuery {
    fn default() -> Self {
        Self {
            status: None,
            subscription_id: None,
            event_id: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// Notification repository trait.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Create a queued notification. Returns `Ok(None)` when the
    /// `(event, subscription, channel)` triple already exists.
    async fn create_queued(
        &self,
        event_id: i64,
        subscription_id: i64,
        channel: &ChannelTarget,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>>;

    /// Record a successful attempt. Returns `false` if the row was not in an
    /// attemptable status.
    async fn mark_sent(&self, id: i64, now: DateTime<Utc>) -> Result<bool>;

    /// Record a failed attempt. Returns `false` if the row was not in an
    /// attemptable status.
    async fn mark_error(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Notifications below `max_attempts` that are due for another attempt:
    /// `error` rows whose last failure is older than `cutoff`, and `queued`
    /// rows created before `cutoff` whose first attempt never got recorded.
    /// Oldest first.
    async fn list_retryable(
        &self,
        max_attempts: i32,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Notification>>;

    async fn get(&self, id: i64) -> Result<Notification>;

    async fn list(&self, query: &NotificationQuery) -> Result<Vec<Notification>>;
}

/// SQLx implementation of NotificationRepository.
pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn create_queued(
        &self,
        event_id: i64,
        subscription_id: i64,
        channel: &ChannelTarget,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let channel_json = channel.to_json()?;

        let result = retry_on_sqlite_busy("create_notification", || async {
            let result = sqlx::query(
                r#"
                INSERT INTO notifications (event_id, subscription_id, channel, status, attempts, created_at)
                VALUES (?, ?, ?, ?, 0, ?)
                "#,
            )
            .bind(event_id)
            .bind(subscription_id)
            .bind(&channel_json)
            .bind(DeliveryStatus::Queued.as_str())
            .bind(datetime_to_ms(now))
            .execute(&self.pool)
            .await?;
            Ok(result.last_insert_rowid())
        })
        .await;

        match result {
            Ok(id) => Ok(Some(id)),
            Err(e) if e.is_unique_violation() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn mark_sent(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        retry_on_sqlite_busy("mark_notification_sent", || async {
            let result = sqlx::query(
                r#"
                UPDATE notifications SET
                    status = 'sent',
                    attempts = attempts + 1,
                    sent_at = ?
                WHERE id = ? AND status IN ('queued', 'error')
                "#,
            )
            .bind(datetime_to_ms(now))
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn mark_error(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<bool> {
        retry_on_sqlite_busy("mark_notification_error", || async {
            let result = sqlx::query(
                r#"
                UPDATE notifications SET
                    status = 'error',
                    attempts = attempts + 1,
                    last_error = ?,
                    last_error_at = ?
                WHERE id = ? AND status IN ('queued', 'error')
                "#,
            )
            .bind(error)
            .bind(datetime_to_ms(now))
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn list_retryable(
        &self,
        max_attempts: i32,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationDbModel>(
            r#"
            SELECT * FROM notifications
            WHERE attempts < ?
              AND (
                (status = 'error' AND last_error_at < ?)
                OR (status = 'queued' AND created_at < ?)
              )
            ORDER BY COALESCE(last_error_at, created_at) ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(max_attempts)
        .bind(datetime_to_ms(cutoff))
        .bind(datetime_to_ms(cutoff))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Notification::try_from).collect()
    }

    async fn get(&self, id: i64) -> Result<Notification> {
        sqlx::query_as::<_, NotificationDbModel>("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Notification", id.to_string()))?
            .try_into()
    }

    async fn list(&self, query: &NotificationQuery) -> Result<Vec<Notification>> {
        let mut conditions: Vec<&str> = Vec::new();
        if query.status.is_some() {
            conditions.push("status = ?");
        }
        if query.subscription_id.is_some() {
            conditions.push("subscription_id = ?");
        }
        if query.event_id.is_some() {
            conditions.push("event_id = ?");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT * FROM notifications {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut q = sqlx::query_as::<_, NotificationDbModel>(&sql);
        if let Some(status) = query.status {
            q = q.bind(status.as_str());
        }
        if let Some(subscription_id) = query.subscription_id {
            q = q.bind(subscription_id);
        }
        if let Some(event_id) = query.event_id {
            q = q.bind(event_id);
        }
        q = q.bind(query.limit).bind(query.offset);

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Notification::try_from).collect()
    }
}
