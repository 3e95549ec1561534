//! Event store: the append-only, deduplicated event ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::models::EventDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::{datetime_to_ms, now_ms};
use crate::domain::{Event, EventKind, NewEvent};
use crate::{Error, Result};

/// Filters for the event history read path.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub resource_id: Option<i64>,
    pub kind: Option<EventKind>,
    /// Inclusive lower bound on `occurred_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `occurred_at`.
    pub until: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            resource_id: None,
            kind: None,
            since: None,
            until: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Record an event.
    ///
    /// Returns `Ok(None)` when an event with the same
    /// `(resource_id, kind, external_id)` already exists.
    async fn insert(&self, event: &NewEvent) -> Result<Option<i64>>;

    async fn get(&self, id: i64) -> Result<Event>;

    /// Look up an event by its natural key.
    async fn find(
        &self,
        resource_id: i64,
        kind: EventKind,
        external_id: i64,
    ) -> Result<Option<Event>>;

    /// Paged history, newest first.
    async fn list(&self, query: &EventQuery) -> Result<Vec<Event>>;
}

/// SQLx implementation of EventStore.
pub struct SqlxEventStore {
    pool: SqlitePool,
}

impl SqlxEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for SqlxEventStore {
    async fn insert(&self, event: &NewEvent) -> Result<Option<i64>> {
        let payload = serde_json::to_string(&event.payload)?;

        let result = retry_on_sqlite_busy("insert_event", || async {
            let result = sqlx::query(
                r#"
                INSERT INTO events (resource_id, kind, external_id, payload, occurred_at, inserted_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(event.resource_id)
            .bind(event.kind.as_str())
            .bind(event.external_id)
            .bind(&payload)
            .bind(datetime_to_ms(event.occurred_at))
            .bind(now_ms())
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

    async fn get(&self, id: i64) -> Result<Event> {
        sqlx::query_as::<_, EventDbModel>("SELECT * FROM events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Event", id.to_string()))?
            .try_into()
    }

    async fn find(
        &self,
        resource_id: i64,
        kind: EventKind,
        external_id: i64,
    ) -> Result<Option<Event>> {
        sqlx::query_as::<_, EventDbModel>(
            "SELECT * FROM events WHERE resource_id = ? AND kind = ? AND external_id = ?",
        )
        .bind(resource_id)
        .bind(kind.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Event::try_from)
        .transpose()
    }

    async fn list(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let mut conditions: Vec<&str> = Vec::new();
        if query.resource_id.is_some() {
            conditions.push("resource_id = ?");
        }
        if query.kind.is_some() {
            conditions.push("kind = ?");
        }
        if query.since.is_some() {
            conditions.push("occurred_at >= ?");
        }
        if query.until.is_some() {
            conditions.push("occurred_at < ?");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT * FROM events {} ORDER BY occurred_at DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut q = sqlx::query_as::<_, EventDbModel>(&sql);
        if let Some(resource_id) = query.resource_id {
            q = q.bind(resource_id);
        }
        if let Some(kind) = query.kind {
            q = q.bind(kind.as_str());
        }
        if let Some(since) = query.since {
            q = q.bind(datetime_to_ms(since));
        }
        if let Some(until) = query.until {
            q = q.bind(datetime_to_ms(until));
        }
        q = q.bind(query.limit).bind(query.offset);

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Event::try_from).collect()
    }
}
