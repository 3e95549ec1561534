//! Poll cursor store.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::PollCursorDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::datetime_to_ms;
use crate::domain::{CursorKey, PollCursor};

/// Key/value store of conditional-request state.
///
/// Reads and writes are not coordinated; a lost update re-detects at most one
/// cycle of items, which the event store deduplicates.
#[async_trait]
pub trait PollCursorStore: Send + Sync {
    async fn get(&self, key: CursorKey) -> Result<Option<PollCursor>>;
    async fn put(&self, cursor: &PollCursor) -> Result<()>;
}

/// SQLx implementation of PollCursorStore.
pub struct SqlxPollCursorStore {
    pool: SqlitePool,
}

impl SqlxPollCursorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PollCursorStore for SqlxPollCursorStore {
    async fn get(&self, key: CursorKey) -> Result<Option<PollCursor>> {
        let row = sqlx::query_as::<_, PollCursorDbModel>(
            "SELECT * FROM poll_cursors WHERE resource_id = ? AND kind = ?",
        )
        .bind(key.resource_id)
        .bind(key.kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(PollCursor::try_from).transpose()
    }

    async fn put(&self, cursor: &PollCursor) -> Result<()> {
        retry_on_sqlite_busy("put_cursor", || async {
            sqlx::query(
                r#"
                INSERT INTO poll_cursors (
                    resource_id, kind, etag, last_modified, last_seen_external_id, checked_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (resource_id, kind) DO UPDATE SET
                    etag = excluded.etag,
                    last_modified = excluded.last_modified,
                    last_seen_external_id = excluded.last_seen_external_id,
                    checked_at = excluded.checked_at
                "#,
            )
            .bind(cursor.resource_id)
            .bind(cursor.kind.as_str())
            .bind(&cursor.etag)
            .bind(&cursor.last_modified)
            .bind(cursor.last_seen_external_id)
            .bind(datetime_to_ms(cursor.checked_at))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }
}
