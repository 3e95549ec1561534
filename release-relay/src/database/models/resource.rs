//! Tracked resource database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::opt_ms_to_datetime;
use crate::domain::TrackedResource;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TrackedResourceDbModel {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub consecutive_errors: i32,
    /// Unix epoch milliseconds (UTC) of the last poll attempt.
    pub last_polled_at: Option<i64>,
    pub created_at: i64,
}

impl From<TrackedResourceDbModel> for TrackedResource {
    fn from(model: TrackedResourceDbModel) -> Self {
        Self {
            id: model.id,
            owner: model.owner,
            name: model.name,
            consecutive_errors: model.consecutive_errors,
            last_polled_at: opt_ms_to_datetime(model.last_polled_at),
        }
    }
}
