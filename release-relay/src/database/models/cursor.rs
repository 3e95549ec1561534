//! Poll cursor database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::parse_kind;
use crate::Result;
use crate::database::time::ms_to_datetime;
use crate::domain::PollCursor;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PollCursorDbModel {
    pub resource_id: i64,
    pub kind: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_seen_external_id: Option<i64>,
    pub checked_at: i64,
}

impl TryFrom<PollCursorDbModel> for PollCursor {
    type Error = crate::Error;

    fn try_from(model: PollCursorDbModel) -> Result<Self> {
        Ok(Self {
            resource_id: model.resource_id,
            kind: parse_kind(&model.kind)?,
            etag: model.etag,
            last_modified: model.last_modified,
            last_seen_external_id: model.last_seen_external_id,
            checked_at: ms_to_datetime(model.checked_at),
        })
    }
}
