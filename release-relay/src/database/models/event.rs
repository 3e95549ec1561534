//! Event database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::parse_kind;
use crate::Result;
use crate::database::time::ms_to_datetime;
use crate::domain::Event;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EventDbModel {
    pub id: i64,
    pub resource_id: i64,
    pub kind: String,
    pub external_id: i64,
    /// JSON blob of the upstream item.
    pub payload: String,
    pub occurred_at: i64,
    pub inserted_at: i64,
}

impl TryFrom<EventDbModel> for Event {
    type Error = crate::Error;

    fn try_from(model: EventDbModel) -> Result<Self> {
        Ok(Self {
            id: model.id,
            resource_id: model.resource_id,
            kind: parse_kind(&model.kind)?,
            external_id: model.external_id,
            payload: serde_json::from_str(&model.payload)?,
            occurred_at: ms_to_datetime(model.occurred_at),
            inserted_at: ms_to_datetime(model.inserted_at),
        })
    }
}
