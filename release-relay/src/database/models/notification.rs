//! Notification database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{ms_to_datetime, opt_ms_to_datetime};
use crate::domain::{DeliveryStatus, Notification};
use crate::{Error, Result};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationDbModel {
    pub id: i64,
    pub event_id: i64,
    pub subscription_id: i64,
    /// Tagged JSON of the delivery target.
    pub channel: String,
    /// queued, sent or error
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub last_error_at: Option<i64>,
    pub sent_at: Option<i64>,
    pub created_at: i64,
}

impl TryFrom<NotificationDbModel> for Notification {
    type Error = Error;

    fn try_from(model: NotificationDbModel) -> Result<Self> {
        let status = DeliveryStatus::parse(&model.status).ok_or_else(|| {
            Error::Database(format!("Unknown notification status: {}", model.status))
        })?;

        Ok(Self {
            id: model.id,
            event_id: model.event_id,
            subscription_id: model.subscription_id,
            channel: serde_json::from_str(&model.channel)?,
            status,
            attempts: model.attempts,
            last_error: model.last_error,
            last_error_at: opt_ms_to_datetime(model.last_error_at),
            sent_at: opt_ms_to_datetime(model.sent_at),
            created_at: ms_to_datetime(model.created_at),
        })
    }
}
