//! Delivery channel addressing.

use serde::{Deserialize, Serialize};

/// Channel kinds a subscription may address.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Webhook,
    Discord,
    Email,
}

/// A concrete delivery destination, stored as tagged JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelTarget {
    /// Generic HTTP webhook.
    Webhook { url: String },
    /// Discord incoming webhook.
    Discord { webhook_url: String },
    /// Email address.
    Email { address: String },
}

impl ChannelTarget {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Webhook { .. } => ChannelKind::Webhook,
            Self::Discord { .. } => ChannelKind::Discord,
            Self::Email { .. } => ChannelKind::Email,
        }
    }

    /// Canonical JSON form used as the notification's channel column.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
