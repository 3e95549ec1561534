//! Observed upstream events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of upstream change being tracked for a resource.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Published releases.
    Release,
    /// Git tags. Representable everywhere but polling it is not implemented.
    Tag,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Tag => "tag",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "release" => Some(Self::Release),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }

    /// Whether the poll protocol can fetch this kind.
    pub fn is_pollable(&self) -> bool {
        matches!(self, Self::Release)
    }
}

/// A recorded external event. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub resource_id: i64,
    pub kind: EventKind,
    pub external_id: i64,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub inserted_at: DateTime<Utc>,
}

impl Event {
    /// Typed view of the payload for release events.
    pub fn release(&self) -> Option<ReleasePayload> {
        match self.kind {
            EventKind::Release => serde_json::from_value(self.payload.clone()).ok(),
            EventKind::Tag => None,
        }
    }

    /// Whether the upstream flagged this event as a pre-release.
    pub fn is_prerelease(&self) -> bool {
        self.payload
            .get("prerelease")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// The string field pattern filters match against.
    pub fn tag_name(&self) -> Option<&str> {
        self.payload.get("tag_name").and_then(serde_json::Value::as_str)
    }
}

/// Insert request for the event store.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub resource_id: i64,
    pub kind: EventKind,
    pub external_id: i64,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl NewEvent {
    /// The event as recorded under `id`.
    pub fn into_event(self, id: i64, inserted_at: DateTime<Utc>) -> Event {
        Event {
            id,
            resource_id: self.resource_id,
            kind: self.kind,
            external_id: self.external_id,
            payload: self.payload,
            occurred_at: self.occurred_at,
            inserted_at,
        }
    }
}

/// Release fields carried in an event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePayload {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}
