//! Upstream source access.
//!
//! [`SourceClient`] is the conditional-fetch contract for the upstream API,
//! [`GitHubReleaseClient`] its HTTP implementation, and [`ReleasePoller`] the
//! cursor-driven poll protocol built on top of it.

mod github;
pub mod poller;

pub use github::{GitHubReleaseClient, GitHubReleaseClientConfig};
pub use poller::{PollOutcome, ReleasePoller};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{EventKind, PollCursor};

/// One upstream item, as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    /// Monotonic upstream identifier.
    pub external_id: i64,
    pub occurred_at: DateTime<Utc>,
    /// Item body stored verbatim as the event payload.
    pub payload: serde_json::Value,
}

/// Rate-limit telemetry reported by the upstream. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Result of a conditional fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    /// Items in provider order (newest first). Empty when not modified.
    pub items: Vec<SourceItem>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub not_modified: bool,
    pub rate_limit: RateLimitInfo,
}

impl FetchResponse {
    /// A `304 Not Modified` response.
    pub fn not_modified() -> Self {
        Self {
            not_modified: true,
            ..Default::default()
        }
    }
}

/// Errors from the upstream source. None of them are retried within a cycle.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited until {reset_at:?}")]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0} polling is not implemented")]
    UnsupportedKind(EventKind),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Conditional-GET capable client for the upstream resource API.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch the provider's default page of recent items for `resource_key`
    /// (`owner/name`), sending the cursor's validators when present.
    async fn fetch_recent(
        &self,
        resource_key: &str,
        kind: EventKind,
        cursor: Option<&PollCursor>,
    ) -> Result<FetchResponse, SourceError>;
}
