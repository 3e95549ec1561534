//! GitHub releases client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, ETAG, HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{FetchResponse, RateLimitInfo, SourceClient, SourceError, SourceItem};
use crate::Result;
use crate::domain::{EventKind, PollCursor, ReleasePayload};
use crate::utils::http_client::build_client;

/// Below this many remaining requests the client logs a warning.
const RATE_LIMIT_WARN_THRESHOLD: u32 = 50;

/// Occurrence time for a release that carries neither `published_at` nor
/// `created_at`. Fixed so a re-poll stores the same event.
const UNDATED_RELEASE_AT: DateTime<Utc> = DateTime::UNIX_EPOCH;

/// Configuration for [`GitHubReleaseClient`].
#[derive(Debug, Clone)]
pub struct GitHubReleaseClientConfig {
    /// API root, e.g. `https://api.github.com`.
    pub api_base: Url,
    /// Optional bearer token.
    pub token: Option<String>,
    pub request_timeout: Duration,
    pub user_agent: Option<String>,
}

/// Release as returned by the GitHub REST API.
#[derive(Debug, Deserialize)]
struct GitHubRelease {
    id: i64,
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

impl GitHubRelease {
    fn into_item(self) -> std::result::Result<SourceItem, SourceError> {
        let occurred_at = self
            .published_at
            .or(self.created_at)
            .unwrap_or(UNDATED_RELEASE_AT);
        let payload = serde_json::to_value(ReleasePayload {
            tag_name: self.tag_name,
            name: self.name,
            body: self.body,
            html_url: self.html_url,
            prerelease: self.prerelease,
            draft: self.draft,
            published_at: self.published_at,
        })
        .map_err(|e| SourceError::Decode(e.to_string()))?;

        Ok(SourceItem {
            external_id: self.id,
            occurred_at,
            payload,
        })
    }
}

/// Conditional-GET client for `GET /repos/{owner}/{repo}/releases`.
pub struct GitHubReleaseClient {
    config: GitHubReleaseClientConfig,
    client: reqwest::Client,
}

impl GitHubReleaseClient {
    pub fn new(config: GitHubReleaseClientConfig) -> Result<Self> {
        let client = build_client(config.request_timeout, config.user_agent.as_deref())?;
        Ok(Self { config, client })
    }

    fn releases_url(&self, resource_key: &str) -> std::result::Result<Url, SourceError> {
        let (owner, repo) = resource_key
            .split_once('/')
            .filter(|(o, r)| !o.is_empty() && !r.is_empty() && !r.contains('/'))
            .ok_or_else(|| SourceError::Transport(format!("invalid resource key: {resource_key}")))?;

        let mut url = self.config.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::Transport("API base cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(["repos", owner, repo, "releases"]);
        Ok(url)
    }

    fn build_headers(&self, cursor: Option<&PollCursor>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );

        if let Some(token) = &self.config.token {
            if let Ok(value) = format!("Bearer {}", token).parse() {
                headers.insert(AUTHORIZATION, value);
            }
        }

        if let Some(cursor) = cursor {
            if let Some(Ok(value)) = cursor.etag.as_deref().map(HeaderValue::from_str) {
                headers.insert(IF_NONE_MATCH, value);
            }
            if let Some(Ok(value)) = cursor.last_modified.as_deref().map(HeaderValue::from_str) {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }

        headers
    }
}

fn header_str(headers: &HeaderMap, name: impl reqwest::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Parse `x-ratelimit-*` headers.
pub(crate) fn parse_rate_limit(headers: &HeaderMap) -> RateLimitInfo {
    let number = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
    };

    RateLimitInfo {
        limit: number("x-ratelimit-limit").and_then(|n| u32::try_from(n).ok()),
        remaining: number("x-ratelimit-remaining").and_then(|n| u32::try_from(n).ok()),
        reset_at: number("x-ratelimit-reset").and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
    }
}

#[async_trait]
impl SourceClient for GitHubReleaseClient {
    async fn fetch_recent(
        &self,
        resource_key: &str,
        kind: EventKind,
        cursor: Option<&PollCursor>,
    ) -> std::result::Result<FetchResponse, SourceError> {
        if kind != EventKind::Release {
            return Err(SourceError::UnsupportedKind(kind));
        }

        let url = self.releases_url(resource_key)?;
        let response = self
            .client
            .get(url)
            .headers(self.build_headers(cursor))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout(self.config.request_timeout)
                } else {
                    SourceError::from(e)
                }
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let rate_limit = parse_rate_limit(&headers);

        if let Some(remaining) = rate_limit.remaining {
            if remaining < RATE_LIMIT_WARN_THRESHOLD {
                warn!(
                    resource = resource_key,
                    remaining,
                    reset_at = ?rate_limit.reset_at,
                    "GitHub rate limit running low"
                );
            } else {
                debug!(resource = resource_key, remaining, "GitHub rate limit");
            }
        }

        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchResponse {
                etag: header_str(&headers, ETAG).or_else(|| cursor.and_then(|c| c.etag.clone())),
                last_modified: header_str(&headers, LAST_MODIFIED)
                    .or_else(|| cursor.and_then(|c| c.last_modified.clone())),
                rate_limit,
                ..FetchResponse::not_modified()
            });
        }

        let exhausted = rate_limit.remaining == Some(0);
        if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && exhausted)
        {
            return Err(SourceError::RateLimited {
                reset_at: rate_limit.reset_at,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let releases: Vec<GitHubRelease> = response.json().await?;
        let items = releases
            .into_iter()
            .filter(|r| !r.draft)
            .map(GitHubRelease::into_item)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(FetchResponse {
            items,
            etag: header_str(&headers, ETAG),
            last_modified: header_str(&headers, LAST_MODIFIED),
            not_modified: false,
            rate_limit,
        })
    }
}
