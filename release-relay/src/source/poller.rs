//! Cursor-driven conditional poll protocol.
//!
//! A poll is split in two steps so the caller can persist new items before
//! the cursor moves: [`ReleasePoller::check`] fetches and diffs against the
//! stored cursor, [`ReleasePoller::commit`] advances it afterwards. A crash
//! between the two re-detects the same items on the next cycle, which the
//! event store deduplicates.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{SourceClient, SourceError, SourceItem};
use crate::database::repositories::PollCursorStore;
use crate::domain::{CursorKey, EventKind, PollCursor, TrackedResource};
use crate::{Error, Result};

/// Result of checking one resource.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The upstream answered `304`; the cursor's `checked_at` has been refreshed.
    NotModified,
    /// The upstream returned a page.
    Modified {
        /// Items newer than the cursor, oldest first.
        new_items: Vec<SourceItem>,
        /// No prior last-seen id existed, so the page only established one.
        baseline: bool,
        /// Cursor to store once `new_items` have been processed.
        next_cursor: PollCursor,
    },
}

impl PollOutcome {
    pub fn new_items(&self) -> &[SourceItem] {
        match self {
            Self::NotModified => &[],
            Self::Modified { new_items, .. } => new_items,
        }
    }
}

pub struct ReleasePoller {
    source: Arc<dyn SourceClient>,
    cursors: Arc<dyn PollCursorStore>,
    request_timeout: Duration,
}

impl ReleasePoller {
    pub fn new(
        source: Arc<dyn SourceClient>,
        cursors: Arc<dyn PollCursorStore>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            source,
            cursors,
            request_timeout,
        }
    }

    /// Fetch `resource` conditionally and work out which items are new.
    ///
    /// Fetch failures bump an existing cursor's `checked_at` and are returned
    /// as [`Error::Source`].
    pub async fn check(
        &self,
        resource: &TrackedResource,
        kind: EventKind,
        now: DateTime<Utc>,
    ) -> Result<PollOutcome> {
        if !kind.is_pollable() {
            return Err(Error::not_implemented(format!("{kind} polling")));
        }

        let key = CursorKey::new(resource.id, kind);
        let cursor = self.cursors.get(key).await?;
        let resource_key = resource.key();

        let fetched = match tokio::time::timeout(
            self.request_timeout,
            self.source.fetch_recent(&resource_key, kind, cursor.as_ref()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(self.request_timeout)),
        };

        let response = match fetched {
            Ok(response) => response,
            Err(e) => {
                if let Some(cursor) = &cursor {
                    self.touch(cursor, now).await;
                }
                return Err(e.into());
            }
        };

        debug!(
            resource = %resource_key,
            not_modified = response.not_modified,
            items = response.items.len(),
            rate_limit_remaining = ?response.rate_limit.remaining,
            "Fetched upstream page"
        );

        if response.not_modified {
            let refreshed = match cursor {
                Some(cursor) => PollCursor {
                    etag: response.etag.or(cursor.etag),
                    last_modified: response.last_modified.or(cursor.last_modified),
                    checked_at: now,
                    ..cursor
                },
                None => PollCursor {
                    resource_id: resource.id,
                    kind,
                    etag: response.etag,
                    last_modified: response.last_modified,
                    last_seen_external_id: None,
                    checked_at: now,
                },
            };
            self.cursors.put(&refreshed).await?;
            return Ok(PollOutcome::NotModified);
        }

        let last_seen = cursor.as_ref().and_then(|c| c.last_seen_external_id);
        let fetched_max = response.items.iter().map(|item| item.external_id).max();
        let next_seen = last_seen.max(fetched_max);

        let new_items: Vec<SourceItem> = match last_seen {
            Some(seen) => response
                .items
                .into_iter()
                .filter(|item| item.external_id > seen)
                .rev()
                .collect(),
            None => Vec::new(),
        };

        Ok(PollOutcome::Modified {
            new_items,
            baseline: last_seen.is_none(),
            next_cursor: PollCursor {
                resource_id: resource.id,
                kind,
                etag: response.etag,
                last_modified: response.last_modified,
                last_seen_external_id: next_seen,
                checked_at: now,
            },
        })
    }

    /// Store the cursor produced by [`ReleasePoller::check`].
    pub async fn commit(&self, cursor: &PollCursor) -> Result<()> {
        self.cursors.put(cursor).await
    }

    async fn touch(&self, cursor: &PollCursor, now: DateTime<Utc>) {
        let touched = PollCursor {
            checked_at: now,
            ..cursor.clone()
        };
        if let Err(e) = self.cursors.put(&touched).await {
            warn!(
                resource_id = cursor.resource_id,
                kind = %cursor.kind,
                error = %e,
                "Failed to refresh cursor after fetch failure"
            );
        }
    }
}
