//! Tracked resources and their polling cursors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::EventKind;

/// An upstream project being polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedResource {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub consecutive_errors: i32,
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl TrackedResource {
    /// Upstream key in `owner/name` form.
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Identifies one poll cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorKey {
    pub resource_id: i64,
    pub kind: EventKind,
}

impl CursorKey {
    pub fn new(resource_id: i64, kind: EventKind) -> Self {
        Self { resource_id, kind }
    }
}

/// Conditional-request state plus the last seen upstream id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCursor {
    pub resource_id: i64,
    pub kind: EventKind,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_seen_external_id: Option<i64>,
    pub checked_at: DateTime<Utc>,
}

/// Cyclic shard selector for one scheduler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardKey {
    /// Bucket selected for this invocation, in `0..count`.
    pub index: i64,
    /// Total number of shards (at least 1).
    pub count: i64,
}

impl ShardKey {
    /// Derive the bucket for `now` given the external invocation cadence.
    pub fn for_time(now: DateTime<Utc>, count: u32, cycle_interval_secs: u64) -> Self {
        let count = i64::from(count.max(1));
        let interval = i64::try_from(cycle_interval_secs.max(1)).unwrap_or(i64::MAX);
        let index = (now.timestamp().div_euclid(interval)).rem_euclid(count);
        Self { index, count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_resource_key() {
        let resource = TrackedResource {
            id: 1,
            owner: "acme".to_string(),
            name: "widget".to_string(),
            consecutive_errors: 0,
            last_polled_at: None,
        };
        assert_eq!(resource.key(), "acme/widget");
    }

    #[test]
    fn test_shard_rotates_with_cadence() {
        let t0 = Utc.timestamp_opt(0, 0).unwrap();
        let t1 = Utc.timestamp_opt(300, 0).unwrap();
        let t3 = Utc.timestamp_opt(900, 0).unwrap();

        assert_eq!(ShardKey::for_time(t0, 3, 300).index, 0);
        assert_eq!(ShardKey::for_time(t1, 3, 300).index, 1);
        assert_eq!(ShardKey::for_time(t3, 3, 300).index, 0);
        assert_eq!(ShardKey::for_time(t1, 3, 300).count, 3);
    }

    #[test]
    fn test_single_shard_selects_everything() {
        let shard = ShardKey::for_time(Utc::now(), 0, 0);
        assert_eq!(shard.count, 1);
        assert_eq!(shard.index, 0);
    }
}
