//! Subscription database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;

use super::parse_kind;
use crate::Result;
use crate::domain::{ChannelTarget, Subscription, SubscriptionFilter};

/// Subscription row, written by the management surface.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubscriptionDbModel {
    pub id: i64,
    pub subscriber_id: String,
    pub resource_id: i64,
    pub kind: String,
    /// Tagged JSON, see [`SubscriptionFilter`].
    pub filter: String,
    /// JSON array of tagged [`ChannelTarget`]s.
    pub channels: String,
    pub created_at: i64,
}

impl SubscriptionDbModel {
    /// Validate the row into a domain subscription.
    ///
    /// A filter column that does not parse degrades to [`SubscriptionFilter::All`]
    /// so a broken filter never mutes the subscriber. A channel list that does
    /// not parse is an error: there is nowhere to deliver to.
    pub fn into_subscription(self) -> Result<Subscription> {
        let filter = match SubscriptionFilter::from_json(&self.filter) {
            Ok(filter) => filter,
            Err(e) => {
                warn!(
                    subscription_id = self.id,
                    error = %e,
                    "Malformed subscription filter, delivering unfiltered"
                );
                SubscriptionFilter::All
            }
        };
        let channels: Vec<ChannelTarget> = serde_json::from_str(&self.channels)?;

        Ok(Subscription {
            id: self.id,
            subscriber_id: self.subscriber_id,
            resource_id: self.resource_id,
            kind: parse_kind(&self.kind)?,
            filter,
            channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(filter: &str, channels: &str) -> SubscriptionDbModel {
        SubscriptionDbModel {
            id: 7,
            subscriber_id: "user-1".to_string(),
            resource_id: 1,
            kind: "release".to_string(),
            filter: filter.to_string(),
            channels: channels.to_string(),
            created_at: 0,
        }
    }

    #[test]
    fn test_valid_row() {
        let sub = row(
            r#"{"type":"prerelease","include_prereleases":false}"#,
            r#"[{"type":"webhook","url":"https://example.com/hook"}]"#,
        )
        .into_subscription()
        .unwrap();

        assert_eq!(sub.filter, SubscriptionFilter::prereleases(false));
        assert_eq!(sub.channels.len(), 1);
    }

    #[test]
    fn test_malformed_filter_fails_open() {
        let sub = row("{broken", "[]").into_subscription().unwrap();
        assert_eq!(sub.filter, SubscriptionFilter::All);
    }

    #[test]
    fn test_malformed_channels_rejected() {
        assert!(row(r#"{"type":"all"}"#, r#"[{"type":"fax"}]"#).into_subscription().is_err());
    }
}
