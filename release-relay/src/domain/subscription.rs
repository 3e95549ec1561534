//! Subscriptions, as read from the subscription index.

use serde::{Deserialize, Serialize};

use super::channel::ChannelTarget;
use super::event::EventKind;
use super::filter::SubscriptionFilter;

/// A subscriber's interest in one (resource, kind) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub subscriber_id: String,
    pub resource_id: i64,
    pub kind: EventKind,
    pub filter: SubscriptionFilter,
    pub channels: Vec<ChannelTarget>,
}

/// Seed request for the subscription index.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub subscriber_id: String,
    pub resource_id: i64,
    pub kind: EventKind,
    pub filter: SubscriptionFilter,
    pub channels: Vec<ChannelTarget>,
}
