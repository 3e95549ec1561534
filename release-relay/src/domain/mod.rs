//! Domain layer: entities and value objects shared across the relay pipeline.

pub mod channel;
pub mod event;
pub mod filter;
pub mod notification;
pub mod resource;
pub mod subscription;

pub use channel::{ChannelKind, ChannelTarget};
pub use event::{Event, EventKind, NewEvent, ReleasePayload};
pub use filter::{FilterDecision, FilterEngine, SubscriptionFilter};
pub use notification::{DeliveryStatus, Notification};
pub use resource::{CursorKey, PollCursor, ShardKey, TrackedResource};
pub use subscription::{NewSubscription, Subscription};
