//! Notification fan-out and delivery.
//!
//! - [`channels`]: delivery sinks keyed by channel kind
//! - [`message`]: the channel-agnostic message built from an event
//! - [`dispatcher`]: queued-row creation, delivery and the retry sweep

pub mod channels;
pub mod dispatcher;
pub mod message;

pub use channels::{ChannelRegistry, ChannelSink, DeliveryError, WebhookAuth, WebhookConfig, WebhookSink};
pub use dispatcher::{DispatchReport, Dispatcher, SweepReport};
pub use message::NotificationMessage;
