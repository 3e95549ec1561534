//! Delivery channels.
//!
//! A [`ChannelSink`] delivers a [`NotificationMessage`] to one
//! [`ChannelTarget`]. The [`ChannelRegistry`] routes each target to the sink
//! for its kind; kinds without a sink fail closed with
//! [`DeliveryError::NotImplemented`].

mod webhook;

pub use webhook::{WebhookAuth, WebhookConfig, WebhookSink};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::message::NotificationMessage;
use crate::domain::{ChannelKind, ChannelTarget};

/// Errors from a single delivery attempt. Recorded on the notification row.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("destination responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0} delivery is not implemented")]
    NotImplemented(ChannelKind),

    #[error("invalid destination: {0}")]
    InvalidTarget(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// A delivery channel implementation.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Channel kind this sink serves.
    fn kind(&self) -> ChannelKind;

    /// Deliver `message` to `destination`.
    async fn send(
        &self,
        destination: &ChannelTarget,
        message: &NotificationMessage,
    ) -> Result<(), DeliveryError>;
}

/// Sinks keyed by channel kind.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    sinks: HashMap<ChannelKind, Arc<dyn ChannelSink>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink`, replacing any sink of the same kind.
    pub fn register(&mut self, sink: Arc<dyn ChannelSink>) {
        self.sinks.insert(sink.kind(), sink);
    }

    pub fn with_sink(mut self, sink: Arc<dyn ChannelSink>) -> Self {
        self.register(sink);
        self
    }

    pub fn get(&self, kind: ChannelKind) -> Option<&Arc<dyn ChannelSink>> {
        self.sinks.get(&kind)
    }

    /// Route `message` to the sink serving `destination`'s kind.
    pub async fn send(
        &self,
        destination: &ChannelTarget,
        message: &NotificationMessage,
    ) -> Result<(), DeliveryError> {
        let kind = destination.kind();
        let sink = self.get(kind).ok_or(DeliveryError::NotImplemented(kind))?;
        sink.send(destination, message).await
    }
}
