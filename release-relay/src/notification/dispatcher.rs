//! Notification dispatcher.
//!
//! Creates one queued notification per `(event, subscription, channel)` and
//! attempts delivery immediately. Failed rows, and queued rows whose first
//! outcome was never recorded, are picked up again by
//! [`Dispatcher::retry_sweep`] until they succeed or exhaust their attempts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::channels::{ChannelRegistry, DeliveryError};
use super::message::NotificationMessage;
use crate::Result;
use crate::config::DispatchConfig;
use crate::database::repositories::{EventStore, NotificationRepository, ResourceRegistry};
use crate::domain::{ChannelTarget, Event, Subscription, TrackedResource};

/// Counters for one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Notifications created in `queued`.
    pub created: usize,
    /// Triples that already had a notification.
    pub duplicates: usize,
    pub sent: usize,
    /// Delivery attempts that failed and were recorded as `error`.
    pub failed: usize,
    /// Rows that could not be created or updated.
    pub persistence_errors: usize,
}

impl DispatchReport {
    pub fn merge(&mut self, other: DispatchReport) {
        self.created += other.created;
        self.duplicates += other.duplicates;
        self.sent += other.sent;
        self.failed += other.failed;
        self.persistence_errors += other.persistence_errors;
    }
}

/// Counters for one retry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub candidates: usize,
    pub sent: usize,
    pub failed: usize,
    /// Failures that reached the attempt ceiling in this sweep.
    pub exhausted: usize,
    /// Rows whose event or resource could not be loaded.
    pub skipped: usize,
}

/// Outcome of one delivery attempt.
enum Attempt {
    Sent,
    Failed,
}

pub struct Dispatcher {
    notifications: Arc<dyn NotificationRepository>,
    events: Arc<dyn EventStore>,
    resources: Arc<dyn ResourceRegistry>,
    channels: ChannelRegistry,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        events: Arc<dyn EventStore>,
        resources: Arc<dyn ResourceRegistry>,
        channels: ChannelRegistry,
        config: DispatchConfig,
    ) -> Self {
        Self {
            notifications,
            events,
            resources,
            channels,
            config,
        }
    }

    /// Queue and deliver `event` to every channel of `subscription`.
    ///
    /// Failures are isolated per channel and reflected in the report.
    pub async fn dispatch(
        &self,
        resource: &TrackedResource,
        event: &Event,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let message = NotificationMessage::for_event(resource, event);

        for target in &subscription.channels {
            let id = match self
                .notifications
                .create_queued(event.id, subscription.id, target, now)
                .await
            {
                Ok(Some(id)) => id,
                Ok(None) => {
                    debug!(
                        event_id = event.id,
                        subscription_id = subscription.id,
                        channel = %target.kind(),
                        "Notification already exists, skipping"
                    );
                    report.duplicates += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        event_id = event.id,
                        subscription_id = subscription.id,
                        error = %e,
                        "Failed to queue notification"
                    );
                    report.persistence_errors += 1;
                    continue;
                }
            };
            report.created += 1;

            match self.attempt(id, target, &message, now).await {
                Ok(Attempt::Sent) => report.sent += 1,
                Ok(Attempt::Failed) => report.failed += 1,
                Err(e) => {
                    warn!(notification_id = id, error = %e, "Failed to record delivery outcome");
                    report.persistence_errors += 1;
                }
            }
        }

        report
    }

    /// Re-attempt errored or stranded queued notifications whose cooldown
    /// has elapsed.
    ///
    /// Only a failure to list candidates is returned as an error.
    pub async fn retry_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cooldown = chrono::Duration::from_std(self.config.retry_cooldown())
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(cooldown).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let candidates = self
            .notifications
            .list_retryable(self.config.max_attempts, cutoff, self.config.sweep_limit)
            .await?;

        let mut report = SweepReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        let mut messages: HashMap<i64, NotificationMessage> = HashMap::new();

        for notification in candidates {
            let message = match messages.get(&notification.event_id) {
                Some(message) => message.clone(),
                None => match self.load_message(notification.event_id).await {
                    Ok(message) => {
                        messages.insert(notification.event_id, message.clone());
                        message
                    }
                    Err(e) => {
                        warn!(
                            notification_id = notification.id,
                            event_id = notification.event_id,
                            error = %e,
                            "Cannot rebuild message for retry"
                        );
                        report.skipped += 1;
                        continue;
                    }
                },
            };

            match self
                .attempt(notification.id, &notification.channel, &message, now)
                .await
            {
                Ok(Attempt::Sent) => report.sent += 1,
                Ok(Attempt::Failed) => {
                    report.failed += 1;
                    if notification.attempts + 1 >= self.config.max_attempts {
                        warn!(
                            notification_id = notification.id,
                            attempts = notification.attempts + 1,
                            "Notification exhausted its delivery attempts"
                        );
                        report.exhausted += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        notification_id = notification.id,
                        error = %e,
                        "Failed to record retry outcome"
                    );
                    report.skipped += 1;
                }
            }
        }

        info!(
            candidates = report.candidates,
            sent = report.sent,
            failed = report.failed,
            exhausted = report.exhausted,
            "Retry sweep finished"
        );

        Ok(report)
    }

    async fn load_message(&self, event_id: i64) -> Result<NotificationMessage> {
        let event = self.events.get(event_id).await?;
        let resource = self.resources.get(event.resource_id).await?;
        Ok(NotificationMessage::for_event(&resource, &event))
    }

    /// Deliver once and record the outcome on the row.
    async fn attempt(
        &self,
        id: i64,
        target: &ChannelTarget,
        message: &NotificationMessage,
        now: DateTime<Utc>,
    ) -> Result<Attempt> {
        let timeout = self.config.request_timeout();
        let sent = match tokio::time::timeout(
            timeout,
            self.channels.send(target, message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        };

        match sent {
            Ok(()) => {
                if !self.notifications.mark_sent(id, now).await? {
                    debug!(notification_id = id, "Notification was already settled");
                }
                debug!(notification_id = id, channel = %target.kind(), "Notification sent");
                Ok(Attempt::Sent)
            }
            Err(e) => {
                warn!(
                    notification_id = id,
                    channel = %target.kind(),
                    error = %e,
                    "Notification delivery failed"
                );
                if !self.notifications.mark_error(id, &e.to_string(), now).await? {
                    debug!(notification_id = id, "Notification was already settled");
                }
                Ok(Attempt::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::{
        NotificationQuery, SqlxEventStore, SqlxNotificationRepository, SqlxResourceRegistry,
    };
    use crate::database::test_pool;
    use crate::domain::{
        ChannelKind, DeliveryStatus, EventKind, NewEvent, Notification, SubscriptionFilter,
    };
    use crate::notification::channels::ChannelSink;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Webhook sink whose availability can be toggled.
    #[derive(Default)]
    struct ToggleSink {
        down: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChannelSink for ToggleSink {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Webhook
        }

        async fn send(
            &self,
            _destination: &ChannelTarget,
            _message: &NotificationMessage,
        ) -> std::result::Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(DeliveryError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        notifications: Arc<SqlxNotificationRepository>,
        sink: Arc<ToggleSink>,
        resource: TrackedResource,
        event: Event,
    }

    /// Repository whose next `mark_error` fails, leaving the row `queued`.
    struct DroppedOutcome {
        inner: Arc<SqlxNotificationRepository>,
        fail_next_error: AtomicBool,
    }

    #[async_trait]
    impl NotificationRepository for DroppedOutcome {
        async fn create_queued(
            &self,
            event_id: i64,
            subscription_id: i64,
            channel: &ChannelTarget,
            now: DateTime<Utc>,
        ) -> Result<Option<i64>> {
            self.inner
                .create_queued(event_id, subscription_id, channel, now)
                .await
        }

        async fn mark_sent(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
            self.inner.mark_sent(id, now).await
        }

        async fn mark_error(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<bool> {
            if self.fail_next_error.swap(false, Ordering::SeqCst) {
                return Err(crate::Error::Database("database is gone".to_string()));
            }
            self.inner.mark_error(id, error, now).await
        }

        async fn list_retryable(
            &self,
            max_attempts: i32,
            cutoff: DateTime<Utc>,
            limit: u32,
        ) -> Result<Vec<Notification>> {
            self.inner.list_retryable(max_attempts, cutoff, limit).await
        }

        async fn get(&self, id: i64) -> Result<Notification> {
            self.inner.get(id).await
        }

        async fn list(&self, query: &NotificationQuery) -> Result<Vec<Notification>> {
            self.inner.list(query).await
        }
    }

    async fn fixture(max_attempts: i32) -> Fixture {
        fixture_with(max_attempts, |repo| repo as Arc<dyn NotificationRepository>).await
    }

    async fn fixture_with(
        max_attempts: i32,
        wrap: impl FnOnce(Arc<SqlxNotificationRepository>) -> Arc<dyn NotificationRepository>,
    ) -> Fixture {
        let pool = test_pool().await;
        let resources = Arc::new(SqlxResourceRegistry::new(pool.clone()));
        let events = Arc::new(SqlxEventStore::new(pool.clone()));
        let notifications = Arc::new(SqlxNotificationRepository::new(pool));
        let sink = Arc::new(ToggleSink::default());

        let resource = resources.ensure_resource("acme", "widget").await.unwrap();
        let event_id = events
            .insert(&NewEvent {
                resource_id: resource.id,
                kind: EventKind::Release,
                external_id: 4,
                payload: json!({"tag_name": "v4"}),
                occurred_at: Utc::now(),
            })
            .await
            .unwrap()
            .unwrap();
        let event = events.get(event_id).await.unwrap();

        let dispatcher = Dispatcher::new(
            wrap(notifications.clone()),
            events,
            resources,
            ChannelRegistry::new().with_sink(sink.clone()),
            DispatchConfig {
                request_timeout_secs: 1,
                max_attempts,
                retry_cooldown_secs: 600,
                sweep_limit: 10,
            },
        );

        Fixture {
            dispatcher,
            notifications,
            sink,
            resource,
            event,
        }
    }

    fn subscription(channels: Vec<ChannelTarget>) -> Subscription {
        Subscription {
            id: 1,
            subscriber_id: "alice".to_string(),
            resource_id: 1,
            kind: EventKind::Release,
            filter: SubscriptionFilter::All,
            channels,
        }
    }

    fn webhook() -> ChannelTarget {
        ChannelTarget::Webhook {
            url: "https://hooks.example.com/a".to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_sends_and_dedups() {
        let f = fixture(5).await;
        let sub = subscription(vec![webhook()]);
        let now = Utc::now();

        let report = f.dispatcher.dispatch(&f.resource, &f.event, &sub, now).await;
        assert_eq!(report.created, 1);
        assert_eq!(report.sent, 1);

        let again = f.dispatcher.dispatch(&f.resource, &f.event, &sub, now).await;
        assert_eq!(again.created, 0);
        assert_eq!(again.duplicates, 1);
        assert_eq!(f.sink.calls.load(Ordering::SeqCst), 1);

        let rows = f
            .notifications
            .list(&NotificationQuery::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, DeliveryStatus::Sent);
        assert_eq!(rows[0].attempts, 1);
        assert!(rows[0].sent_at.is_some());
    }

    #[tokio::test]
    async fn test_unimplemented_channel_is_recorded_as_error() {
        let f = fixture(5).await;
        let sub = subscription(vec![ChannelTarget::Discord {
            webhook_url: "https://discord.com/api/webhooks/1/x".to_string(),
        }]);

        let report = f
            .dispatcher
            .dispatch(&f.resource, &f.event, &sub, Utc::now())
            .await;
        assert_eq!(report.failed, 1);

        let rows = f
            .notifications
            .list(&NotificationQuery::default())
            .await
            .unwrap();
        assert_eq!(rows[0].status, DeliveryStatus::Error);
        assert_eq!(
            rows[0].last_error.as_deref(),
            Some("discord delivery is not implemented")
        );
    }

    #[tokio::test]
    async fn test_retry_sweep_recovers_after_cooldown() {
        let f = fixture(5).await;
        let sub = subscription(vec![webhook()]);
        let t0 = Utc::now() - chrono::Duration::hours(1);

        f.sink.down.store(true, Ordering::SeqCst);
        let report = f.dispatcher.dispatch(&f.resource, &f.event, &sub, t0).await;
        assert_eq!(report.failed, 1);

        // Still inside the cooldown window.
        let early = f
            .dispatcher
            .retry_sweep(t0 + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(early.candidates, 0);

        f.sink.down.store(false, Ordering::SeqCst);
        let swept = f.dispatcher.retry_sweep(Utc::now()).await.unwrap();
        assert_eq!(swept.candidates, 1);
        assert_eq!(swept.sent, 1);

        let rows = f
            .notifications
            .list(&NotificationQuery::default())
            .await
            .unwrap();
        assert_eq!(rows[0].status, DeliveryStatus::Sent);
        assert_eq!(rows[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_sweep_stops_at_attempt_ceiling() {
        let f = fixture(2).await;
        let sub = subscription(vec![webhook()]);
        let t0 = Utc::now() - chrono::Duration::hours(3);

        f.sink.down.store(true, Ordering::SeqCst);
        f.dispatcher.dispatch(&f.resource, &f.event, &sub, t0).await;

        let first = f
            .dispatcher
            .retry_sweep(t0 + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(first.exhausted, 1);

        f.sink.down.store(false, Ordering::SeqCst);
        let later = f.dispatcher.retry_sweep(Utc::now()).await.unwrap();
        assert_eq!(later.candidates, 0);

        let rows = f
            .notifications
            .list(&NotificationQuery::default())
            .await
            .unwrap();
        assert_eq!(rows[0].status, DeliveryStatus::Error);
        assert_eq!(rows[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_sweep_recovers_notification_left_queued() {
        let f = fixture_with(5, |repo| {
            Arc::new(DroppedOutcome {
                inner: repo,
                fail_next_error: AtomicBool::new(true),
            }) as Arc<dyn NotificationRepository>
        })
        .await;
        let sub = subscription(vec![webhook()]);
        let t0 = Utc::now() - chrono::Duration::days(30);

        f.sink.down.store(true, Ordering::SeqCst);
        let report = f.dispatcher.dispatch(&f.resource, &f.event, &sub, t0).await;
        assert_eq!(report.created, 1);
        assert_eq!(report.persistence_errors, 1);

        let stranded = f
            .notifications
            .list(&NotificationQuery::default())
            .await
            .unwrap();
        assert_eq!(stranded[0].status, DeliveryStatus::Queued);
        assert_eq!(stranded[0].attempts, 0);

        f.sink.down.store(false, Ordering::SeqCst);
        let swept = f.dispatcher.retry_sweep(Utc::now()).await.unwrap();
        assert_eq!(swept.candidates, 1);
        assert_eq!(swept.sent, 1);

        let rows = f
            .notifications
            .list(&NotificationQuery::default())
            .await
            .unwrap();
        assert_eq!(rows[0].status, DeliveryStatus::Sent);
        assert_eq!(rows[0].attempts, 1);
    }
}
