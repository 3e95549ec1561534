//! New-item ingestion: record, filter, fan out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::Result;
use crate::database::repositories::{EventStore, SubscriptionIndex};
use crate::domain::{
    Event, EventKind, FilterDecision, FilterEngine, NewEvent, Subscription, TrackedResource,
};
use crate::notification::{DispatchReport, Dispatcher};
use crate::source::SourceItem;

/// Counters for the items of one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Items recorded as new events.
    pub recorded: usize,
    /// Items the event store already had.
    pub duplicates: usize,
    /// Subscriptions whose filter suppressed an event.
    pub suppressed: usize,
    pub dispatch: DispatchReport,
}

impl IngestReport {
    pub fn merge(&mut self, other: IngestReport) {
        self.recorded += other.recorded;
        self.duplicates += other.duplicates;
        self.suppressed += other.suppressed;
        self.dispatch.merge(other.dispatch);
    }
}

pub struct EventIngestor {
    events: Arc<dyn EventStore>,
    subscriptions: Arc<dyn SubscriptionIndex>,
    dispatcher: Arc<Dispatcher>,
}

impl EventIngestor {
    pub fn new(
        events: Arc<dyn EventStore>,
        subscriptions: Arc<dyn SubscriptionIndex>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            events,
            subscriptions,
            dispatcher,
        }
    }

    /// Process `items` (oldest first) for one resource.
    ///
    /// Subscriptions are loaded before anything is written, so a failed
    /// lookup leaves no event behind without its fan-out. An item that is
    /// already recorded is fanned out again; notification creation dedups
    /// per `(event, subscription, channel)`, so a cycle that failed after
    /// recording an event completes its deliveries on the next run. Store
    /// failures abort the remaining items and propagate.
    pub async fn ingest(
        &self,
        resource: &TrackedResource,
        kind: EventKind,
        items: &[SourceItem],
        now: DateTime<Utc>,
    ) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        if items.is_empty() {
            return Ok(report);
        }

        let subscriptions = self.subscriptions.list_for(resource.id, kind).await?;

        for item in items {
            let new_event = NewEvent {
                resource_id: resource.id,
                kind,
                external_id: item.external_id,
                payload: item.payload.clone(),
                occurred_at: item.occurred_at,
            };

            let inserted = self.events.insert(&new_event).await?;
            let event = match inserted {
                Some(event_id) => {
                    report.recorded += 1;
                    new_event.into_event(event_id, now)
                }
                None => {
                    report.duplicates += 1;
                    match self.events.find(resource.id, kind, item.external_id).await? {
                        Some(existing) => {
                            debug!(
                                resource = %resource.key(),
                                external_id = item.external_id,
                                event_id = existing.id,
                                "Event already recorded, resuming fan-out"
                            );
                            existing
                        }
                        None => {
                            warn!(
                                resource = %resource.key(),
                                external_id = item.external_id,
                                "Duplicate event vanished from the store"
                            );
                            continue;
                        }
                    }
                }
            };

            for subscription in &subscriptions {
                if self.admits(subscription, &event) {
                    let dispatched = self
                        .dispatcher
                        .dispatch(resource, &event, subscription, now)
                        .await;
                    report.dispatch.merge(dispatched);
                } else {
                    report.suppressed += 1;
                }
            }
        }

        Ok(report)
    }

    fn admits(&self, subscription: &Subscription, event: &Event) -> bool {
        let decision = FilterEngine::evaluate(&subscription.filter, event);
        match &decision {
            FilterDecision::Deliver => {}
            FilterDecision::Suppress => debug!(
                subscription_id = subscription.id,
                event_id = event.id,
                filter = subscription.filter.filter_type().as_str(),
                "Event suppressed by filter"
            ),
            FilterDecision::DeliverFailOpen { reason } => warn!(
                subscription_id = subscription.id,
                event_id = event.id,
                reason = %reason,
                "Filter could not be evaluated, delivering anyway"
            ),
        }
        decision.should_deliver()
    }
}
