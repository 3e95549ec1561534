//! Poll cycle orchestration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::ingest::{EventIngestor, IngestReport};
use crate::Result;
use crate::config::SchedulerConfig;
use crate::database::repositories::ResourceRegistry;
use crate::domain::{EventKind, ShardKey, TrackedResource};
use crate::source::{PollOutcome, ReleasePoller};

/// Kinds the scheduler polls for every resource.
const POLLED_KINDS: &[EventKind] = &[EventKind::Release];

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Shard bucket selected for this cycle.
    pub bucket: i64,
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub not_modified: usize,
    /// Resources whose page only established a baseline cursor.
    pub baselines: usize,
    pub ingest: IngestReport,
    /// Outcome bookkeeping writes that failed.
    pub outcome_errors: usize,
}

/// Per-resource result inside a cycle.
#[derive(Debug, Default)]
struct ResourcePoll {
    not_modified: bool,
    baseline: bool,
    ingest: IngestReport,
}

pub struct PollScheduler {
    resources: Arc<dyn ResourceRegistry>,
    poller: ReleasePoller,
    ingestor: EventIngestor,
    config: SchedulerConfig,
}

impl PollScheduler {
    pub fn new(
        resources: Arc<dyn ResourceRegistry>,
        poller: ReleasePoller,
        ingestor: EventIngestor,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            resources,
            poller,
            ingestor,
            config,
        }
    }

    /// Run one cycle for the tick at `now`.
    ///
    /// Only a failure to list the due resources is returned as an error;
    /// per-resource failures are counted in the report.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let shard = ShardKey::for_time(
            now,
            self.config.shard_count,
            self.config.cycle_interval_secs,
        );
        let cooldown = chrono::Duration::from_std(self.config.failure_cooldown())
            .unwrap_or(chrono::Duration::MAX);
        let cooldown_cutoff = now
            .checked_sub_signed(cooldown)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let due = self
            .resources
            .list_due(shard, self.config.error_ceiling, cooldown_cutoff)
            .await?;

        let mut report = CycleReport {
            bucket: shard.index,
            selected: due.len(),
            ..Default::default()
        };

        info!(
            bucket = shard.index,
            shards = shard.count,
            selected = due.len(),
            "Starting poll cycle"
        );

        for batch in due.chunks(self.config.batch_size.max(1)) {
            let results = join_all(batch.iter().map(|resource| self.poll_resource(resource, now))).await;

            for (resource, result) in batch.iter().zip(results) {
                let success = match result {
                    Ok(polled) => {
                        report.succeeded += 1;
                        report.not_modified += usize::from(polled.not_modified);
                        report.baselines += usize::from(polled.baseline);
                        report.ingest.merge(polled.ingest);
                        true
                    }
                    Err(e) => {
                        warn!(
                            resource = %resource.key(),
                            consecutive_errors = resource.consecutive_errors + 1,
                            error = %e,
                            "Poll failed"
                        );
                        report.failed += 1;
                        false
                    }
                };

                if let Err(e) = self.resources.record_outcome(resource.id, success, now).await {
                    warn!(resource = %resource.key(), error = %e, "Failed to record poll outcome");
                    report.outcome_errors += 1;
                }
            }
        }

        info!(
            selected = report.selected,
            succeeded = report.succeeded,
            failed = report.failed,
            not_modified = report.not_modified,
            new_events = report.ingest.recorded,
            notifications_sent = report.ingest.dispatch.sent,
            notifications_failed = report.ingest.dispatch.failed,
            "Poll cycle finished"
        );

        Ok(report)
    }

    async fn poll_resource(&self, resource: &TrackedResource, now: DateTime<Utc>) -> Result<ResourcePoll> {
        let mut polled = ResourcePoll::default();

        for &kind in POLLED_KINDS {
            match self.poller.check(resource, kind, now).await? {
                PollOutcome::NotModified => {
                    debug!(resource = %resource.key(), %kind, "Not modified");
                    polled.not_modified = true;
                }
                PollOutcome::Modified {
                    new_items,
                    baseline,
                    next_cursor,
                } => {
                    if baseline {
                        info!(
                            resource = %resource.key(),
                            %kind,
                            last_seen = ?next_cursor.last_seen_external_id,
                            "Established baseline cursor"
                        );
                        polled.baseline = true;
                    }

                    let ingested = self.ingestor.ingest(resource, kind, &new_items, now).await?;
                    polled.ingest.merge(ingested);
                    self.poller.commit(&next_cursor).await?;
                }
            }
        }

        Ok(polled)
    }
}
