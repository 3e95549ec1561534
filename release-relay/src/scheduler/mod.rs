//! Scheduler module for poll cycles.
//!
//! The scheduler is invoked once per external tick. Each cycle:
//! - Selects the shard bucket for the tick, plus failing resources due a re-probe
//! - Polls the selected resources in concurrent batches
//! - Records new upstream items and fans them out to matching subscriptions
//! - Updates each resource's failure streak

mod ingest;
mod service;

pub use ingest::{EventIngestor, IngestReport};
pub use service::{CycleReport, PollScheduler};
