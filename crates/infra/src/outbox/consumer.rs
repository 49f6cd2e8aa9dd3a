//! Outbox consumer: claims pending records and dispatches them to
//! projectors with retry/failure bookkeeping.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use curaflow_events::{DispatchOutcome, ProjectorRegistry, UnknownEventPolicy};

use super::record::{OutboxRecord, OutboxStatus};
use super::store::{OutboxStore, OutboxStoreError};

/// Consumer tuning knobs.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Default claim size when the caller doesn't pass one.
    pub batch_size: usize,
    /// Retry ceiling: a record whose attempt counter reaches this value is
    /// transitioned to `failed` and never claimed again.
    pub max_attempts: u32,
    /// What to do with envelopes whose event name has no projector.
    pub unknown_events: UnknownEventPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_attempts: 5,
            unknown_events: UnknownEventPolicy::default(),
        }
    }
}

/// Aggregate counters for one consumer invocation.
///
/// `total` is the number of records claimed; `skipped` counts records that
/// were no longer pending by the time this worker re-checked them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingReport {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
}

impl ProcessingReport {
    /// Fold another invocation's counters into this one (drain loops).
    pub fn merge(&mut self, other: ProcessingReport) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.total += other.total;
    }
}

/// Processes pending outbox records.
///
/// Any number of consumers may run concurrently across processes; the
/// store's claim operation is the sole concurrency-control point. Delivery
/// is at-least-once: a crash between projector dispatch and the
/// processed-mark leaves the record pending for the next invocation, so
/// projectors must be idempotent.
pub struct OutboxConsumer<S: OutboxStore> {
    store: S,
    registry: Arc<ProjectorRegistry>,
    config: ConsumerConfig,
}

impl<S: OutboxStore> OutboxConsumer<S> {
    pub fn new(store: S, registry: Arc<ProjectorRegistry>) -> Self {
        Self::with_config(store, registry, ConsumerConfig::default())
    }

    pub fn with_config(store: S, registry: Arc<ProjectorRegistry>, config: ConsumerConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn count_pending(&self) -> Result<u64, OutboxStoreError> {
        self.store.count_pending()
    }

    pub fn count_failed(&self) -> Result<u64, OutboxStoreError> {
        self.store.count_failed()
    }

    /// Run one batch: claim, dispatch, mark.
    ///
    /// Per-record projection failures are recovered here (attempt counter,
    /// `last_error`, eventual `failed` transition) and never abort the
    /// batch; only storage errors propagate.
    pub fn process_pending_events(
        &self,
        batch_size: Option<usize>,
    ) -> Result<ProcessingReport, OutboxStoreError> {
        let limit = batch_size.unwrap_or(self.config.batch_size);
        let claimed = self
            .store
            .claim_pending_batch(limit, self.config.max_attempts)?;

        let mut report = ProcessingReport {
            total: claimed.len(),
            ..ProcessingReport::default()
        };

        for record in claimed {
            // Re-check the persisted status right before acting: a concurrent
            // claimer may have finished this record already.
            let current = match self.store.get(record.id)? {
                Some(current) if current.status == OutboxStatus::Pending => current,
                Some(_) | None => {
                    report.skipped += 1;
                    continue;
                }
            };

            let envelope = current.envelope();

            match self.registry.dispatch(&envelope) {
                Ok(DispatchOutcome::Projected(count)) => {
                    self.store.mark_processed(current.id)?;
                    report.processed += 1;
                    debug!(
                        event = %current.event_name,
                        record_id = %current.id,
                        projectors = count,
                        "outbox record processed"
                    );
                }
                Ok(DispatchOutcome::Unregistered) => match self.config.unknown_events {
                    UnknownEventPolicy::MarkProcessed => {
                        warn!(
                            event = %current.event_name,
                            record_id = %current.id,
                            "no projector registered; marking processed"
                        );
                        self.store.mark_processed(current.id)?;
                        report.processed += 1;
                    }
                    UnknownEventPolicy::Fail => {
                        let error = format!(
                            "no projector registered for event '{}'",
                            current.event_name
                        );
                        self.record_failure(&current, &error, &mut report)?;
                    }
                },
                Err(err) => {
                    self.record_failure(&current, &err.to_string(), &mut report)?;
                }
            }
        }

        Ok(report)
    }

    fn record_failure(
        &self,
        record: &OutboxRecord,
        error: &str,
        report: &mut ProcessingReport,
    ) -> Result<(), OutboxStoreError> {
        let attempts = self.store.increment_attempt(record.id, error)?;

        if attempts >= self.config.max_attempts {
            self.store.mark_failed(record.id, error)?;
            warn!(
                event = %record.event_name,
                record_id = %record.id,
                attempts,
                error,
                "outbox record failed permanently"
            );
        } else {
            debug!(
                event = %record.event_name,
                record_id = %record.id,
                attempts,
                error,
                "outbox record dispatch failed; will retry"
            );
        }

        report.failed += 1;
        Ok(())
    }
}
