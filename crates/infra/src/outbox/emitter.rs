//! Event emission into the outbox, coupled to the caller's transaction.

use tracing::debug;

use curaflow_events::EventEnvelope;

use super::record::OutboxRecord;
use super::store::{OutboxStore, OutboxStoreError};

/// Appends envelopes to the outbox as part of the caller's active
/// transaction.
///
/// Guarantee: if the surrounding transaction commits, exactly one pending
/// outbox record exists per emitted envelope; if it rolls back, none exist.
/// Emission never dispatches to projectors synchronously, and storage errors
/// propagate to the caller (failing the caller's mutation along with them).
pub trait EventEmitter {
    fn emit(&mut self, envelope: EventEnvelope) -> Result<(), OutboxStoreError>;
}

/// Emitter over an [`OutboxStore`] that models the caller's transaction by
/// staging appends until `commit`.
///
/// The service layer creates one per unit of work, emits alongside its
/// mutations, and commits (or rolls back) both together:
///
/// ```ignore
/// let mut emitter = StagedEmitter::new(store.clone());
/// let patient = roster.insert(cmd)?;           // business mutation
/// emitter.emit(EventEnvelope::from_event(&event, ctx)?)?;
/// emitter.commit()?;                           // nothing durable before this
/// ```
///
/// Dropping the emitter without committing discards the staged envelopes —
/// the rollback path.
#[derive(Debug)]
pub struct StagedEmitter<S: OutboxStore> {
    store: S,
    staged: Vec<EventEnvelope>,
}

impl<S: OutboxStore> StagedEmitter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            staged: Vec::new(),
        }
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Flush all staged envelopes to the store.
    pub fn commit(mut self) -> Result<Vec<OutboxRecord>, OutboxStoreError> {
        let mut records = Vec::with_capacity(self.staged.len());
        for envelope in self.staged.drain(..) {
            let record = self.store.append(&envelope)?;
            debug!(event = %record.event_name, record_id = %record.id, "outbox record appended");
            records.push(record);
        }
        Ok(records)
    }

    /// Discard the staged envelopes without writing anything.
    pub fn rollback(mut self) {
        self.staged.clear();
    }
}

impl<S: OutboxStore> EventEmitter for StagedEmitter<S> {
    fn emit(&mut self, envelope: EventEnvelope) -> Result<(), OutboxStoreError> {
        self.staged.push(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Map;

    use crate::outbox::store::InMemoryOutboxStore;
    use crate::outbox::record::OutboxStatus;

    use super::*;

    fn envelope(name: &str) -> EventEnvelope {
        EventEnvelope::new(name, Utc::now(), Map::new())
    }

    #[test]
    fn commit_produces_exactly_one_pending_record_per_emit() {
        let store = InMemoryOutboxStore::arc();
        let mut emitter = StagedEmitter::new(store.clone());

        emitter.emit(envelope("patients.patient.registered")).unwrap();
        emitter.emit(envelope("visits.visit.opened")).unwrap();

        assert_eq!(store.count_pending().unwrap(), 0);
        let records = emitter.commit().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(store.count_pending().unwrap(), 2);
        for record in records {
            assert_eq!(record.status, OutboxStatus::Pending);
            assert_eq!(record.attempts, 0);
        }
    }

    #[test]
    fn rollback_leaves_no_records() {
        let store = InMemoryOutboxStore::arc();
        let mut emitter = StagedEmitter::new(store.clone());

        emitter.emit(envelope("billing.invoice.issued")).unwrap();
        emitter.rollback();

        assert_eq!(store.count_pending().unwrap(), 0);
    }

    #[test]
    fn dropping_an_uncommitted_emitter_writes_nothing() {
        let store = InMemoryOutboxStore::arc();
        {
            let mut emitter = StagedEmitter::new(store.clone());
            emitter.emit(envelope("billing.payment.recorded")).unwrap();
        }
        assert_eq!(store.count_pending().unwrap(), 0);
    }
}
