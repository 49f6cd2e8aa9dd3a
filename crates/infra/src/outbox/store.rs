//! Outbox storage implementations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::Utc;

use curaflow_events::EventEnvelope;

use super::record::{OutboxRecord, OutboxRecordId, OutboxStatus};

/// Outbox store abstraction.
///
/// Records are never physically deleted by normal operation; retention is a
/// separate housekeeping concern. All mutation of outbox rows goes through
/// these operations — no other writer touches them.
pub trait OutboxStore: Send + Sync {
    /// Insert a pending row for the envelope.
    fn append(&self, envelope: &EventEnvelope) -> Result<OutboxRecord, OutboxStoreError>;

    /// Get a record by id.
    fn get(&self, id: OutboxRecordId) -> Result<Option<OutboxRecord>, OutboxStoreError>;

    /// Claim up to `limit` records with `status = pending` and
    /// `attempts < max_attempts`, ordered by ascending `occurred_at`.
    ///
    /// Safe under concurrent callers: no two concurrent claims return the
    /// same record. A claim is released when the record's status or attempt
    /// counter is next mutated.
    fn claim_pending_batch(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxRecord>, OutboxStoreError>;

    /// Transition a pending record to `processed`. Idempotent: a record that
    /// is already processed is left untouched.
    fn mark_processed(&self, id: OutboxRecordId) -> Result<(), OutboxStoreError>;

    /// Transition a pending record to `failed`, recording the error.
    fn mark_failed(&self, id: OutboxRecordId, error: &str) -> Result<(), OutboxStoreError>;

    /// Record a failed attempt: increment the counter, store `last_error`,
    /// leave the record pending. Returns the post-increment attempt count.
    fn increment_attempt(&self, id: OutboxRecordId, error: &str) -> Result<u32, OutboxStoreError>;

    fn count_pending(&self) -> Result<u64, OutboxStoreError>;

    fn count_failed(&self) -> Result<u64, OutboxStoreError>;
}

/// Outbox store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OutboxStoreError {
    #[error("outbox record not found: {0}")]
    NotFound(OutboxRecordId),

    /// The record is in an absorbing state and cannot be mutated.
    #[error("outbox record {id} is terminal ({status})")]
    Terminal { id: OutboxRecordId, status: OutboxStatus },

    #[error("storage error: {0}")]
    Storage(String),
}

impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    fn append(&self, envelope: &EventEnvelope) -> Result<OutboxRecord, OutboxStoreError> {
        (**self).append(envelope)
    }

    fn get(&self, id: OutboxRecordId) -> Result<Option<OutboxRecord>, OutboxStoreError> {
        (**self).get(id)
    }

    fn claim_pending_batch(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxRecord>, OutboxStoreError> {
        (**self).claim_pending_batch(limit, max_attempts)
    }

    fn mark_processed(&self, id: OutboxRecordId) -> Result<(), OutboxStoreError> {
        (**self).mark_processed(id)
    }

    fn mark_failed(&self, id: OutboxRecordId, error: &str) -> Result<(), OutboxStoreError> {
        (**self).mark_failed(id, error)
    }

    fn increment_attempt(&self, id: OutboxRecordId, error: &str) -> Result<u32, OutboxStoreError> {
        (**self).increment_attempt(id, error)
    }

    fn count_pending(&self) -> Result<u64, OutboxStoreError> {
        (**self).count_pending()
    }

    fn count_failed(&self) -> Result<u64, OutboxStoreError> {
        (**self).count_failed()
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<OutboxRecordId, OutboxRecord>,
    /// Ids handed out by `claim_pending_batch` and not yet released by a
    /// status/attempt mutation. Mirrors the lease a database row lock gives
    /// the Postgres store.
    claimed: HashSet<OutboxRecordId>,
}

/// In-memory outbox store for tests/dev.
///
/// All state lives under one lock, so a claim and its bookkeeping are atomic
/// with respect to concurrent claimers in the same process.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    inner: RwLock<Inner>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock_err() -> OutboxStoreError {
        OutboxStoreError::Storage("lock poisoned".to_string())
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn append(&self, envelope: &EventEnvelope) -> Result<OutboxRecord, OutboxStoreError> {
        let record = OutboxRecord::from_envelope(envelope);
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn get(&self, id: OutboxRecordId) -> Result<Option<OutboxRecord>, OutboxStoreError> {
        let inner = self.inner.read().map_err(|_| Self::lock_err())?;
        Ok(inner.records.get(&id).cloned())
    }

    fn claim_pending_batch(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxRecord>, OutboxStoreError> {
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;

        let mut candidates: Vec<OutboxRecord> = inner
            .records
            .values()
            .filter(|r| {
                r.status == OutboxStatus::Pending
                    && r.attempts < max_attempts
                    && !inner.claimed.contains(&r.id)
            })
            .cloned()
            .collect();

        // FIFO by business time; ties broken arbitrarily.
        candidates.sort_by_key(|r| r.occurred_at);
        candidates.truncate(limit);

        for record in &candidates {
            inner.claimed.insert(record.id);
        }

        Ok(candidates)
    }

    fn mark_processed(&self, id: OutboxRecordId) -> Result<(), OutboxStoreError> {
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;
        inner.claimed.remove(&id);
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(OutboxStoreError::NotFound(id))?;

        match record.status {
            OutboxStatus::Pending => {
                record.status = OutboxStatus::Processed;
                record.updated_at = Utc::now();
                Ok(())
            }
            // A concurrent worker won the race; nothing to do.
            OutboxStatus::Processed => Ok(()),
            OutboxStatus::Failed => Err(OutboxStoreError::Terminal {
                id,
                status: record.status,
            }),
        }
    }

    fn mark_failed(&self, id: OutboxRecordId, error: &str) -> Result<(), OutboxStoreError> {
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;
        inner.claimed.remove(&id);
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(OutboxStoreError::NotFound(id))?;

        if record.status.is_terminal() {
            return Err(OutboxStoreError::Terminal {
                id,
                status: record.status,
            });
        }

        record.status = OutboxStatus::Failed;
        record.last_error = Some(error.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    fn increment_attempt(&self, id: OutboxRecordId, error: &str) -> Result<u32, OutboxStoreError> {
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;
        inner.claimed.remove(&id);
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(OutboxStoreError::NotFound(id))?;

        if record.status.is_terminal() {
            return Err(OutboxStoreError::Terminal {
                id,
                status: record.status,
            });
        }

        record.attempts += 1;
        record.last_error = Some(error.to_string());
        record.updated_at = Utc::now();
        Ok(record.attempts)
    }

    fn count_pending(&self) -> Result<u64, OutboxStoreError> {
        let inner = self.inner.read().map_err(|_| Self::lock_err())?;
        Ok(inner
            .records
            .values()
            .filter(|r| r.status == OutboxStatus::Pending)
            .count() as u64)
    }

    fn count_failed(&self) -> Result<u64, OutboxStoreError> {
        let inner = self.inner.read().map_err(|_| Self::lock_err())?;
        Ok(inner
            .records
            .values()
            .filter(|r| r.status == OutboxStatus::Failed)
            .count() as u64)
    }
}
