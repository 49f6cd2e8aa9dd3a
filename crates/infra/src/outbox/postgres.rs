//! Postgres-backed outbox implementation.
//!
//! The `outbox_events` table is the durable form of [`OutboxRecord`]. Claims
//! take a short lease (`claimed_at`) with `FOR UPDATE SKIP LOCKED`, so any
//! number of consumer processes can poll the same table without handing the
//! same row to two of them. Rows stay `pending` while leased; a consumer that
//! crashes mid-batch simply lets the lease expire and the row is claimed
//! again.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to [`OutboxStoreError::Storage`] with the failing
//! operation named in the message; `RowNotFound` on a status transition maps
//! to [`OutboxStoreError::NotFound`] / [`OutboxStoreError::Terminal`] at the
//! call site via a status re-read.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};

use curaflow_core::{ClinicId, RequestId, UserId};
use curaflow_events::EventEnvelope;

use super::emitter::EventEmitter;
use super::record::{OutboxRecord, OutboxRecordId, OutboxStatus};
use super::store::{OutboxStore, OutboxStoreError};

const DEFAULT_CLAIM_LEASE_SECONDS: i64 = 60;

/// Postgres-backed outbox store.
///
/// ## Thread Safety
///
/// Wraps an SQLx connection pool (Arc + Send + Sync); clones share the pool.
///
/// ## Sync bridge
///
/// [`OutboxStore`] is synchronous; the trait impl bridges onto the current
/// tokio runtime with `Handle::block_on`, same as the async inherent methods
/// but callable from worker threads spawned inside a runtime.
#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: Arc<PgPool>,
    claim_lease: Duration,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            claim_lease: Duration::seconds(DEFAULT_CLAIM_LEASE_SECONDS),
        }
    }

    /// Override the claim lease. Must exceed the worst-case time to process
    /// one batch, otherwise a slow consumer's rows get double-dispatched
    /// (which projectors tolerate, but it wastes work).
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    #[instrument(skip(self, envelope), fields(event = %envelope.event()), err)]
    pub async fn append_async(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<OutboxRecord, OutboxStoreError> {
        let record = OutboxRecord::from_envelope(envelope);
        insert_record(&*self.pool, &record).await?;
        Ok(record)
    }

    #[instrument(skip(self), fields(record_id = %id), err)]
    pub async fn get_async(
        &self,
        id: OutboxRecordId,
    ) -> Result<Option<OutboxRecord>, OutboxStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM outbox_events WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|row| decode_row(&row)).transpose()
    }

    /// Claim up to `limit` dispatchable rows, oldest business time first.
    ///
    /// One statement: the sub-select locks candidate rows with
    /// `FOR UPDATE SKIP LOCKED` (rows locked by a concurrent claimer are
    /// skipped, not waited on) and the outer UPDATE stamps `claimed_at`.
    /// Rows whose previous lease has expired are candidates again.
    #[instrument(
        skip(self),
        fields(limit, max_attempts, claimed = tracing::field::Empty),
        err
    )]
    pub async fn claim_pending_batch_async(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxRecord>, OutboxStoreError> {
        let lease_cutoff = Utc::now() - self.claim_lease;

        let rows = sqlx::query(&format!(
            r#"
            UPDATE outbox_events
            SET claimed_at = NOW(), updated_at = NOW()
            WHERE id IN (
                SELECT id FROM outbox_events
                WHERE status = 'pending'
                    AND attempts < $1
                    AND (claimed_at IS NULL OR claimed_at < $2)
                ORDER BY occurred_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COLUMNS}
            "#
        ))
        .bind(max_attempts as i32)
        .bind(lease_cutoff)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_pending_batch", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(decode_row(&row)?);
        }
        // RETURNING does not preserve the sub-select's order.
        records.sort_by_key(|r| r.occurred_at);

        Span::current().record("claimed", records.len());
        Ok(records)
    }

    #[instrument(skip(self), fields(record_id = %id), err)]
    pub async fn mark_processed_async(&self, id: OutboxRecordId) -> Result<(), OutboxStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'processed', claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.0)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_processed", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // No pending row matched: already processed (fine) or failed/missing.
        match self.get_async(id).await? {
            Some(record) if record.status == OutboxStatus::Processed => Ok(()),
            Some(record) => Err(OutboxStoreError::Terminal {
                id,
                status: record.status,
            }),
            None => Err(OutboxStoreError::NotFound(id)),
        }
    }

    #[instrument(skip(self, error), fields(record_id = %id), err)]
    pub async fn mark_failed_async(
        &self,
        id: OutboxRecordId,
        error: &str,
    ) -> Result<(), OutboxStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'failed', last_error = $2, claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.0)
        .bind(error)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_failed", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get_async(id).await? {
            Some(record) => Err(OutboxStoreError::Terminal {
                id,
                status: record.status,
            }),
            None => Err(OutboxStoreError::NotFound(id)),
        }
    }

    #[instrument(skip(self, error), fields(record_id = %id), err)]
    pub async fn increment_attempt_async(
        &self,
        id: OutboxRecordId,
        error: &str,
    ) -> Result<u32, OutboxStoreError> {
        let row = sqlx::query(
            r#"
            UPDATE outbox_events
            SET attempts = attempts + 1, last_error = $2, claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING attempts
            "#,
        )
        .bind(id.0)
        .bind(error)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("increment_attempt", e))?;

        match row {
            Some(row) => {
                let attempts: i32 = row
                    .try_get("attempts")
                    .map_err(|e| map_sqlx_error("increment_attempt", e))?;
                Ok(attempts as u32)
            }
            None => match self.get_async(id).await? {
                Some(record) => Err(OutboxStoreError::Terminal {
                    id,
                    status: record.status,
                }),
                None => Err(OutboxStoreError::NotFound(id)),
            },
        }
    }

    pub async fn count_by_status(&self, status: OutboxStatus) -> Result<u64, OutboxStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM outbox_events WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_by_status", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| map_sqlx_error("count_by_status", e))?;
        Ok(total as u64)
    }
}

fn runtime_handle() -> Result<tokio::runtime::Handle, OutboxStoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        OutboxStoreError::Storage(
            "PostgresOutboxStore requires a tokio runtime context".to_string(),
        )
    })
}

impl OutboxStore for PostgresOutboxStore {
    fn append(&self, envelope: &EventEnvelope) -> Result<OutboxRecord, OutboxStoreError> {
        runtime_handle()?.block_on(self.append_async(envelope))
    }

    fn get(&self, id: OutboxRecordId) -> Result<Option<OutboxRecord>, OutboxStoreError> {
        runtime_handle()?.block_on(self.get_async(id))
    }

    fn claim_pending_batch(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxRecord>, OutboxStoreError> {
        runtime_handle()?.block_on(self.claim_pending_batch_async(limit, max_attempts))
    }

    fn mark_processed(&self, id: OutboxRecordId) -> Result<(), OutboxStoreError> {
        runtime_handle()?.block_on(self.mark_processed_async(id))
    }

    fn mark_failed(&self, id: OutboxRecordId, error: &str) -> Result<(), OutboxStoreError> {
        runtime_handle()?.block_on(self.mark_failed_async(id, error))
    }

    fn increment_attempt(&self, id: OutboxRecordId, error: &str) -> Result<u32, OutboxStoreError> {
        runtime_handle()?.block_on(self.increment_attempt_async(id, error))
    }

    fn count_pending(&self) -> Result<u64, OutboxStoreError> {
        runtime_handle()?.block_on(self.count_by_status(OutboxStatus::Pending))
    }

    fn count_failed(&self) -> Result<u64, OutboxStoreError> {
        runtime_handle()?.block_on(self.count_by_status(OutboxStatus::Failed))
    }
}

/// Emitter that writes outbox rows through the caller's open transaction.
///
/// The service layer opens a transaction, performs its business mutation,
/// emits, and commits; the outbox insert shares the transaction's fate. This
/// is the production counterpart of
/// [`StagedEmitter`](super::emitter::StagedEmitter).
#[derive(Debug)]
pub struct PgEventEmitter<'t> {
    tx: &'t mut Transaction<'static, Postgres>,
    appended: Vec<OutboxRecord>,
}

impl<'t> PgEventEmitter<'t> {
    pub fn new(tx: &'t mut Transaction<'static, Postgres>) -> Self {
        Self {
            tx,
            appended: Vec::new(),
        }
    }

    pub async fn emit_async(
        &mut self,
        envelope: EventEnvelope,
    ) -> Result<OutboxRecord, OutboxStoreError> {
        let record = OutboxRecord::from_envelope(&envelope);
        insert_record(&mut **self.tx, &record).await?;
        self.appended.push(record.clone());
        Ok(record)
    }

    /// Records inserted so far. Durable only once the caller commits.
    pub fn appended(&self) -> &[OutboxRecord] {
        &self.appended
    }
}

impl EventEmitter for PgEventEmitter<'_> {
    fn emit(&mut self, envelope: EventEnvelope) -> Result<(), OutboxStoreError> {
        runtime_handle()?.block_on(self.emit_async(envelope))?;
        Ok(())
    }
}

const COLUMNS: &str = "id, clinic_id, event_name, payload, request_id, user_id, \
     occurred_at, recorded_at, status, attempts, last_error, created_at, updated_at";

async fn insert_record<'e, E>(executor: E, record: &OutboxRecord) -> Result<(), OutboxStoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO outbox_events (
            id, clinic_id, event_name, payload, request_id, user_id,
            occurred_at, recorded_at, status, attempts, last_error,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(record.id.0)
    .bind(record.clinic_id.map(|id| *id.as_uuid()))
    .bind(&record.event_name)
    .bind(&record.payload)
    .bind(record.request_id.map(|id| *id.as_uuid()))
    .bind(record.user_id.map(|id| *id.as_uuid()))
    .bind(record.occurred_at)
    .bind(record.recorded_at)
    .bind(record.status.as_str())
    .bind(record.attempts as i32)
    .bind(record.last_error.as_deref())
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("append", e))?;

    Ok(())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxStoreError {
    match err {
        sqlx::Error::Database(db_err) => OutboxStoreError::Storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            OutboxStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => OutboxStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

#[derive(Debug)]
struct OutboxRow {
    id: uuid::Uuid,
    clinic_id: Option<uuid::Uuid>,
    event_name: String,
    payload: serde_json::Value,
    request_id: Option<uuid::Uuid>,
    user_id: Option<uuid::Uuid>,
    occurred_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for OutboxRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxRow {
            id: row.try_get("id")?,
            clinic_id: row.try_get("clinic_id")?,
            event_name: row.try_get("event_name")?,
            payload: row.try_get("payload")?,
            request_id: row.try_get("request_id")?,
            user_id: row.try_get("user_id")?,
            occurred_at: row.try_get("occurred_at")?,
            recorded_at: row.try_get("recorded_at")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<OutboxRecord, OutboxStoreError> {
    let row = OutboxRow::from_row(row)
        .map_err(|e| OutboxStoreError::Storage(format!("failed to decode outbox row: {e}")))?;
    row.try_into()
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = OutboxStoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status = OutboxStatus::from_str(&row.status).map_err(OutboxStoreError::Storage)?;
        Ok(OutboxRecord {
            id: OutboxRecordId::from_uuid(row.id),
            clinic_id: row.clinic_id.map(ClinicId::from_uuid),
            event_name: row.event_name,
            payload: row.payload,
            request_id: row.request_id.map(RequestId::from_uuid),
            user_id: row.user_id.map(UserId::from_uuid),
            occurred_at: row.occurred_at,
            recorded_at: row.recorded_at,
            status,
            attempts: row.attempts as u32,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
