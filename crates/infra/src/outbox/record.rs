//! Durable outbox row: the persisted form of an event envelope plus
//! processing state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use curaflow_core::{ClinicId, RequestId, UserId};
use curaflow_events::{EventContext, EventEnvelope};

/// Surrogate key of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxRecordId(pub Uuid);

impl OutboxRecordId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for OutboxRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxRecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processing state of an outbox record.
///
/// `Processed` and `Failed` are absorbing: once a record is terminal it is
/// never mutated again (and never claimed again).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting for the consumer (or mid-retry, attempts below the ceiling).
    Pending,
    /// Successfully dispatched to all registered projectors.
    Processed,
    /// Retry ceiling exhausted; not retried automatically.
    Failed,
}

impl OutboxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Processed | OutboxStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processed => "processed",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processed" => Ok(OutboxStatus::Processed),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status '{other}'")),
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durable outbox row.
///
/// Created `pending`/`attempts = 0` atomically with the business mutation
/// that produced the envelope; mutated only through the store's operations;
/// never deleted (append-only audit trail).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: OutboxRecordId,
    pub clinic_id: Option<ClinicId>,
    pub event_name: String,
    pub payload: JsonValue,
    pub request_id: Option<RequestId>,
    pub user_id: Option<UserId>,
    /// Business time of the occurrence. Drives consumption order.
    pub occurred_at: DateTime<Utc>,
    /// When the row was persisted.
    pub recorded_at: DateTime<Utc>,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// Build a fresh pending row from an envelope.
    pub fn from_envelope(envelope: &EventEnvelope) -> Self {
        let now = Utc::now();
        Self {
            id: OutboxRecordId::new(),
            clinic_id: envelope.clinic_id(),
            event_name: envelope.event().to_string(),
            payload: envelope.payload().clone(),
            request_id: envelope.request_id(),
            user_id: envelope.user_id(),
            occurred_at: envelope.occurred_at(),
            recorded_at: now,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reconstruct the envelope this row was recorded from.
    pub fn envelope(&self) -> EventEnvelope {
        EventEnvelope::from_stored(
            self.event_name.clone(),
            self.occurred_at,
            EventContext {
                request_id: self.request_id,
                user_id: self.user_id,
                clinic_id: self.clinic_id,
            },
            self.payload.clone(),
        )
    }
}
