use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use curaflow_core::{ClinicId, DomainError, DomainResult, RequestId, UserId};

use crate::event::DomainEvent;

/// Actor/tenant/correlation context captured at emission time.
///
/// The caller supplies this explicitly at the emission site; nothing here is
/// resolved from ambient process-wide state. All fields are optional (system
/// jobs emit without a user, cross-clinic maintenance without a clinic).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub request_id: Option<RequestId>,
    pub user_id: Option<UserId>,
    pub clinic_id: Option<ClinicId>,
}

impl EventContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_clinic(clinic_id: ClinicId) -> Self {
        Self {
            clinic_id: Some(clinic_id),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// Envelope for one domain occurrence: uniform metadata header + payload.
///
/// This is the unit the emitter appends to the outbox and the consumer hands
/// to projectors.
///
/// Notes:
/// - `event` is the dotted taxonomy name and uniquely determines the
///   payload's shape.
/// - Envelopes are **never mutated** after construction (private fields,
///   getters only).
/// - `payload` is a JSON object of scalar/nullable values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    event: String,
    occurred_at: DateTime<Utc>,
    request_id: Option<RequestId>,
    user_id: Option<UserId>,
    clinic_id: Option<ClinicId>,
    payload: JsonValue,
}

impl EventEnvelope {
    /// Construct an envelope from raw parts with an empty context.
    pub fn new(
        event: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: Map<String, JsonValue>,
    ) -> Self {
        Self {
            event: event.into(),
            occurred_at,
            request_id: None,
            user_id: None,
            clinic_id: None,
            payload: JsonValue::Object(payload),
        }
    }

    /// Attach emission context. Part of construction, before the envelope is
    /// handed to the emitter.
    pub fn with_context(mut self, ctx: EventContext) -> Self {
        self.request_id = ctx.request_id;
        self.user_id = ctx.user_id;
        self.clinic_id = ctx.clinic_id;
        self
    }

    /// Wrap a typed domain event.
    ///
    /// Fails if the event does not serialize to a JSON object (the payload
    /// contract is a string-keyed mapping).
    pub fn from_event<E>(event: &E, ctx: EventContext) -> DomainResult<Self>
    where
        E: DomainEvent + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| DomainError::validation(format!("payload serialization failed: {e}")))?;

        if !payload.is_object() {
            return Err(DomainError::validation(format!(
                "event '{}' did not serialize to a JSON object",
                event.event_type()
            )));
        }

        Ok(Self {
            event: event.event_type().to_string(),
            occurred_at: event.occurred_at(),
            request_id: ctx.request_id,
            user_id: ctx.user_id,
            clinic_id: ctx.clinic_id,
            payload,
        })
    }

    /// Rebuild an envelope from persisted outbox columns.
    pub fn from_stored(
        event: impl Into<String>,
        occurred_at: DateTime<Utc>,
        ctx: EventContext,
        payload: JsonValue,
    ) -> Self {
        Self {
            event: event.into(),
            occurred_at,
            request_id: ctx.request_id,
            user_id: ctx.user_id,
            clinic_id: ctx.clinic_id,
            payload,
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn into_payload(self) -> JsonValue {
        self.payload
    }

    pub fn context(&self) -> EventContext {
        EventContext {
            request_id: self.request_id,
            user_id: self.user_id,
            clinic_id: self.clinic_id,
        }
    }
}
