use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use curaflow_events::DomainEvent;

/// Patient identifier (clinic-scoped via the envelope's `clinic_id`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(pub Uuid);

impl PatientId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for PatientId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PatientId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A patient was registered at a clinic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRegistered {
    pub patient_id: PatientId,
    pub given_name: String,
    pub family_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent for PatientRegistered {
    fn event_type(&self) -> &'static str {
        Self::EVENT
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl PatientRegistered {
    pub const EVENT: &'static str = "patients.patient.registered";
}

/// A patient record was archived (soft removal from the active roster).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientArchived {
    pub patient_id: PatientId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent for PatientArchived {
    fn event_type(&self) -> &'static str {
        Self::EVENT
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl PatientArchived {
    pub const EVENT: &'static str = "patients.patient.archived";
}

#[cfg(test)]
mod tests {
    use curaflow_events::{EventContext, EventEnvelope};

    use super::*;

    #[test]
    fn registered_event_round_trips_through_envelope() {
        let event = PatientRegistered {
            patient_id: PatientId::new(),
            given_name: "Ada".to_string(),
            family_name: "Lovelace".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 3, 14),
            occurred_at: Utc::now(),
        };

        let envelope = EventEnvelope::from_event(&event, EventContext::new()).unwrap();
        assert_eq!(envelope.event(), PatientRegistered::EVENT);

        let decoded: PatientRegistered =
            serde_json::from_value(envelope.payload().clone()).unwrap();
        assert_eq!(decoded, event);
    }
}
