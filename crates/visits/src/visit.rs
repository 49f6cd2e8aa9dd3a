use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use curaflow_events::DomainEvent;
use curaflow_patients::PatientId;

/// Visit identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitId(pub Uuid);

impl VisitId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for VisitId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for VisitId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Treatment identifier (one row per treatment performed during a visit).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreatmentId(pub Uuid);

impl TreatmentId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TreatmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for TreatmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A visit was opened for a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitOpened {
    pub visit_id: VisitId,
    pub patient_id: PatientId,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent for VisitOpened {
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

impl VisitOpened {
    pub const EVENT: &'static str = "visits.visit.opened";
}

/// A treatment was performed and recorded against an open visit.
///
/// `treatment_id` is the natural dedup key for projections: the visit
/// summary's treatment counter must not move twice for the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentAdded {
    pub visit_id: VisitId,
    pub treatment_id: TreatmentId,
    pub code: String,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent for TreatmentAdded {
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

impl TreatmentAdded {
    pub const EVENT: &'static str = "visits.visit.treatment_added";
}

/// A visit was closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitClosed {
    pub visit_id: VisitId,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent for VisitClosed {
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

impl VisitClosed {
    pub const EVENT: &'static str = "visits.visit.closed";
}

#[cfg(test)]
mod tests {
    use curaflow_events::{EventContext, EventEnvelope};

    use super::*;

    #[test]
    fn treatment_added_payload_is_flat_and_decodable() {
        let event = TreatmentAdded {
            visit_id: VisitId::new(),
            treatment_id: TreatmentId::new(),
            code: "D1110".to_string(),
            description: Some("prophylaxis".to_string()),
            occurred_at: Utc::now(),
        };

        let envelope = EventEnvelope::from_event(&event, EventContext::new()).unwrap();
        assert_eq!(envelope.event(), TreatmentAdded::EVENT);
        assert!(envelope.payload().get("treatment_id").is_some());

        let decoded: TreatmentAdded = serde_json::from_value(envelope.payload().clone()).unwrap();
        assert_eq!(decoded, event);
    }
}
