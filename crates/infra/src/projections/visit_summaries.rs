//! Visit summaries projection.
//!
//! One row per visit with its treatment tally. The treatment id set is the
//! idempotency guard: re-delivered `treatment_added` envelopes do not move
//! the count.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use curaflow_core::ClinicId;
use curaflow_events::{EventEnvelope, ProjectError, Projector};
use curaflow_patients::PatientId;
use curaflow_visits::{TreatmentAdded, TreatmentId, VisitClosed, VisitId, VisitOpened};

use crate::read_model::ClinicStore;

use super::{decode_payload, require_clinic};

/// Read model: per-visit summary.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitSummary {
    pub visit_id: VisitId,
    pub patient_id: Option<PatientId>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub treatment_ids: BTreeSet<TreatmentId>,
}

impl VisitSummary {
    fn stub(visit_id: VisitId) -> Self {
        Self {
            visit_id,
            patient_id: None,
            opened_at: None,
            closed_at: None,
            treatment_ids: BTreeSet::new(),
        }
    }

    pub fn treatment_count(&self) -> usize {
        self.treatment_ids.len()
    }

    pub fn is_open(&self) -> bool {
        self.opened_at.is_some() && self.closed_at.is_none()
    }
}

/// Projects visit lifecycle events into per-visit summaries.
#[derive(Debug)]
pub struct VisitSummariesProjection<S>
where
    S: ClinicStore<VisitId, VisitSummary>,
{
    store: S,
}

impl<S> VisitSummariesProjection<S>
where
    S: ClinicStore<VisitId, VisitSummary>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn get(&self, clinic_id: ClinicId, visit_id: &VisitId) -> Option<VisitSummary> {
        self.store.get(clinic_id, visit_id)
    }

    pub fn list(&self, clinic_id: ClinicId) -> Vec<VisitSummary> {
        self.store.list(clinic_id)
    }

    fn entry_or_stub(&self, clinic_id: ClinicId, visit_id: VisitId) -> VisitSummary {
        self.store
            .get(clinic_id, &visit_id)
            .unwrap_or_else(|| VisitSummary::stub(visit_id))
    }
}

impl<S> Projector for VisitSummariesProjection<S>
where
    S: ClinicStore<VisitId, VisitSummary>,
{
    fn name(&self) -> &'static str {
        "visits.summaries"
    }

    fn project(&self, envelope: &EventEnvelope) -> Result<(), ProjectError> {
        let clinic_id = require_clinic(envelope)?;

        match envelope.event() {
            VisitOpened::EVENT => {
                let event: VisitOpened = decode_payload(envelope)?;
                let mut summary = self.entry_or_stub(clinic_id, event.visit_id);
                summary.patient_id = Some(event.patient_id);
                summary.opened_at = Some(event.occurred_at);
                self.store.upsert(clinic_id, event.visit_id, summary);
            }
            TreatmentAdded::EVENT => {
                let event: TreatmentAdded = decode_payload(envelope)?;
                let mut summary = self.entry_or_stub(clinic_id, event.visit_id);
                summary.treatment_ids.insert(event.treatment_id);
                self.store.upsert(clinic_id, event.visit_id, summary);
            }
            VisitClosed::EVENT => {
                let event: VisitClosed = decode_payload(envelope)?;
                let mut summary = self.entry_or_stub(clinic_id, event.visit_id);
                summary.closed_at = Some(event.occurred_at);
                self.store.upsert(clinic_id, event.visit_id, summary);
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use curaflow_events::EventContext;

    use crate::read_model::InMemoryClinicStore;

    use super::*;

    fn envelope<E>(event: &E, clinic_id: ClinicId) -> EventEnvelope
    where
        E: curaflow_events::DomainEvent + serde::Serialize,
    {
        EventEnvelope::from_event(event, EventContext::for_clinic(clinic_id)).unwrap()
    }

    #[test]
    fn open_treat_close_builds_the_summary() {
        let store = Arc::new(InMemoryClinicStore::new());
        let proj = VisitSummariesProjection::new(store);
        let clinic = ClinicId::new();
        let visit = VisitId::new();
        let patient = PatientId::new();

        proj.project(&envelope(
            &VisitOpened {
                visit_id: visit,
                patient_id: patient,
                occurred_at: Utc::now(),
            },
            clinic,
        ))
        .unwrap();

        for code in ["D1110", "D0120"] {
            proj.project(&envelope(
                &TreatmentAdded {
                    visit_id: visit,
                    treatment_id: TreatmentId::new(),
                    code: code.to_string(),
                    description: None,
                    occurred_at: Utc::now(),
                },
                clinic,
            ))
            .unwrap();
        }

        let summary = proj.get(clinic, &visit).unwrap();
        assert!(summary.is_open());
        assert_eq!(summary.treatment_count(), 2);
        assert_eq!(summary.patient_id, Some(patient));

        proj.project(&envelope(
            &VisitClosed {
                visit_id: visit,
                occurred_at: Utc::now(),
            },
            clinic,
        ))
        .unwrap();

        assert!(!proj.get(clinic, &visit).unwrap().is_open());
    }

    #[test]
    fn redelivered_treatment_does_not_double_count() {
        let store = Arc::new(InMemoryClinicStore::new());
        let proj = VisitSummariesProjection::new(store);
        let clinic = ClinicId::new();
        let visit = VisitId::new();

        let treatment = TreatmentAdded {
            visit_id: visit,
            treatment_id: TreatmentId::new(),
            code: "D1110".to_string(),
            description: None,
            occurred_at: Utc::now(),
        };
        let env = envelope(&treatment, clinic);
        proj.project(&env).unwrap();
        proj.project(&env).unwrap();

        assert_eq!(proj.get(clinic, &visit).unwrap().treatment_count(), 1);
    }

    #[test]
    fn treatment_before_open_creates_a_stub_row() {
        let store = Arc::new(InMemoryClinicStore::new());
        let proj = VisitSummariesProjection::new(store);
        let clinic = ClinicId::new();
        let visit = VisitId::new();

        proj.project(&envelope(
            &TreatmentAdded {
                visit_id: visit,
                treatment_id: TreatmentId::new(),
                code: "D1110".to_string(),
                description: None,
                occurred_at: Utc::now(),
            },
            clinic,
        ))
        .unwrap();

        let summary = proj.get(clinic, &visit).unwrap();
        assert_eq!(summary.treatment_count(), 1);
        assert!(summary.opened_at.is_none());

        // The late-arriving open fills in the rest.
        proj.project(&envelope(
            &VisitOpened {
                visit_id: visit,
                patient_id: PatientId::new(),
                occurred_at: Utc::now(),
            },
            clinic,
        ))
        .unwrap();

        let summary = proj.get(clinic, &visit).unwrap();
        assert_eq!(summary.treatment_count(), 1);
        assert!(summary.is_open());
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let store = Arc::new(InMemoryClinicStore::new());
        let proj = VisitSummariesProjection::new(store);

        let mut payload = serde_json::Map::new();
        payload.insert("visit_id".to_string(), serde_json::json!("not-a-uuid"));
        let env = EventEnvelope::new(VisitOpened::EVENT, Utc::now(), payload)
            .with_context(EventContext::for_clinic(ClinicId::new()));

        assert!(matches!(
            proj.project(&env),
            Err(ProjectError::Decode { .. })
        ));
    }
}
