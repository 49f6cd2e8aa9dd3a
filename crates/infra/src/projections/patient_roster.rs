//! Patient roster projection.
//!
//! One row per patient per clinic, flagged archived on soft removal.

use chrono::{DateTime, NaiveDate, Utc};

use curaflow_core::ClinicId;
use curaflow_events::{EventEnvelope, ProjectError, Projector};
use curaflow_patients::{PatientArchived, PatientId, PatientRegistered};

use crate::read_model::ClinicStore;

use super::{decode_payload, require_clinic};

/// Read model: one active-roster row per patient.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientRosterEntry {
    pub patient_id: PatientId,
    pub given_name: String,
    pub family_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub registered_at: Option<DateTime<Utc>>,
    pub archived: bool,
    pub archived_reason: Option<String>,
}

impl PatientRosterEntry {
    fn stub(patient_id: PatientId) -> Self {
        Self {
            patient_id,
            given_name: String::new(),
            family_name: String::new(),
            date_of_birth: None,
            registered_at: None,
            archived: false,
            archived_reason: None,
        }
    }
}

/// Projects patient lifecycle events into the roster.
#[derive(Debug)]
pub struct PatientRosterProjection<S>
where
    S: ClinicStore<PatientId, PatientRosterEntry>,
{
    store: S,
}

impl<S> PatientRosterProjection<S>
where
    S: ClinicStore<PatientId, PatientRosterEntry>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn get(&self, clinic_id: ClinicId, patient_id: &PatientId) -> Option<PatientRosterEntry> {
        self.store.get(clinic_id, patient_id)
    }

    pub fn list(&self, clinic_id: ClinicId) -> Vec<PatientRosterEntry> {
        self.store.list(clinic_id)
    }

    pub fn list_active(&self, clinic_id: ClinicId) -> Vec<PatientRosterEntry> {
        self.store
            .list(clinic_id)
            .into_iter()
            .filter(|e| !e.archived)
            .collect()
    }

    fn entry_or_stub(&self, clinic_id: ClinicId, patient_id: PatientId) -> PatientRosterEntry {
        self.store
            .get(clinic_id, &patient_id)
            .unwrap_or_else(|| PatientRosterEntry::stub(patient_id))
    }
}

impl<S> Projector for PatientRosterProjection<S>
where
    S: ClinicStore<PatientId, PatientRosterEntry>,
{
    fn name(&self) -> &'static str {
        "patients.roster"
    }

    fn project(&self, envelope: &EventEnvelope) -> Result<(), ProjectError> {
        let clinic_id = require_clinic(envelope)?;

        match envelope.event() {
            PatientRegistered::EVENT => {
                let event: PatientRegistered = decode_payload(envelope)?;
                // Keep the archived flag if the archive event arrived first.
                let mut entry = self.entry_or_stub(clinic_id, event.patient_id);
                entry.given_name = event.given_name;
                entry.family_name = event.family_name;
                entry.date_of_birth = event.date_of_birth;
                entry.registered_at = Some(event.occurred_at);
                self.store.upsert(clinic_id, event.patient_id, entry);
            }
            PatientArchived::EVENT => {
                let event: PatientArchived = decode_payload(envelope)?;
                let mut entry = self.entry_or_stub(clinic_id, event.patient_id);
                entry.archived = true;
                entry.archived_reason = event.reason;
                self.store.upsert(clinic_id, event.patient_id, entry);
            }
            _ => {}
        }

        Ok(())
    }
}
