//! Read-model projections driven by the outbox consumer.
//!
//! Each projection owns one disposable read model in a
//! [`ClinicStore`](crate::read_model::ClinicStore) and implements
//! [`Projector`](curaflow_events::Projector). All of them tolerate
//! re-delivery and out-of-order arrival: entity ids are upsert keys, and
//! denormalized counters are guarded by id sets.

pub mod patient_balances;
pub mod patient_roster;
pub mod visit_summaries;

pub use patient_balances::{PatientBalance, PatientBalancesProjection};
pub use patient_roster::{PatientRosterEntry, PatientRosterProjection};
pub use visit_summaries::{VisitSummariesProjection, VisitSummary};

use serde::de::DeserializeOwned;

use curaflow_core::ClinicId;
use curaflow_events::{EventEnvelope, ProjectError};

pub(crate) fn decode_payload<T: DeserializeOwned>(
    envelope: &EventEnvelope,
) -> Result<T, ProjectError> {
    serde_json::from_value(envelope.payload().clone())
        .map_err(|e| ProjectError::decode(envelope, e.to_string()))
}

pub(crate) fn require_clinic(envelope: &EventEnvelope) -> Result<ClinicId, ProjectError> {
    envelope
        .clinic_id()
        .ok_or_else(|| ProjectError::missing_context(envelope, "clinic_id is required"))
}
