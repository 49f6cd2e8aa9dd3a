//! Patients domain module.
//!
//! Patient CRUD itself is thin plumbing; this crate carries the **events**
//! the patient service emits into the outbox, as deterministic domain types
//! (no IO, no HTTP, no storage).

pub mod patient;

pub use patient::{PatientArchived, PatientId, PatientRegistered};
