//! Visits domain module.
//!
//! Events emitted when visits are opened/closed and treatments are performed.
//! Pure domain types; the read-model side lives in the infra projections.

pub mod visit;

pub use visit::{TreatmentAdded, TreatmentId, VisitClosed, VisitId, VisitOpened};
