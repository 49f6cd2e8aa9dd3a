//! Domain event envelope + projector dispatch.
//!
//! This crate defines the uniform metadata header wrapped around every domain
//! occurrence ([`EventEnvelope`]), the trait typed events implement
//! ([`DomainEvent`]), and the projector side of the pipeline ([`Projector`],
//! [`ProjectorRegistry`]). Durable storage of envelopes is an infrastructure
//! concern and lives outside this crate.

pub mod envelope;
pub mod event;
pub mod projector;
pub mod registry;

pub use envelope::{EventContext, EventEnvelope};
pub use event::DomainEvent;
pub use projector::{ProjectError, Projector};
pub use registry::{DispatchOutcome, ProjectorRegistry, UnknownEventPolicy};
