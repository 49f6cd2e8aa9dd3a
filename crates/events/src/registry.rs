//! Event-name → projector routing table.
//!
//! Built explicitly at startup. There is no reflection or string-to-type
//! dispatch: every event name a deployment consumes is registered here, and
//! anything else is handled per [`UnknownEventPolicy`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::envelope::EventEnvelope;
use crate::projector::{ProjectError, Projector};

/// What the consumer does with an envelope whose event name has no
/// registered projector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownEventPolicy {
    /// Mark the record processed and log a warning (default).
    ///
    /// An unregistered name is a wiring gap, not bad data; retrying cannot
    /// fix it, and a permanently-failing row would pollute failure counts.
    #[default]
    MarkProcessed,

    /// Route the record through the normal failure path (attempt counter,
    /// `last_error`, eventually failed). For deployments that prefer loud
    /// failure over silent drops.
    Fail,
}

/// Outcome of dispatching one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// All registered projectors applied the envelope; count included.
    Projected(usize),
    /// No projector is registered for the envelope's event name.
    Unregistered,
}

/// Registry of projectors, keyed by exact event name.
///
/// Multiple projectors may subscribe to the same event name; dispatch is
/// all-or-nothing per envelope (the first projector error aborts the
/// remaining ones and surfaces to the consumer).
#[derive(Default)]
pub struct ProjectorRegistry {
    projectors: HashMap<String, Vec<Arc<dyn Projector>>>,
}

impl ProjectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a projector for one event name. Call once per subscription
    /// at startup.
    pub fn register(&mut self, event_name: impl Into<String>, projector: Arc<dyn Projector>) {
        self.projectors
            .entry(event_name.into())
            .or_default()
            .push(projector);
    }

    pub fn is_registered(&self, event_name: &str) -> bool {
        self.projectors.contains_key(event_name)
    }

    /// Event names with at least one subscription (sorted, for diagnostics).
    pub fn registered_events(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.projectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Dispatch an envelope to every projector registered for its name.
    pub fn dispatch(&self, envelope: &EventEnvelope) -> Result<DispatchOutcome, ProjectError> {
        let Some(projectors) = self.projectors.get(envelope.event()) else {
            return Ok(DispatchOutcome::Unregistered);
        };

        for projector in projectors {
            projector.project(envelope)?;
            debug!(
                event = envelope.event(),
                projector = projector.name(),
                "envelope projected"
            );
        }

        Ok(DispatchOutcome::Projected(projectors.len()))
    }
}

impl core::fmt::Debug for ProjectorRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectorRegistry")
            .field("events", &self.registered_events())
            .finish()
    }
}
