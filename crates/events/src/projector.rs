use thiserror::Error;

use crate::envelope::EventEnvelope;

/// Error raised by a projector while applying an envelope.
///
/// The consumer recovers from these per record (retry bookkeeping); they are
/// never fatal to a batch.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// The payload did not match the schema the event name promises.
    #[error("failed to decode payload for '{event}': {reason}")]
    Decode { event: String, reason: String },

    /// The envelope is missing context the read model requires (e.g. a
    /// clinic-scoped projection received an envelope without a clinic id).
    #[error("missing context for '{event}': {reason}")]
    MissingContext { event: String, reason: String },

    /// The read-model store rejected the update.
    #[error("read model update failed: {0}")]
    ReadModel(String),
}

impl ProjectError {
    pub fn decode(envelope: &EventEnvelope, reason: impl Into<String>) -> Self {
        Self::Decode {
            event: envelope.event().to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing_context(envelope: &EventEnvelope, reason: impl Into<String>) -> Self {
        Self::MissingContext {
            event: envelope.event().to_string(),
            reason: reason.into(),
        }
    }
}

/// Materializes read models from event envelopes.
///
/// One implementation per event name (or family), registered in a
/// [`ProjectorRegistry`](crate::ProjectorRegistry) at startup.
///
/// ## Idempotency
///
/// Delivery is at-least-once: a crash between dispatch and the processed-mark
/// re-delivers the same envelope later. Applying an envelope twice must not
/// duplicate read-model effects. Use the entity id carried in the payload as
/// the upsert key, and guard denormalized counters with an id set (check the
/// id is not already projected before incrementing).
///
/// ## Clinic isolation
///
/// The envelope carries `clinic_id`; projectors scope every read-model write
/// to it so one clinic's events can never leak into another's rows.
pub trait Projector: Send + Sync {
    /// Stable name for logging/diagnostics.
    fn name(&self) -> &'static str;

    /// Apply one envelope to the read model.
    ///
    /// Errors are recovered by the consumer and recorded against the outbox
    /// row (`last_error`, attempt counter).
    fn project(&self, envelope: &EventEnvelope) -> Result<(), ProjectError>;
}
