//! Transactional outbox: durable event log + idempotent consumption.
//!
//! Domain actions are recorded as [`EventEnvelope`](curaflow_events::EventEnvelope)s
//! in the same transaction as the business mutation that produced them
//! (emitter), then picked up by the [`OutboxConsumer`] and dispatched to
//! projectors. Delivery is at-least-once; projectors are idempotent.

pub mod consumer;
pub mod emitter;
pub mod postgres;
pub mod record;
pub mod store;

pub use consumer::{ConsumerConfig, OutboxConsumer, ProcessingReport};
pub use emitter::{EventEmitter, StagedEmitter};
pub use postgres::{PgEventEmitter, PostgresOutboxStore};
pub use record::{OutboxRecord, OutboxRecordId, OutboxStatus};
pub use store::{InMemoryOutboxStore, OutboxStore, OutboxStoreError};
