//! Infrastructure layer: outbox storage, consumption, read models, workers.

pub mod outbox;
pub mod projections;
pub mod read_model;
pub mod workers;

#[cfg(test)]
mod integration_tests;
