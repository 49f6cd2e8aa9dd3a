pub mod outbox_worker;

pub use outbox_worker::{drain, run_once, OutboxWorker, WorkerHandle};
