//! Background driver for the outbox consumer.
//!
//! Three entry points, smallest to largest: [`run_once`] for a single batch,
//! [`drain`] for emptying the backlog, and [`OutboxWorker::spawn`] for a
//! polling worker thread with graceful shutdown.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::outbox::{OutboxConsumer, OutboxStore, OutboxStoreError, ProcessingReport};

/// Process one batch.
pub fn run_once<S: OutboxStore>(
    consumer: &OutboxConsumer<S>,
    batch_size: Option<usize>,
) -> Result<ProcessingReport, OutboxStoreError> {
    consumer.process_pending_events(batch_size)
}

/// Repeatedly process batches until the backlog is empty, pausing between
/// batches.
///
/// Stops when a batch claims nothing and no dispatchable rows remain. Rows
/// that keep failing below the attempt ceiling stay pending, so "claims
/// nothing" is the termination condition rather than `count_pending == 0`.
pub fn drain<S: OutboxStore>(
    consumer: &OutboxConsumer<S>,
    pause: Duration,
) -> Result<ProcessingReport, OutboxStoreError> {
    let mut aggregate = ProcessingReport::default();

    loop {
        let report = consumer.process_pending_events(None)?;
        let empty = report.total == 0;
        aggregate.merge(report);

        if empty {
            break;
        }
        if !pause.is_zero() {
            thread::sleep(pause);
        }
    }

    info!(
        processed = aggregate.processed,
        failed = aggregate.failed,
        skipped = aggregate.skipped,
        "outbox drained"
    );
    Ok(aggregate)
}

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Polling outbox worker.
#[derive(Debug)]
pub struct OutboxWorker;

impl OutboxWorker {
    /// Spawn a worker thread that polls the consumer on an interval.
    ///
    /// Multiple workers may poll the same store; the store's claim operation
    /// keeps them from dispatching the same record.
    pub fn spawn<S>(
        name: &'static str,
        consumer: OutboxConsumer<S>,
        poll_interval: Duration,
    ) -> std::io::Result<WorkerHandle>
    where
        S: OutboxStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, &consumer, &shutdown_rx, poll_interval))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<S: OutboxStore>(
    name: &'static str,
    consumer: &OutboxConsumer<S>,
    shutdown_rx: &mpsc::Receiver<()>,
    poll_interval: Duration,
) {
    loop {
        match consumer.process_pending_events(None) {
            Ok(report) if report.total > 0 => {
                info!(
                    worker = name,
                    processed = report.processed,
                    failed = report.failed,
                    skipped = report.skipped,
                    "outbox batch processed"
                );
                // Backlog remains; poll again immediately.
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                continue;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(worker = name, error = %err, "outbox batch failed");
            }
        }

        // Idle (or errored): wait out the interval, waking early on shutdown.
        match shutdown_rx.recv_timeout(poll_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::Map;

    use curaflow_events::{EventEnvelope, ProjectorRegistry};

    use crate::outbox::{ConsumerConfig, InMemoryOutboxStore};

    use super::*;

    fn backlog(store: &Arc<InMemoryOutboxStore>, n: usize) {
        for _ in 0..n {
            store
                .append(&EventEnvelope::new("visits.visit.opened", Utc::now(), Map::new()))
                .unwrap();
        }
    }

    fn consumer(store: Arc<InMemoryOutboxStore>, batch_size: usize) -> OutboxConsumer<Arc<InMemoryOutboxStore>> {
        OutboxConsumer::with_config(
            store,
            Arc::new(ProjectorRegistry::new()),
            ConsumerConfig {
                batch_size,
                ..ConsumerConfig::default()
            },
        )
    }

    #[test]
    fn drain_crosses_batch_boundaries() {
        let store = InMemoryOutboxStore::arc();
        backlog(&store, 7);

        let report = drain(&consumer(store.clone(), 3), Duration::ZERO).unwrap();

        assert_eq!(report.processed, 7);
        assert_eq!(report.total, 7);
        assert_eq!(store.count_pending().unwrap(), 0);
    }

    #[test]
    fn drain_of_empty_backlog_is_a_noop() {
        let store = InMemoryOutboxStore::arc();
        let report = drain(&consumer(store, 10), Duration::ZERO).unwrap();
        assert_eq!(report, ProcessingReport::default());
    }

    #[test]
    fn worker_processes_backlog_then_shuts_down() {
        let store = InMemoryOutboxStore::arc();
        backlog(&store, 5);

        let handle = OutboxWorker::spawn(
            "outbox-worker-test",
            consumer(store.clone(), 2),
            Duration::from_millis(10),
        )
        .unwrap();

        for _ in 0..100 {
            if store.count_pending().unwrap() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        handle.shutdown();
        assert_eq!(store.count_pending().unwrap(), 0);
    }
}
