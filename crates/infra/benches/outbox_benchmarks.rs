use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use chrono::Utc;

use curaflow_core::ClinicId;
use curaflow_events::{EventContext, EventEnvelope, ProjectorRegistry};
use curaflow_infra::outbox::{ConsumerConfig, InMemoryOutboxStore, OutboxConsumer, OutboxStore};
use curaflow_infra::projections::VisitSummariesProjection;
use curaflow_infra::read_model::InMemoryClinicStore;
use curaflow_patients::PatientId;
use curaflow_visits::{TreatmentAdded, TreatmentId, VisitId, VisitOpened};

fn seed_backlog(store: &Arc<InMemoryOutboxStore>, clinic: ClinicId, visits: usize) {
    let ctx = EventContext::for_clinic(clinic);
    for _ in 0..visits {
        let visit_id = VisitId::new();
        let opened = VisitOpened {
            visit_id,
            patient_id: PatientId::new(),
            occurred_at: Utc::now(),
        };
        store
            .append(&EventEnvelope::from_event(&opened, ctx).unwrap())
            .unwrap();

        let treated = TreatmentAdded {
            visit_id,
            treatment_id: TreatmentId::new(),
            code: "D1110".to_string(),
            description: None,
            occurred_at: Utc::now(),
        };
        store
            .append(&EventEnvelope::from_event(&treated, ctx).unwrap())
            .unwrap();
    }
}

fn consumer_for(
    store: Arc<InMemoryOutboxStore>,
    batch_size: usize,
) -> OutboxConsumer<Arc<InMemoryOutboxStore>> {
    let projection = Arc::new(VisitSummariesProjection::new(InMemoryClinicStore::arc()));

    let mut registry = ProjectorRegistry::new();
    registry.register(VisitOpened::EVENT, projection.clone());
    registry.register(TreatmentAdded::EVENT, projection);

    OutboxConsumer::with_config(
        store,
        Arc::new(registry),
        ConsumerConfig {
            batch_size,
            ..ConsumerConfig::default()
        },
    )
}

fn bench_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbox_append");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_envelope", |b| {
        let store = InMemoryOutboxStore::arc();
        let ctx = EventContext::for_clinic(ClinicId::new());
        b.iter(|| {
            let opened = VisitOpened {
                visit_id: VisitId::new(),
                patient_id: PatientId::new(),
                occurred_at: Utc::now(),
            };
            let envelope = EventEnvelope::from_event(&opened, ctx).unwrap();
            black_box(store.append(&envelope).unwrap());
        });
    });

    group.finish();
}

fn bench_consume_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbox_consume");

    for batch_size in [10usize, 100, 500] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                b.iter_batched(
                    || {
                        let store = InMemoryOutboxStore::arc();
                        // Two envelopes per visit.
                        seed_backlog(&store, ClinicId::new(), batch_size / 2 + 1);
                        consumer_for(store, batch_size)
                    },
                    |consumer| {
                        black_box(consumer.process_pending_events(None).unwrap());
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_append_throughput, bench_consume_batch);
criterion_main!(benches);
