//! End-to-end pipeline tests: emit through the outbox, consume, and check
//! the read models.

use std::sync::Arc;

use chrono::Utc;

use curaflow_billing::{InvoiceId, InvoiceIssued, PaymentId, PaymentRecorded};
use curaflow_core::ClinicId;
use curaflow_events::{EventContext, EventEnvelope, ProjectorRegistry};
use curaflow_patients::{PatientId, PatientRegistered};
use curaflow_visits::{TreatmentAdded, TreatmentId, VisitClosed, VisitId, VisitOpened};

use crate::outbox::{EventEmitter, InMemoryOutboxStore, OutboxConsumer, OutboxStore, StagedEmitter};
use crate::projections::{
    PatientBalancesProjection, PatientRosterProjection, VisitSummariesProjection,
};
use crate::read_model::InMemoryClinicStore;

struct Pipeline {
    store: Arc<InMemoryOutboxStore>,
    consumer: OutboxConsumer<Arc<InMemoryOutboxStore>>,
    roster: Arc<PatientRosterProjection<Arc<InMemoryClinicStore<PatientId, crate::projections::PatientRosterEntry>>>>,
    visits: Arc<VisitSummariesProjection<Arc<InMemoryClinicStore<VisitId, crate::projections::VisitSummary>>>>,
    balances: Arc<PatientBalancesProjection<Arc<InMemoryClinicStore<PatientId, crate::projections::PatientBalance>>>>,
}

fn pipeline() -> Pipeline {
    let store = InMemoryOutboxStore::arc();

    let roster = Arc::new(PatientRosterProjection::new(InMemoryClinicStore::arc()));
    let visits = Arc::new(VisitSummariesProjection::new(InMemoryClinicStore::arc()));
    let balances = Arc::new(PatientBalancesProjection::new(InMemoryClinicStore::arc()));

    let mut registry = ProjectorRegistry::new();
    registry.register(PatientRegistered::EVENT, roster.clone());
    registry.register(VisitOpened::EVENT, visits.clone());
    registry.register(TreatmentAdded::EVENT, visits.clone());
    registry.register(VisitClosed::EVENT, visits.clone());
    registry.register(InvoiceIssued::EVENT, balances.clone());
    registry.register(PaymentRecorded::EVENT, balances.clone());

    let consumer = OutboxConsumer::new(store.clone(), Arc::new(registry));

    Pipeline {
        store,
        consumer,
        roster,
        visits,
        balances,
    }
}

#[test]
fn full_visit_flow_lands_in_every_read_model() {
    let p = pipeline();
    let clinic = ClinicId::new();
    let ctx = EventContext::for_clinic(clinic);

    let patient_id = PatientId::new();
    let visit_id = VisitId::new();
    let invoice_id = InvoiceId::new();

    // One unit of work: register, open, treat, close, bill, pay.
    let mut emitter = StagedEmitter::new(p.store.clone());
    let events: Vec<EventEnvelope> = vec![
        EventEnvelope::from_event(
            &PatientRegistered {
                patient_id,
                given_name: "Grace".to_string(),
                family_name: "Hopper".to_string(),
                date_of_birth: None,
                occurred_at: Utc::now(),
            },
            ctx,
        )
        .unwrap(),
        EventEnvelope::from_event(
            &VisitOpened {
                visit_id,
                patient_id,
                occurred_at: Utc::now(),
            },
            ctx,
        )
        .unwrap(),
        EventEnvelope::from_event(
            &TreatmentAdded {
                visit_id,
                treatment_id: TreatmentId::new(),
                code: "D1110".to_string(),
                description: None,
                occurred_at: Utc::now(),
            },
            ctx,
        )
        .unwrap(),
        EventEnvelope::from_event(
            &VisitClosed {
                visit_id,
                occurred_at: Utc::now(),
            },
            ctx,
        )
        .unwrap(),
        EventEnvelope::from_event(
            &InvoiceIssued {
                invoice_id,
                patient_id,
                visit_id: Some(visit_id),
                total_amount: 15_000,
                occurred_at: Utc::now(),
            },
            ctx,
        )
        .unwrap(),
        EventEnvelope::from_event(
            &PaymentRecorded {
                payment_id: PaymentId::new(),
                invoice_id,
                patient_id,
                amount: 15_000,
                occurred_at: Utc::now(),
            },
            ctx,
        )
        .unwrap(),
    ];
    for envelope in events {
        emitter.emit(envelope).unwrap();
    }
    emitter.commit().unwrap();

    assert_eq!(p.store.count_pending().unwrap(), 6);

    let report = p.consumer.process_pending_events(None).unwrap();
    assert_eq!(report.processed, 6);
    assert_eq!(report.failed, 0);

    let entry = p.roster.get(clinic, &patient_id).unwrap();
    assert_eq!(entry.family_name, "Hopper");

    let summary = p.visits.get(clinic, &visit_id).unwrap();
    assert_eq!(summary.treatment_count(), 1);
    assert!(!summary.is_open());

    let balance = p.balances.get(clinic, &patient_id).unwrap();
    assert_eq!(balance.total_invoiced, 15_000);
    assert_eq!(balance.outstanding(), 0);

    // Second run finds nothing; read models unchanged.
    let report = p.consumer.process_pending_events(None).unwrap();
    assert_eq!(report.total, 0);
    assert_eq!(p.visits.get(clinic, &visit_id).unwrap().treatment_count(), 1);
}

#[test]
fn two_clinics_never_share_read_model_rows() {
    let p = pipeline();
    let clinic_a = ClinicId::new();
    let clinic_b = ClinicId::new();

    let mut emitter = StagedEmitter::new(p.store.clone());
    for clinic in [clinic_a, clinic_b] {
        emitter
            .emit(
                EventEnvelope::from_event(
                    &PatientRegistered {
                        patient_id: PatientId::new(),
                        given_name: "Pat".to_string(),
                        family_name: "Doe".to_string(),
                        date_of_birth: None,
                        occurred_at: Utc::now(),
                    },
                    EventContext::for_clinic(clinic),
                )
                .unwrap(),
            )
            .unwrap();
    }
    emitter.commit().unwrap();

    p.consumer.process_pending_events(None).unwrap();

    assert_eq!(p.roster.list(clinic_a).len(), 1);
    assert_eq!(p.roster.list(clinic_b).len(), 1);
    assert_ne!(
        p.roster.list(clinic_a)[0].patient_id,
        p.roster.list(clinic_b)[0].patient_id
    );
}

#[test]
fn consumption_follows_business_time_not_insertion_order() {
    let p = pipeline();
    let clinic = ClinicId::new();
    let ctx = EventContext::for_clinic(clinic);

    let patient_id = PatientId::new();
    let visit_id = VisitId::new();

    // Inserted close-before-open; occurred_at puts them right again.
    let opened_at = Utc::now() - chrono::Duration::minutes(30);
    let closed_at = Utc::now();

    let mut emitter = StagedEmitter::new(p.store.clone());
    emitter
        .emit(
            EventEnvelope::from_event(
                &VisitClosed {
                    visit_id,
                    occurred_at: closed_at,
                },
                ctx,
            )
            .unwrap(),
        )
        .unwrap();
    emitter
        .emit(
            EventEnvelope::from_event(
                &VisitOpened {
                    visit_id,
                    patient_id,
                    occurred_at: opened_at,
                },
                ctx,
            )
            .unwrap(),
        )
        .unwrap();
    emitter.commit().unwrap();

    // Batch of one: the open (older business time) must come first.
    let report = p.consumer.process_pending_events(Some(1)).unwrap();
    assert_eq!(report.processed, 1);
    let summary = p.visits.get(clinic, &visit_id).unwrap();
    assert!(summary.opened_at.is_some());
    assert!(summary.closed_at.is_none());

    p.consumer.process_pending_events(Some(1)).unwrap();
    assert!(!p.visits.get(clinic, &visit_id).unwrap().is_open());
}

#[test]
fn unregistered_event_does_not_stall_the_pipeline() {
    let p = pipeline();
    let clinic = ClinicId::new();

    let mut emitter = StagedEmitter::new(p.store.clone());
    emitter
        .emit(
            EventEnvelope::new(
                "labs.result.received",
                Utc::now(),
                serde_json::Map::new(),
            )
            .with_context(EventContext::for_clinic(clinic)),
        )
        .unwrap();
    emitter
        .emit(
            EventEnvelope::from_event(
                &PatientRegistered {
                    patient_id: PatientId::new(),
                    given_name: "Pat".to_string(),
                    family_name: "Doe".to_string(),
                    date_of_birth: None,
                    occurred_at: Utc::now(),
                },
                EventContext::for_clinic(clinic),
            )
            .unwrap(),
        )
        .unwrap();
    emitter.commit().unwrap();

    let report = p.consumer.process_pending_events(None).unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(p.store.count_pending().unwrap(), 0);
    assert_eq!(p.roster.list(clinic).len(), 1);
}
