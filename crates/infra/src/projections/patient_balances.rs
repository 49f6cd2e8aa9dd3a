//! Patient balances projection.
//!
//! Per-patient billing totals derived from invoice and payment events. The
//! invoice/payment id sets guard every counter against re-delivery, and the
//! amount map lets a void reverse exactly what the issue added.

use std::collections::{BTreeMap, BTreeSet};

use curaflow_billing::{InvoiceId, InvoiceIssued, InvoiceVoided, PaymentId, PaymentRecorded};
use curaflow_core::ClinicId;
use curaflow_events::{EventEnvelope, ProjectError, Projector};
use curaflow_patients::PatientId;

use crate::read_model::ClinicStore;

use super::{decode_payload, require_clinic};

/// Read model: per-patient billing totals (smallest currency unit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientBalance {
    pub patient_id: PatientId,
    pub total_invoiced: u64,
    pub total_paid: u64,
    issued: BTreeSet<InvoiceId>,
    voided: BTreeSet<InvoiceId>,
    payments: BTreeSet<PaymentId>,
    invoice_amounts: BTreeMap<InvoiceId, u64>,
}

impl PatientBalance {
    fn new(patient_id: PatientId) -> Self {
        Self {
            patient_id,
            total_invoiced: 0,
            total_paid: 0,
            issued: BTreeSet::new(),
            voided: BTreeSet::new(),
            payments: BTreeSet::new(),
            invoice_amounts: BTreeMap::new(),
        }
    }

    pub fn outstanding(&self) -> u64 {
        self.total_invoiced.saturating_sub(self.total_paid)
    }

    pub fn open_invoice_count(&self) -> usize {
        self.issued.iter().filter(|id| !self.voided.contains(id)).count()
    }
}

/// Projects billing events into per-patient balances.
#[derive(Debug)]
pub struct PatientBalancesProjection<S>
where
    S: ClinicStore<PatientId, PatientBalance>,
{
    store: S,
}

impl<S> PatientBalancesProjection<S>
where
    S: ClinicStore<PatientId, PatientBalance>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn get(&self, clinic_id: ClinicId, patient_id: &PatientId) -> Option<PatientBalance> {
        self.store.get(clinic_id, patient_id)
    }

    pub fn list(&self, clinic_id: ClinicId) -> Vec<PatientBalance> {
        self.store.list(clinic_id)
    }

    pub fn list_with_outstanding(&self, clinic_id: ClinicId) -> Vec<PatientBalance> {
        self.store
            .list(clinic_id)
            .into_iter()
            .filter(|b| b.outstanding() > 0)
            .collect()
    }

    fn balance_or_new(&self, clinic_id: ClinicId, patient_id: PatientId) -> PatientBalance {
        self.store
            .get(clinic_id, &patient_id)
            .unwrap_or_else(|| PatientBalance::new(patient_id))
    }
}

impl<S> Projector for PatientBalancesProjection<S>
where
    S: ClinicStore<PatientId, PatientBalance>,
{
    fn name(&self) -> &'static str {
        "billing.patient_balances"
    }

    fn project(&self, envelope: &EventEnvelope) -> Result<(), ProjectError> {
        let clinic_id = require_clinic(envelope)?;

        match envelope.event() {
            InvoiceIssued::EVENT => {
                let event: InvoiceIssued = decode_payload(envelope)?;
                let mut balance = self.balance_or_new(clinic_id, event.patient_id);
                if balance.issued.insert(event.invoice_id) {
                    balance
                        .invoice_amounts
                        .insert(event.invoice_id, event.total_amount);
                    // A void that arrived first already excluded this invoice.
                    if !balance.voided.contains(&event.invoice_id) {
                        balance.total_invoiced += event.total_amount;
                    }
                    self.store.upsert(clinic_id, event.patient_id, balance);
                }
            }
            PaymentRecorded::EVENT => {
                let event: PaymentRecorded = decode_payload(envelope)?;
                let mut balance = self.balance_or_new(clinic_id, event.patient_id);
                if balance.payments.insert(event.payment_id) {
                    balance.total_paid += event.amount;
                    self.store.upsert(clinic_id, event.patient_id, balance);
                }
            }
            InvoiceVoided::EVENT => {
                let event: InvoiceVoided = decode_payload(envelope)?;
                let mut balance = self.balance_or_new(clinic_id, event.patient_id);
                if balance.voided.insert(event.invoice_id) {
                    if balance.issued.contains(&event.invoice_id) {
                        let amount = balance
                            .invoice_amounts
                            .get(&event.invoice_id)
                            .copied()
                            .unwrap_or(0);
                        balance.total_invoiced = balance.total_invoiced.saturating_sub(amount);
                    }
                    self.store.upsert(clinic_id, event.patient_id, balance);
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use curaflow_events::EventContext;

    use crate::read_model::InMemoryClinicStore;

    use super::*;

    fn envelope<E>(event: &E, clinic_id: ClinicId) -> EventEnvelope
    where
        E: curaflow_events::DomainEvent + serde::Serialize,
    {
        EventEnvelope::from_event(event, EventContext::for_clinic(clinic_id)).unwrap()
    }

    fn issued(patient_id: PatientId, invoice_id: InvoiceId, amount: u64) -> InvoiceIssued {
        InvoiceIssued {
            invoice_id,
            patient_id,
            visit_id: None,
            total_amount: amount,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn invoice_and_payment_move_the_balance() {
        let store = Arc::new(InMemoryClinicStore::new());
        let proj = PatientBalancesProjection::new(store);
        let clinic = ClinicId::new();
        let patient = PatientId::new();
        let invoice = InvoiceId::new();

        proj.project(&envelope(&issued(patient, invoice, 20_000), clinic))
            .unwrap();
        proj.project(&envelope(
            &PaymentRecorded {
                payment_id: PaymentId::new(),
                invoice_id: invoice,
                patient_id: patient,
                amount: 5_000,
                occurred_at: Utc::now(),
            },
            clinic,
        ))
        .unwrap();

        let balance = proj.get(clinic, &patient).unwrap();
        assert_eq!(balance.total_invoiced, 20_000);
        assert_eq!(balance.total_paid, 5_000);
        assert_eq!(balance.outstanding(), 15_000);
        assert_eq!(balance.open_invoice_count(), 1);
    }

    #[test]
    fn redelivered_payment_does_not_double_pay() {
        let store = Arc::new(InMemoryClinicStore::new());
        let proj = PatientBalancesProjection::new(store);
        let clinic = ClinicId::new();
        let patient = PatientId::new();
        let invoice = InvoiceId::new();

        proj.project(&envelope(&issued(patient, invoice, 10_000), clinic))
            .unwrap();

        let payment = PaymentRecorded {
            payment_id: PaymentId::new(),
            invoice_id: invoice,
            patient_id: patient,
            amount: 10_000,
            occurred_at: Utc::now(),
        };
        let env = envelope(&payment, clinic);
        proj.project(&env).unwrap();
        proj.project(&env).unwrap();

        let balance = proj.get(clinic, &patient).unwrap();
        assert_eq!(balance.total_paid, 10_000);
        assert_eq!(balance.outstanding(), 0);
    }

    #[test]
    fn void_reverses_the_invoiced_amount() {
        let store = Arc::new(InMemoryClinicStore::new());
        let proj = PatientBalancesProjection::new(store);
        let clinic = ClinicId::new();
        let patient = PatientId::new();
        let invoice = InvoiceId::new();

        proj.project(&envelope(&issued(patient, invoice, 10_000), clinic))
            .unwrap();
        proj.project(&envelope(
            &InvoiceVoided {
                invoice_id: invoice,
                patient_id: patient,
                occurred_at: Utc::now(),
            },
            clinic,
        ))
        .unwrap();

        let balance = proj.get(clinic, &patient).unwrap();
        assert_eq!(balance.total_invoiced, 0);
        assert_eq!(balance.open_invoice_count(), 0);
    }

    #[test]
    fn void_arriving_before_issue_still_nets_to_zero() {
        let store = Arc::new(InMemoryClinicStore::new());
        let proj = PatientBalancesProjection::new(store);
        let clinic = ClinicId::new();
        let patient = PatientId::new();
        let invoice = InvoiceId::new();

        proj.project(&envelope(
            &InvoiceVoided {
                invoice_id: invoice,
                patient_id: patient,
                occurred_at: Utc::now(),
            },
            clinic,
        ))
        .unwrap();
        proj.project(&envelope(&issued(patient, invoice, 10_000), clinic))
            .unwrap();

        let balance = proj.get(clinic, &patient).unwrap();
        assert_eq!(balance.total_invoiced, 0);
        assert_eq!(balance.open_invoice_count(), 0);
    }

    #[test]
    fn balances_are_clinic_scoped() {
        let store = Arc::new(InMemoryClinicStore::new());
        let proj = PatientBalancesProjection::new(store);
        let clinic_a = ClinicId::new();
        let clinic_b = ClinicId::new();
        let patient = PatientId::new();

        proj.project(&envelope(&issued(patient, InvoiceId::new(), 7_500), clinic_a))
            .unwrap();

        assert!(proj.get(clinic_a, &patient).is_some());
        assert!(proj.get(clinic_b, &patient).is_none());
        assert_eq!(proj.list_with_outstanding(clinic_a).len(), 1);
    }
}
