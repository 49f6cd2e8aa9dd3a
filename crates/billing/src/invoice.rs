use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use curaflow_events::DomainEvent;
use curaflow_patients::PatientId;
use curaflow_visits::VisitId;

/// Invoice identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub Uuid);

impl InvoiceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for InvoiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Payment identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// An invoice was issued for a visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub invoice_id: InvoiceId,
    pub patient_id: PatientId,
    pub visit_id: Option<VisitId>,
    /// Total in smallest currency unit (cents).
    pub total_amount: u64,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent for InvoiceIssued {
    fn event_type(&self) -> &'static str {
        Self::EVENT
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl InvoiceIssued {
    pub const EVENT: &'static str = "billing.invoice.issued";
}

/// A payment was applied against an invoice.
///
/// `payment_id` is the natural dedup key for balance projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub payment_id: PaymentId,
    pub invoice_id: InvoiceId,
    pub patient_id: PatientId,
    /// Amount in smallest currency unit (cents).
    pub amount: u64,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent for PaymentRecorded {
    fn event_type(&self) -> &'static str {
        Self::EVENT
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl PaymentRecorded {
    pub const EVENT: &'static str = "billing.payment.recorded";
}

/// An invoice was voided; its amount no longer counts toward the balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceVoided {
    pub invoice_id: InvoiceId,
    pub patient_id: PatientId,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent for InvoiceVoided {
    fn event_type(&self) -> &'static str {
        Self::EVENT
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl InvoiceVoided {
    pub const EVENT: &'static str = "billing.invoice.voided";
}
