//! Billing domain module.
//!
//! Invoice and payment events emitted from the billing service. Amounts are
//! carried in the smallest currency unit (cents); no floating point.

pub mod invoice;

pub use invoice::{InvoiceId, InvoiceIssued, InvoiceVoided, PaymentId, PaymentRecorded};
