//! Invoice Management
//!
//! Invoice records, their state machine and storage.
//!
//! ```text
//!  Created ──▶ Paid ──▶ Submitted ──┬──▶ Delivered
//!                                   └──▶ Refunded
//! ```
//!
//! Every status change goes through [`InvoiceStore::transition`], a
//! compare-and-set: the first caller to move an invoice out of a status wins
//! and every later caller sees [`Transition::Stale`]. That is what keeps a
//! redelivered webhook from submitting twice and two failure paths from
//! refunding twice.

use chrono::{DateTime, Utc};
use genpay_core::{MessageRef, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{PaymentError, Result};

/// Invoice identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvoiceId(String);

impl InvoiceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Invoice lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Created,
    Paid,
    Submitted,
    Delivered,
    Refunded,
}

impl InvoiceStatus {
    /// Edges of the state machine
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Created, Self::Paid)
                | (Self::Paid, Self::Submitted)
                | (Self::Submitted, Self::Delivered | Self::Refunded)
        )
    }

    pub const fn is_final(self) -> bool {
        matches!(self, Self::Delivered | Self::Refunded)
    }
}

/// What the paid invoice should trigger
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceCallback {
    GenerateImage,
}

/// How an invoice got paid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Funding {
    /// Paid from outside, observed through the webhook
    External,
    /// Paid in-process from the payer's own wallet balance
    Balance,
}

/// Result of a compensating refund
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefundOutcome {
    Settled { payment_hash: String },
    Failed { reason: String },
}

/// The single refund issued for an invoice
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefundRecord {
    pub invoice_id: InvoiceId,
    pub issued_at: DateTime<Utc>,
    pub outcome: RefundOutcome,
}

/// An invoice record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,

    amount_sat: u64,

    pub memo: String,

    /// BOLT11 payment request shown to the payer
    pub payment_request: String,

    /// Payment hash used to match webhook notifications
    pub payment_hash: String,

    status: InvoiceStatus,

    pub payer: UserId,

    payload: String,

    pub callback: InvoiceCallback,

    /// Message showing the payment request, if one was sent
    pub message: Option<MessageRef>,

    pub funding: Option<Funding>,

    pub refund: Option<RefundRecord>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Create a new invoice in `Created`
    pub fn new(
        payer: UserId,
        amount_sat: u64,
        memo: impl Into<String>,
        payment_request: impl Into<String>,
        payment_hash: impl Into<String>,
        callback: InvoiceCallback,
        payload: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: InvoiceId::generate(),
            amount_sat,
            memo: memo.into(),
            payment_request: payment_request.into(),
            payment_hash: payment_hash.into(),
            status: InvoiceStatus::Created,
            payer,
            payload: payload.into(),
            callback,
            message: None,
            funding: None,
            refund: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub const fn amount_sat(&self) -> u64 {
        self.amount_sat
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub const fn status(&self) -> InvoiceStatus {
        self.status
    }
}

/// Mutable metadata that may be attached to an invoice
#[derive(Clone, Debug)]
pub enum InvoiceNote {
    Message(MessageRef),
    Funding(Funding),
    Refund(RefundRecord),
}

/// Outcome of a compare-and-set
#[derive(Clone, Debug)]
pub enum Transition {
    /// This caller moved the invoice; carries the updated record
    Applied(Invoice),
    /// Someone else got there first
    Stale { current: InvoiceStatus },
}

impl Transition {
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Invoice storage trait
pub trait InvoiceStore: Send + Sync {
    /// Insert a new invoice
    fn insert(&self, invoice: &Invoice) -> Result<()>;

    /// Get invoice by id
    fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>>;

    /// Get invoice by payment hash
    fn get_by_payment_hash(&self, payment_hash: &str) -> Result<Option<Invoice>>;

    /// Atomically move `id` from `from` to `to`
    fn transition(
        &self,
        id: &InvoiceId,
        from: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Transition>;

    /// Attach metadata without touching status, amount or payload
    fn annotate(&self, id: &InvoiceId, note: InvoiceNote) -> Result<Invoice>;
}

/// In-memory invoice store
///
/// Both indexes sit behind one lock, so readers and writers never take them
/// in different orders.
pub struct MemoryInvoiceStore {
    inner: RwLock<Indexes>,
}

#[derive(Default)]
struct Indexes {
    invoices: HashMap<InvoiceId, Invoice>,
    by_payment_hash: HashMap<String, InvoiceId>,
}

impl Default for MemoryInvoiceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInvoiceStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Indexes::default()),
        }
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> PaymentError {
    PaymentError::Storage("invoice store lock poisoned".into())
}

impl InvoiceStore for MemoryInvoiceStore {
    fn insert(&self, invoice: &Invoice) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;

        if inner.invoices.contains_key(&invoice.id) {
            return Err(PaymentError::Storage(format!(
                "invoice {} already exists",
                invoice.id
            )));
        }

        inner
            .by_payment_hash
            .insert(invoice.payment_hash.clone(), invoice.id.clone());
        inner.invoices.insert(invoice.id.clone(), invoice.clone());

        Ok(())
    }

    fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.invoices.get(id).cloned())
    }

    fn get_by_payment_hash(&self, payment_hash: &str) -> Result<Option<Invoice>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .by_payment_hash
            .get(payment_hash)
            .and_then(|id| inner.invoices.get(id).cloned()))
    }

    fn transition(
        &self,
        id: &InvoiceId,
        from: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Transition> {
        if !from.can_transition(to) {
            return Err(PaymentError::InvalidTransition {
                id: id.clone(),
                from,
                to,
            });
        }

        let mut inner = self.inner.write().map_err(poisoned)?;
        let invoice = inner
            .invoices
            .get_mut(id)
            .ok_or_else(|| PaymentError::InvoiceNotFound(id.to_string()))?;

        if invoice.status != from {
            return Ok(Transition::Stale {
                current: invoice.status,
            });
        }

        invoice.status = to;
        invoice.updated_at = Utc::now();
        Ok(Transition::Applied(invoice.clone()))
    }

    fn annotate(&self, id: &InvoiceId, note: InvoiceNote) -> Result<Invoice> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let invoice = inner
            .invoices
            .get_mut(id)
            .ok_or_else(|| PaymentError::InvoiceNotFound(id.to_string()))?;

        match note {
            InvoiceNote::Message(message) => invoice.message = Some(message),
            InvoiceNote::Funding(funding) => invoice.funding = Some(funding),
            InvoiceNote::Refund(record) => {
                if invoice.refund.is_some() {
                    return Err(PaymentError::Storage(format!(
                        "invoice {id} already has a refund record"
                    )));
                }
                invoice.refund = Some(record);
            }
        }
        invoice.updated_at = Utc::now();

        Ok(invoice.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn invoice() -> Invoice {
        Invoice::new(
            UserId::new("42"),
            1000,
            "Image generation",
            "lnbc10u1...",
            "hash-1",
            InvoiceCallback::GenerateImage,
            "a red fox in the snow",
        )
    }

    #[test]
    fn test_state_machine_edges() {
        use InvoiceStatus::*;
        assert!(Created.can_transition(Paid));
        assert!(Paid.can_transition(Submitted));
        assert!(Submitted.can_transition(Delivered));
        assert!(Submitted.can_transition(Refunded));

        assert!(!Created.can_transition(Submitted));
        assert!(!Paid.can_transition(Paid));
        assert!(!Refunded.can_transition(Refunded));
        assert!(!Delivered.can_transition(Refunded));
    }

    #[test]
    fn test_lookup_by_payment_hash() {
        let store = MemoryInvoiceStore::new();
        let invoice = invoice();
        store.insert(&invoice).unwrap();

        let found = store.get_by_payment_hash("hash-1").unwrap().unwrap();
        assert_eq!(found.id, invoice.id);
        assert_eq!(found.payload(), "a red fox in the snow");
        assert!(store.get_by_payment_hash("other").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let store = MemoryInvoiceStore::new();
        let invoice = invoice();
        store.insert(&invoice).unwrap();
        assert!(store.insert(&invoice).is_err());
    }

    #[test]
    fn test_transition_is_compare_and_set() {
        let store = MemoryInvoiceStore::new();
        let invoice = invoice();
        store.insert(&invoice).unwrap();

        let first = store
            .transition(&invoice.id, InvoiceStatus::Created, InvoiceStatus::Paid)
            .unwrap();
        let second = store
            .transition(&invoice.id, InvoiceStatus::Created, InvoiceStatus::Paid)
            .unwrap();

        assert!(first.is_applied());
        assert!(matches!(
            second,
            Transition::Stale {
                current: InvoiceStatus::Paid
            }
        ));
    }

    #[test]
    fn test_invalid_edge_is_an_error() {
        let store = MemoryInvoiceStore::new();
        let invoice = invoice();
        store.insert(&invoice).unwrap();

        let err = store
            .transition(&invoice.id, InvoiceStatus::Created, InvoiceStatus::Refunded)
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidTransition { .. }));
    }

    #[test]
    fn test_concurrent_refund_has_one_winner() {
        let store = Arc::new(MemoryInvoiceStore::new());
        let invoice = invoice();
        store.insert(&invoice).unwrap();
        store
            .transition(&invoice.id, InvoiceStatus::Created, InvoiceStatus::Paid)
            .unwrap();
        store
            .transition(&invoice.id, InvoiceStatus::Paid, InvoiceStatus::Submitted)
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let id = invoice.id.clone();
                std::thread::spawn(move || {
                    store
                        .transition(&id, InvoiceStatus::Submitted, InvoiceStatus::Refunded)
                        .unwrap()
                        .is_applied()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|applied| *applied)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_annotate_keeps_amount_and_single_refund() {
        let store = MemoryInvoiceStore::new();
        let invoice = invoice();
        store.insert(&invoice).unwrap();

        let record = RefundRecord {
            invoice_id: invoice.id.clone(),
            issued_at: Utc::now(),
            outcome: RefundOutcome::Settled {
                payment_hash: "refund-hash".into(),
            },
        };
        let updated = store
            .annotate(&invoice.id, InvoiceNote::Refund(record.clone()))
            .unwrap();
        assert_eq!(updated.amount_sat(), 1000);
        assert!(updated.refund.is_some());

        assert!(store.annotate(&invoice.id, InvoiceNote::Refund(record)).is_err());
    }

    #[test]
    fn test_concurrent_insert_and_hash_lookup() {
        let store = Arc::new(MemoryInvoiceStore::new());

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for n in 0..2_000 {
                    let invoice = Invoice::new(
                        UserId::new("42"),
                        1000,
                        "Image generation",
                        format!("lnbc{n}"),
                        format!("hash-{n}"),
                        InvoiceCallback::GenerateImage,
                        "a red fox",
                    );
                    store.insert(&invoice).unwrap();
                }
            })
        };
        let reader = {
            let store = store.clone();
            std::thread::spawn(move || {
                let mut found = 0;
                for n in 0..2_000 {
                    if store.get_by_payment_hash(&format!("hash-{n}")).unwrap().is_some() {
                        found += 1;
                    }
                }
                found
            })
        };

        writer.join().unwrap();
        assert!(reader.join().unwrap() <= 2_000);
        assert!(store.get_by_payment_hash("hash-1999").unwrap().is_some());
    }
}
