//! Paid-Invoice Events
//!
//! Typed inbound queue between payment confirmation and the job dispatcher,
//! and the confirmer that feeds it. Confirmation is a compare-and-set on the
//! invoice (`Created → Paid`), so a redelivered notification finds the
//! invoice already paid and enqueues nothing.

use std::sync::Arc;

use genpay_core::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{PaymentError, Result};
use crate::invoice::{
    Funding, InvoiceCallback, InvoiceId, InvoiceNote, InvoiceStatus, InvoiceStore, Transition,
};

/// An invoice that just became paid
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaidEvent {
    pub invoice_id: InvoiceId,
    pub payer: UserId,
    /// The invoice payload (the prompt)
    pub payload: String,
    pub callback: InvoiceCallback,
    pub funding: Funding,
}

pub type PaidEventSender = mpsc::Sender<PaidEvent>;
pub type PaidEventReceiver = mpsc::Receiver<PaidEvent>;

/// Create the paid-event queue
pub fn paid_event_channel(capacity: usize) -> (PaidEventSender, PaidEventReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Outcome of confirming a payment
#[derive(Clone, Debug)]
pub enum Confirmation {
    /// First confirmation; the event was enqueued
    Accepted(PaidEvent),
    /// The invoice had already left `Created`
    Duplicate { current: InvoiceStatus },
}

/// Marks invoices paid and enqueues exactly one event per invoice
#[derive(Clone)]
pub struct PaymentConfirmer {
    store: Arc<dyn InvoiceStore>,
    events: PaidEventSender,
}

impl PaymentConfirmer {
    pub fn new(store: Arc<dyn InvoiceStore>, events: PaidEventSender) -> Self {
        Self { store, events }
    }

    /// Mark `id` paid and enqueue its event
    ///
    /// A queue slot is reserved before the invoice leaves `Created`, so a
    /// closed queue leaves the invoice unpaid and a redelivery can still
    /// confirm it. A later confirmation with `Funding::Balance` overrides an
    /// earlier `External` one: the internal payment is the one that moved
    /// the payer's funds.
    pub async fn confirm(&self, id: &InvoiceId, funding: Funding) -> Result<Confirmation> {
        let Ok(permit) = self.events.reserve().await else {
            tracing::error!(invoice_id = %id, "Paid-event queue is closed");
            return Err(PaymentError::QueueClosed);
        };

        let invoice = match self
            .store
            .transition(id, InvoiceStatus::Created, InvoiceStatus::Paid)?
        {
            Transition::Applied(invoice) => invoice,
            Transition::Stale { current } => {
                if funding == Funding::Balance {
                    self.store.annotate(id, InvoiceNote::Funding(funding))?;
                }
                tracing::debug!(invoice_id = %id, status = ?current, "Ignoring repeated payment confirmation");
                return Ok(Confirmation::Duplicate { current });
            }
        };

        self.store.annotate(id, InvoiceNote::Funding(funding))?;

        let event = PaidEvent {
            invoice_id: invoice.id.clone(),
            payer: invoice.payer.clone(),
            payload: invoice.payload().to_string(),
            callback: invoice.callback,
            funding,
        };
        permit.send(event.clone());

        tracing::info!(invoice_id = %id, payer = %invoice.payer, funding = ?funding, "Invoice paid");
        Ok(Confirmation::Accepted(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{Invoice, MemoryInvoiceStore};

    fn store_with_invoice() -> (Arc<MemoryInvoiceStore>, InvoiceId) {
        let store = Arc::new(MemoryInvoiceStore::new());
        let invoice = Invoice::new(
            UserId::new("42"),
            500,
            "Image generation",
            "lnbc5u1...",
            "hash-1",
            InvoiceCallback::GenerateImage,
            "a cat wearing a crown",
        );
        store.insert(&invoice).unwrap();
        (store, invoice.id)
    }

    #[tokio::test]
    async fn test_confirm_enqueues_once() {
        let (store, id) = store_with_invoice();
        let (tx, mut rx) = paid_event_channel(8);
        let confirmer = PaymentConfirmer::new(store.clone(), tx);

        let first = confirmer.confirm(&id, Funding::External).await.unwrap();
        let second = confirmer.confirm(&id, Funding::External).await.unwrap();

        assert!(matches!(first, Confirmation::Accepted(_)));
        assert!(matches!(
            second,
            Confirmation::Duplicate {
                current: InvoiceStatus::Paid
            }
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload, "a cat wearing a crown");
        assert!(rx.try_recv().is_err());

        let stored = store.get(&id).unwrap().unwrap();
        assert_eq!(stored.funding, Some(Funding::External));
    }

    #[tokio::test]
    async fn test_closed_queue_is_reported() {
        let (store, id) = store_with_invoice();
        let (tx, rx) = paid_event_channel(1);
        drop(rx);
        let confirmer = PaymentConfirmer::new(store.clone(), tx);

        let result = confirmer.confirm(&id, Funding::Balance).await;
        assert!(matches!(result, Err(PaymentError::QueueClosed)));

        // Still unpaid, so a later confirmation on a live queue can succeed
        let stored = store.get(&id).unwrap().unwrap();
        assert_eq!(stored.status(), InvoiceStatus::Created);
        assert!(stored.funding.is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_then_redelivery_confirms() {
        let (store, id) = store_with_invoice();
        let (closed_tx, closed_rx) = paid_event_channel(1);
        drop(closed_rx);
        let closed = PaymentConfirmer::new(store.clone(), closed_tx);
        assert!(closed.confirm(&id, Funding::External).await.is_err());

        let (tx, mut rx) = paid_event_channel(1);
        let confirmer = PaymentConfirmer::new(store, tx);
        let again = confirmer.confirm(&id, Funding::External).await.unwrap();

        assert!(matches!(again, Confirmation::Accepted(_)));
        assert_eq!(rx.recv().await.unwrap().invoice_id, id);
    }

    #[tokio::test]
    async fn test_balance_funding_wins_over_earlier_webhook() {
        let (store, id) = store_with_invoice();
        let (tx, mut rx) = paid_event_channel(8);
        let confirmer = PaymentConfirmer::new(store.clone(), tx);

        let webhook = confirmer.confirm(&id, Funding::External).await.unwrap();
        let internal = confirmer.confirm(&id, Funding::Balance).await.unwrap();

        assert!(matches!(webhook, Confirmation::Accepted(_)));
        assert!(matches!(internal, Confirmation::Duplicate { .. }));
        assert_eq!(store.get(&id).unwrap().unwrap().funding, Some(Funding::Balance));

        rx.recv().await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
