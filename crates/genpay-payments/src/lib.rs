//! # genpay-payments
//!
//! Lightning invoices, wallet access and payment notifications for genpay.
//!
//! ## Payment Flow
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ InvoiceGate │────▶│  LNbits wallet  │────▶│  Webhook / pay   │
//! │  (create)   │     │  (payment req.) │     │  from balance    │
//! └─────────────┘     └─────────────────┘     └────────┬─────────┘
//!                                                      │
//!                                     PaymentConfirmer (Created → Paid)
//!                                                      │
//!                                                      ▼
//!                                            PaidEvent queue (mpsc)
//! ```
//!
//! Invoices are persisted with their payload (the prompt) before the payer
//! ever sees them, so a notification only needs the payment hash to recover
//! everything the job needs.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use genpay_payments::{LnbitsClient, InvoiceParams};
//!
//! let client = LnbitsClient::from_env()?;
//! let created = client.create_invoice(&service_wallet, &InvoiceParams {
//!     amount_sat: 1000,
//!     memo: "Image generation".into(),
//!     webhook: None,
//! }).await?;
//! ```

mod error;
mod events;
mod invoice;
mod lnbits;
mod wallet;
mod webhook;

pub use error::{PaymentError, Result};
pub use events::{
    Confirmation, PaidEvent, PaidEventReceiver, PaidEventSender, PaymentConfirmer,
    paid_event_channel,
};
pub use invoice::{
    Funding, Invoice, InvoiceCallback, InvoiceId, InvoiceNote, InvoiceStatus, InvoiceStore,
    MemoryInvoiceStore, RefundOutcome, RefundRecord, Transition,
};
pub use lnbits::{LnbitsClient, LnbitsConfig};
pub use wallet::{
    CreatedInvoice, InvoiceParams, LightningWallet, MemoryWalletDirectory, Settlement, Wallet,
    WalletDirectory,
};
pub use webhook::{
    SIGNATURE_HEADER, WebhookEvent, WebhookHandler, WebhookPayload, sign, verify_signature,
};
