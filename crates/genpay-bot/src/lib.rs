//! # genpay-bot
//!
//! Payment-gated image generation for a chat bot.
//!
//! A user asks for an image, pays a lightning invoice, and receives the
//! generated images. If generation fails after payment, the price is paid
//! back automatically.
//!
//! ## Lifecycle
//!
//! ```text
//! ┌─────────────────┐   ┌─────────────┐   ┌──────────────────┐
//! │ PromptCollector │──▶│ InvoiceGate │──▶│ PaymentConfirmer │
//! │ /generate [p]   │   │ price, QR   │   │ Created → Paid   │
//! └─────────────────┘   └─────────────┘   └────────┬─────────┘
//!                                                  │ PaidEvent
//!                                                  ▼
//! ┌─────────────────┐   ┌─────────────────┐   ┌──────────────────┐
//! │   Deliverer     │◀──│ JobOrchestrator │◀──│ PaymentDispatcher│
//! │ download, send  │   │ submit, poll    │   │ task per event   │
//! └─────────────────┘   └────────┬────────┘   └──────────────────┘
//!                                │ failure
//!                                ▼
//!                      ┌───────────────────┐
//!                      │ RefundCompensator │
//!                      └───────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **One job per payment** - `Paid → Submitted` is a compare-and-set, so a
//!   redelivered notification never submits twice
//! - **One refund per invoice** - `Submitted → Refunded` is claimed before
//!   any money moves
//! - **Bounded jobs** - one deadline covers submit, poll and download, and
//!   polling has its own attempt limit
//!
//! ## Example
//!
//! ```rust,ignore
//! use genpay_bot::{assemble, Dependencies, GenerateConfig};
//!
//! let pipeline = assemble(deps, GenerateConfig::from_env(), 64);
//! tokio::spawn(pipeline.dispatcher.run());
//!
//! pipeline.bot.on_message(&user, "/generate a lighthouse at dusk").await?;
//! ```

pub mod backoff;
pub mod bot;
pub mod collector;
pub mod config;
pub mod deadline;
pub mod deliver;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod messenger;
pub mod orchestrator;
pub mod refund;

pub use bot::{Dependencies, GenerateBot, Pipeline, Reply, assemble};
pub use collector::{Collected, PromptCollector};
pub use config::{ArtifactRetention, GenerateConfig, PollPolicy};
pub use deliver::{DeliveryReport, Deliverer};
pub use dispatch::PaymentDispatcher;
pub use error::{BotError, ErrorKind, Result};
pub use gate::{GateOutcome, InvoiceGate};
pub use messenger::{
    Attachment, DEFAULT_OUTBOX_LIMIT, Messenger, OutboundKind, OutboundMessage, OutboxMessenger,
};
pub use orchestrator::{JobOrchestrator, JobOutcome};
pub use refund::{RefundCompensator, RefundResult};
