//! Chat flow and wiring
//!
//! [`GenerateBot`] is the entry point for inbound chat messages. [`assemble`]
//! builds the whole pipeline from its collaborators:
//!
//! ```text
//!  on_message ──▶ PromptCollector ──▶ InvoiceGate ──▶ (webhook / balance)
//!                                                          │
//!                                               PaymentConfirmer
//!                                                          │ PaidEvent
//!                                                          ▼
//!                     PaymentDispatcher ──▶ JobOrchestrator ──▶ Deliverer
//!                                                          └──▶ RefundCompensator
//! ```

use std::sync::Arc;

use chrono::Utc;
use genpay_core::{ProviderFactory, SessionStore, UserId};
use genpay_payments::{
    InvoiceStore, LightningWallet, PaymentConfirmer, Wallet, WalletDirectory, paid_event_channel,
};
use serde::Serialize;

use crate::collector::{Collected, PromptCollector, split_command};
use crate::config::GenerateConfig;
use crate::dispatch::PaymentDispatcher;
use crate::error::{ErrorKind, Result};
use crate::gate::{GateOutcome, InvoiceGate};
use crate::messenger::Messenger;
use crate::orchestrator::JobOrchestrator;
use crate::refund::RefundCompensator;

/// What the bot did with an inbound message
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    /// Not addressed to the generation flow
    Ignored,
    /// The user was asked for a prompt
    AwaitingPrompt,
    /// An invoice was created for the prompt
    Invoiced(GateOutcome),
    /// The request was refused; the user has been told why
    Refused { kind: ErrorKind, message: String },
}

pub struct GenerateBot {
    collector: PromptCollector,
    gate: InvoiceGate,
    messenger: Arc<dyn Messenger>,
    command: String,
}

impl GenerateBot {
    pub fn new(
        collector: PromptCollector,
        gate: InvoiceGate,
        messenger: Arc<dyn Messenger>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            collector,
            gate,
            messenger,
            command: command.into(),
        }
    }

    /// Route one inbound chat message
    pub async fn on_message(&self, user: &UserId, text: &str) -> Result<Reply> {
        if let Some((command, rest)) = split_command(text) {
            if command != self.command {
                self.collector.cancel(user)?;
                return Ok(Reply::Ignored);
            }
            return match self.collector.on_command(user, rest).await? {
                Collected::Awaiting => Ok(Reply::AwaitingPrompt),
                Collected::Prompt(prompt) => self.invoice(user, &prompt).await,
            };
        }

        match self.collector.take_pending(user, text, Utc::now())? {
            Some(prompt) => self.invoice(user, &prompt).await,
            None => Ok(Reply::Ignored),
        }
    }

    async fn invoice(&self, user: &UserId, prompt: &str) -> Result<Reply> {
        match self.gate.create_invoice(user, prompt).await {
            Ok(outcome) => Ok(Reply::Invoiced(outcome)),
            Err(e) => {
                let kind = e.kind();
                if kind == ErrorKind::Internal {
                    tracing::error!(user = %user, error = %e, "Generation request failed");
                } else {
                    tracing::warn!(user = %user, kind = ?kind, error = %e, "Generation request refused");
                }

                let message = e.user_message();
                if let Err(send) = self.messenger.send_text(user, &message).await {
                    tracing::warn!(user = %user, error = %send, "Could not send error message");
                }
                Ok(Reply::Refused { kind, message })
            }
        }
    }
}

/// Collaborators of the generation pipeline
#[derive(Clone)]
pub struct Dependencies {
    pub invoices: Arc<dyn InvoiceStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub wallets: Arc<dyn WalletDirectory>,
    pub lightning: Arc<dyn LightningWallet>,
    pub messenger: Arc<dyn Messenger>,
    pub provider: Arc<dyn ProviderFactory>,
    /// Wallet that receives generation payments and pays refunds
    pub service_wallet: Wallet,
}

/// The assembled pipeline
///
/// `dispatcher` must be spawned for paid invoices to be processed. It stops
/// once the bot and every confirmer clone are dropped.
pub struct Pipeline {
    pub bot: Arc<GenerateBot>,
    pub confirmer: PaymentConfirmer,
    pub dispatcher: PaymentDispatcher,
    pub orchestrator: Arc<JobOrchestrator>,
    pub refunds: Arc<RefundCompensator>,
}

/// Wire every component around one paid-event queue
pub fn assemble(deps: Dependencies, config: GenerateConfig, queue_capacity: usize) -> Pipeline {
    let config = Arc::new(config);
    let (events_tx, events_rx) = paid_event_channel(queue_capacity);
    let confirmer = PaymentConfirmer::new(deps.invoices.clone(), events_tx);

    let refunds = Arc::new(RefundCompensator::new(
        deps.invoices.clone(),
        deps.wallets.clone(),
        deps.lightning.clone(),
        deps.messenger.clone(),
        deps.service_wallet.clone(),
        config.clone(),
    ));

    let orchestrator = Arc::new(JobOrchestrator::new(
        deps.invoices.clone(),
        deps.wallets.clone(),
        deps.provider.clone(),
        deps.messenger.clone(),
        refunds.clone(),
        config.clone(),
    ));

    let collector =
        PromptCollector::new(deps.sessions.clone(), deps.messenger.clone(), config.session_ttl);
    let gate = InvoiceGate::new(
        deps.invoices.clone(),
        deps.wallets.clone(),
        deps.lightning.clone(),
        deps.messenger.clone(),
        confirmer.clone(),
        deps.service_wallet,
        config.clone(),
    );
    let bot = Arc::new(GenerateBot::new(
        collector,
        gate,
        deps.messenger,
        config.command.clone(),
    ));

    Pipeline {
        bot,
        confirmer,
        dispatcher: PaymentDispatcher::new(events_rx, orchestrator.clone()),
        orchestrator,
        refunds,
    }
}
