//! Refund Compensator
//!
//! Pays the generation price back to the user when a paid job fails.
//!
//! ```text
//!  Submitted ──CAS──▶ Refunded
//!                       │
//!                       ├─ 1. create invoice on the user's wallet
//!                       └─ 2. pay it from the service wallet
//! ```
//!
//! The compare-and-set happens before either leg, so however many failure
//! paths race for the same invoice, only the first one moves money. The
//! outcome is recorded on the invoice; a failed refund is never retried.

use std::sync::Arc;

use chrono::Utc;
use genpay_core::UserId;
use genpay_payments::{
    Invoice, InvoiceId, InvoiceNote, InvoiceParams, InvoiceStatus, InvoiceStore, LightningWallet,
    PaymentError, RefundOutcome, RefundRecord, Settlement, Transition, Wallet, WalletDirectory,
};

use crate::config::GenerateConfig;
use crate::error::{BotError, Result};
use crate::messenger::Messenger;

/// What a refund request ended up doing
#[derive(Clone, Debug)]
pub enum RefundResult {
    /// This caller issued the refund
    Refunded(RefundRecord),
    /// The invoice was no longer refundable (already refunded or delivered)
    Skipped { current: InvoiceStatus },
}

impl RefundResult {
    pub const fn is_refunded(&self) -> bool {
        matches!(self, Self::Refunded(_))
    }
}

pub struct RefundCompensator {
    store: Arc<dyn InvoiceStore>,
    wallets: Arc<dyn WalletDirectory>,
    lightning: Arc<dyn LightningWallet>,
    messenger: Arc<dyn Messenger>,
    service_wallet: Wallet,
    config: Arc<GenerateConfig>,
}

impl RefundCompensator {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        wallets: Arc<dyn WalletDirectory>,
        lightning: Arc<dyn LightningWallet>,
        messenger: Arc<dyn Messenger>,
        service_wallet: Wallet,
        config: Arc<GenerateConfig>,
    ) -> Self {
        Self {
            store,
            wallets,
            lightning,
            messenger,
            service_wallet,
            config,
        }
    }

    /// Refund `invoice_id` because of `cause`
    ///
    /// Returns `Err(BotError::Refund)` when this caller owned the refund but
    /// could not complete it; the failure is already recorded on the invoice.
    pub async fn refund(&self, invoice_id: &InvoiceId, cause: &str) -> Result<RefundResult> {
        let invoice = match self.store.transition(
            invoice_id,
            InvoiceStatus::Submitted,
            InvoiceStatus::Refunded,
        )? {
            Transition::Applied(invoice) => invoice,
            Transition::Stale { current } => {
                tracing::debug!(invoice_id = %invoice_id, status = ?current, "Refund already handled");
                return Ok(RefundResult::Skipped { current });
            }
        };

        tracing::info!(
            invoice_id = %invoice_id,
            user = %invoice.payer,
            amount_sat = invoice.amount_sat(),
            funding = ?invoice.funding,
            cause,
            "Refunding generation"
        );

        let outcome = match self.issue(&invoice).await {
            Ok(settlement) => RefundOutcome::Settled {
                payment_hash: settlement.payment_hash,
            },
            Err(e) => RefundOutcome::Failed {
                reason: e.to_string(),
            },
        };

        let record = RefundRecord {
            invoice_id: invoice_id.clone(),
            issued_at: Utc::now(),
            outcome,
        };
        if let Err(e) = self
            .store
            .annotate(invoice_id, InvoiceNote::Refund(record.clone()))
        {
            tracing::error!(invoice_id = %invoice_id, error = %e, "Could not record refund outcome");
        }

        match &record.outcome {
            RefundOutcome::Settled { payment_hash } => {
                tracing::info!(invoice_id = %invoice_id, payment_hash = %payment_hash, "Refund settled");
                self.notify(
                    &invoice.payer,
                    &format!(
                        "Image generation failed. Your {} sat were refunded.",
                        invoice.amount_sat()
                    ),
                )
                .await;
                Ok(RefundResult::Refunded(record))
            }
            RefundOutcome::Failed { reason } => {
                tracing::error!(
                    invoice_id = %invoice_id,
                    user = %invoice.payer,
                    amount_sat = invoice.amount_sat(),
                    reason = %reason,
                    "Refund failed; manual recovery required"
                );
                self.notify(
                    &invoice.payer,
                    "Image generation failed and the refund could not be sent. Please contact support.",
                )
                .await;
                Err(BotError::Refund {
                    invoice_id: invoice_id.clone(),
                    reason: reason.clone(),
                })
            }
        }
    }

    /// The two legs: receivable on the user's wallet, paid by the service
    async fn issue(&self, invoice: &Invoice) -> std::result::Result<Settlement, PaymentError> {
        let user_wallet = self.wallets.require_wallet(&invoice.payer)?;

        let receivable = self
            .lightning
            .create_invoice(
                &user_wallet,
                &InvoiceParams {
                    amount_sat: invoice.amount_sat(),
                    memo: self.config.refund_memo.clone(),
                    webhook: self.config.webhook_url.clone(),
                },
            )
            .await?;

        self.lightning
            .pay(&self.service_wallet, &receivable.payment_request)
            .await
    }

    async fn notify(&self, user: &UserId, text: &str) {
        if let Err(e) = self.messenger.send_text(user, text).await {
            tracing::warn!(user = %user, error = %e, "Could not send refund notice");
        }
    }
}
