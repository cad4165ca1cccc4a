//! Invoice Gate
//!
//! Prices a captured prompt and binds it to a lightning invoice. The invoice
//! is stored with its prompt before the user sees it, so the paid
//! notification only needs the invoice to start the job.

use std::sync::Arc;

use genpay_core::UserId;
use genpay_payments::{
    Funding, Invoice, InvoiceCallback, InvoiceId, InvoiceNote, InvoiceParams, InvoiceStore,
    LightningWallet, PaymentConfirmer, Wallet, WalletDirectory,
};

use serde::Serialize;

use crate::config::GenerateConfig;
use crate::error::{BotError, Result};
use crate::messenger::Messenger;

const PAY_INVOICE: &str = "Pay this invoice to generate your images. 🎨";

/// How the gate left the invoice
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateOutcome {
    /// Paid from the user's balance and handed to confirmation
    PaidFromBalance { invoice_id: InvoiceId },
    /// Payment request shown; waiting for the webhook
    AwaitingPayment {
        invoice_id: InvoiceId,
        payment_request: String,
    },
}

impl GateOutcome {
    pub const fn invoice_id(&self) -> &InvoiceId {
        match self {
            Self::PaidFromBalance { invoice_id } | Self::AwaitingPayment { invoice_id, .. } => {
                invoice_id
            }
        }
    }
}

pub struct InvoiceGate {
    store: Arc<dyn InvoiceStore>,
    wallets: Arc<dyn WalletDirectory>,
    lightning: Arc<dyn LightningWallet>,
    messenger: Arc<dyn Messenger>,
    confirmer: PaymentConfirmer,
    service_wallet: Wallet,
    config: Arc<GenerateConfig>,
}

impl InvoiceGate {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        wallets: Arc<dyn WalletDirectory>,
        lightning: Arc<dyn LightningWallet>,
        messenger: Arc<dyn Messenger>,
        confirmer: PaymentConfirmer,
        service_wallet: Wallet,
        config: Arc<GenerateConfig>,
    ) -> Self {
        Self {
            store,
            wallets,
            lightning,
            messenger,
            confirmer,
            service_wallet,
            config,
        }
    }

    /// Create the invoice for `prompt` and either pay it from balance or show it
    pub async fn create_invoice(&self, user: &UserId, prompt: &str) -> Result<GateOutcome> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(BotError::EmptyPrompt);
        }

        let user_wallet = self
            .wallets
            .wallet_of(user)?
            .ok_or_else(|| BotError::NoWallet(user.clone()))?;

        let amount_sat = self.config.price_sat;
        let memo = format!("{} for {user}", self.config.memo);
        let created = self
            .lightning
            .create_invoice(
                &self.service_wallet,
                &InvoiceParams {
                    amount_sat,
                    memo: memo.clone(),
                    webhook: self.config.webhook_url.clone(),
                },
            )
            .await
            .map_err(BotError::PaymentSetup)?;

        let invoice = Invoice::new(
            user.clone(),
            amount_sat,
            memo,
            created.payment_request,
            created.payment_hash,
            InvoiceCallback::GenerateImage,
            prompt,
        );
        self.store.insert(&invoice).map_err(BotError::PaymentSetup)?;

        tracing::info!(
            invoice_id = %invoice.id,
            user = %user,
            amount_sat,
            "Created generation invoice"
        );

        let balance = match self.lightning.balance(&user_wallet).await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!(user = %user, error = %e, "Could not get user balance");
                0
            }
        };

        if let Err(e) = self.messenger.send_text(user, PAY_INVOICE).await {
            tracing::warn!(user = %user, error = %e, "Could not send invoice notice");
        }

        if balance >= amount_sat {
            self.pay_from_balance(&user_wallet, &invoice).await?;
            return Ok(GateOutcome::PaidFromBalance {
                invoice_id: invoice.id,
            });
        }

        let message = self
            .messenger
            .send_payment_request(user, &invoice.payment_request)
            .await?;
        self.store
            .annotate(&invoice.id, InvoiceNote::Message(message))?;

        Ok(GateOutcome::AwaitingPayment {
            invoice_id: invoice.id,
            payment_request: invoice.payment_request,
        })
    }

    /// Internal payment: settle from the user's wallet, then confirm directly
    async fn pay_from_balance(&self, user_wallet: &Wallet, invoice: &Invoice) -> Result<()> {
        self.lightning
            .pay(user_wallet, &invoice.payment_request)
            .await
            .map_err(BotError::PaymentSetup)?;

        tracing::info!(invoice_id = %invoice.id, "Invoice paid from balance");

        // The backend may also fire the webhook for this payment. Only the
        // first confirmation enqueues; this one still records balance funding.
        self.confirmer.confirm(&invoice.id, Funding::Balance).await?;
        Ok(())
    }
}
