//! LNbits Webhook Handling
//!
//! Turns payment notifications into paid-invoice events. A notification is
//! only a hint: the invoice is checked against the backend before it is
//! confirmed, so a forged body cannot start a job or a refund.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{PaymentError, Result};
use crate::events::{Confirmation, PaymentConfirmer};
use crate::invoice::{Funding, InvoiceId, InvoiceStatus, InvoiceStore};
use crate::wallet::{LightningWallet, Wallet};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw body
pub const SIGNATURE_HEADER: &str = "x-genpay-signature";

/// Payment notification body as posted by LNbits
#[derive(Clone, Debug, Deserialize)]
pub struct WebhookPayload {
    pub payment_hash: String,
    /// Millisatoshis
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub pending: Option<bool>,
}

/// Parsed webhook event
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WebhookEvent {
    /// Invoice moved to paid and a job event was enqueued
    Paid { invoice_id: InvoiceId },

    /// Redelivery of an already confirmed payment
    Duplicate {
        invoice_id: InvoiceId,
        status: InvoiceStatus,
    },

    /// Payment not settled yet
    Pending { payment_hash: String },

    /// The backend does not report this invoice as paid
    NotPaid { invoice_id: InvoiceId },

    /// Settled amount is below the invoice amount
    Underpaid {
        invoice_id: InvoiceId,
        expected_msat: i64,
        received_msat: i64,
    },

    /// No invoice with this payment hash
    Unknown { payment_hash: String },
}

/// Webhook handler
pub struct WebhookHandler {
    store: Arc<dyn InvoiceStore>,
    confirmer: PaymentConfirmer,
    lightning: Arc<dyn LightningWallet>,
    /// Wallet the invoices were issued on
    service_wallet: Wallet,
    secret: Option<String>,
}

impl WebhookHandler {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        confirmer: PaymentConfirmer,
        lightning: Arc<dyn LightningWallet>,
        service_wallet: Wallet,
        secret: Option<String>,
    ) -> Self {
        Self {
            store,
            confirmer,
            lightning,
            service_wallet,
            secret,
        }
    }

    /// Verify the body signature (if a secret is configured) and parse it
    pub fn parse_event(&self, body: &[u8], signature: Option<&str>) -> Result<WebhookPayload> {
        if let Some(secret) = &self.secret {
            let signature = signature.ok_or_else(|| {
                PaymentError::WebhookSignature("missing signature header".into())
            })?;
            verify_signature(secret, body, signature)?;
        }

        serde_json::from_slice(body).map_err(|e| PaymentError::WebhookParse(e.to_string()))
    }

    /// Process a webhook payload
    pub async fn handle(&self, payload: WebhookPayload) -> Result<WebhookEvent> {
        tracing::info!(payment_hash = %payload.payment_hash, "Processing payment webhook");

        if payload.pending.unwrap_or(false) {
            return Ok(WebhookEvent::Pending {
                payment_hash: payload.payment_hash,
            });
        }

        let Some(invoice) = self.store.get_by_payment_hash(&payload.payment_hash)? else {
            tracing::warn!(payment_hash = %payload.payment_hash, "Webhook for unknown invoice");
            return Ok(WebhookEvent::Unknown {
                payment_hash: payload.payment_hash,
            });
        };

        let expected_msat = i64::try_from(invoice.amount_sat())
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        if let Some(received_msat) = payload.amount {
            if received_msat < expected_msat {
                tracing::warn!(
                    invoice_id = %invoice.id,
                    expected_msat,
                    received_msat,
                    "Underpaid invoice"
                );
                return Ok(WebhookEvent::Underpaid {
                    invoice_id: invoice.id,
                    expected_msat,
                    received_msat,
                });
            }
        }

        if !self
            .lightning
            .is_paid(&self.service_wallet, &invoice.payment_hash)
            .await?
        {
            tracing::warn!(invoice_id = %invoice.id, "Webhook for an invoice the backend has not settled");
            return Ok(WebhookEvent::NotPaid {
                invoice_id: invoice.id,
            });
        }

        match self.confirmer.confirm(&invoice.id, Funding::External).await? {
            Confirmation::Accepted(_) => Ok(WebhookEvent::Paid {
                invoice_id: invoice.id,
            }),
            Confirmation::Duplicate { current } => Ok(WebhookEvent::Duplicate {
                invoice_id: invoice.id,
                status: current,
            }),
        }
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Config(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> Result<()> {
    let expected = hex::decode(signature.trim())
        .map_err(|e| PaymentError::WebhookSignature(e.to_string()))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Config(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| PaymentError::WebhookSignature("signature mismatch".into()))
}
