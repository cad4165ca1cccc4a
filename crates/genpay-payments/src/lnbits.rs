//! LNbits Integration
//!
//! Implements [`LightningWallet`] against the LNbits payments API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};
use crate::wallet::{CreatedInvoice, InvoiceParams, LightningWallet, Settlement, Wallet};

/// LNbits client configuration
#[derive(Clone, Debug)]
pub struct LnbitsConfig {
    /// Base URL of the LNbits instance
    pub url: String,

    /// Public URL LNbits should call when an invoice is paid
    pub webhook_url: Option<String>,

    /// Shared secret for webhook signatures
    pub webhook_secret: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LnbitsConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000".into(),
            webhook_url: None,
            webhook_secret: None,
            timeout_secs: 30,
        }
    }
}

impl LnbitsConfig {
    pub fn from_env() -> Self {
        let url = std::env::var("LNBITS_URL").unwrap_or_else(|_| "http://localhost:5000".into());
        let timeout_secs = std::env::var("LNBITS_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(30);

        Self {
            url,
            webhook_url: std::env::var("LNBITS_WEBHOOK_URL").ok(),
            webhook_secret: std::env::var("LNBITS_WEBHOOK_SECRET").ok(),
            timeout_secs,
        }
    }
}

/// LNbits client
pub struct LnbitsClient {
    http: reqwest::Client,
    config: LnbitsConfig,
}

#[derive(Serialize)]
struct CreateInvoiceBody<'a> {
    out: bool,
    amount: u64,
    memo: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook: Option<&'a str>,
}

#[derive(Serialize)]
struct PayBody<'a> {
    out: bool,
    bolt11: &'a str,
}

#[derive(Deserialize)]
struct PaymentResponse {
    payment_hash: String,
    #[serde(default, alias = "bolt11")]
    payment_request: Option<String>,
}

#[derive(Deserialize)]
struct WalletResponse {
    /// Millisatoshis
    balance: u64,
}

#[derive(Deserialize)]
struct PaymentStatusResponse {
    paid: bool,
}

#[derive(Deserialize)]
struct ErrorResponse {
    detail: String,
}

impl LnbitsClient {
    /// Create a new LNbits client
    pub fn new(config: LnbitsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaymentError::Config(format!("http client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(LnbitsConfig::from_env())
    }

    pub const fn config(&self) -> &LnbitsConfig {
        &self.config
    }

    fn payments_url(&self) -> String {
        format!("{}/api/v1/payments", self.config.url.trim_end_matches('/'))
    }

    fn payment_url(&self, payment_hash: &str) -> String {
        format!("{}/{payment_hash}", self.payments_url())
    }

    fn wallet_url(&self) -> String {
        format!("{}/api/v1/wallet", self.config.url.trim_end_matches('/'))
    }

    async fn read<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let detail = match response.json::<ErrorResponse>().await {
            Ok(body) => body.detail,
            Err(_) => status.to_string(),
        };
        Err(PaymentError::Lightning(detail))
    }
}

#[async_trait]
impl LightningWallet for LnbitsClient {
    async fn create_invoice(
        &self,
        wallet: &Wallet,
        params: &InvoiceParams,
    ) -> Result<CreatedInvoice> {
        let webhook = params
            .webhook
            .as_deref()
            .or(self.config.webhook_url.as_deref());
        let body = CreateInvoiceBody {
            out: false,
            amount: params.amount_sat,
            memo: &params.memo,
            webhook,
        };

        let response = self
            .http
            .post(self.payments_url())
            .header("X-Api-Key", &wallet.invoice_key)
            .json(&body)
            .send()
            .await?;
        let payment: PaymentResponse = Self::read(response).await?;

        let payment_request = payment.payment_request.ok_or_else(|| {
            PaymentError::Lightning("No payment request returned".into())
        })?;

        tracing::debug!(
            wallet = %wallet.id,
            amount_sat = params.amount_sat,
            payment_hash = %payment.payment_hash,
            "Created invoice"
        );

        Ok(CreatedInvoice {
            payment_request,
            payment_hash: payment.payment_hash,
        })
    }

    async fn pay(&self, wallet: &Wallet, payment_request: &str) -> Result<Settlement> {
        let body = PayBody {
            out: true,
            bolt11: payment_request,
        };

        let response = self
            .http
            .post(self.payments_url())
            .header("X-Api-Key", &wallet.admin_key)
            .json(&body)
            .send()
            .await?;
        let payment: PaymentResponse = Self::read(response).await?;

        tracing::debug!(wallet = %wallet.id, payment_hash = %payment.payment_hash, "Paid invoice");

        Ok(Settlement {
            payment_hash: payment.payment_hash,
        })
    }

    async fn balance(&self, wallet: &Wallet) -> Result<u64> {
        let response = self
            .http
            .get(self.wallet_url())
            .header("X-Api-Key", &wallet.invoice_key)
            .send()
            .await?;
        let body: WalletResponse = Self::read(response).await?;

        Ok(body.balance / 1000)
    }

    async fn is_paid(&self, wallet: &Wallet, payment_hash: &str) -> Result<bool> {
        let response = self
            .http
            .get(self.payment_url(payment_hash))
            .header("X-Api-Key", &wallet.invoice_key)
            .send()
            .await?;
        let body: PaymentStatusResponse = Self::read(response).await?;

        tracing::debug!(wallet = %wallet.id, payment_hash, paid = body.paid, "Checked invoice");
        Ok(body.paid)
    }
}
