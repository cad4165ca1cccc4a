//! Application State

use std::sync::Arc;

use genpay_bot::{GenerateBot, OutboxMessenger};
use genpay_core::{MemorySessionStore, ProviderFactory};
use genpay_payments::{LightningWallet, MemoryWalletDirectory, Wallet, WebhookHandler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Chat entry point of the generation flow
    pub bot: Arc<GenerateBot>,

    /// Reference chat transport; read back through the outbox endpoint
    pub outbox: Arc<OutboxMessenger>,

    /// LNbits payment notifications
    pub webhook: Arc<WebhookHandler>,

    /// Pending prompt captures, purged periodically
    pub sessions: Arc<MemorySessionStore>,

    /// User wallet registrations
    pub wallets: Arc<MemoryWalletDirectory>,

    /// Lightning backend, checked by the health check
    pub lightning: Arc<dyn LightningWallet>,

    /// Generation provider factory, checked by the health check
    pub provider: Arc<dyn ProviderFactory>,

    /// Wallet receiving payments and paying refunds
    pub service_wallet: Wallet,

    /// Bearer token for the chat and wallet routes
    pub api_token: Option<String>,
}
