//! Lightning Wallet Abstraction
//!
//! The ledger itself lives in the lightning backend. This module only names
//! the operations the payment flow needs and where user wallets are
//! looked up.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use genpay_core::UserId;
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};

/// Keys for one backend wallet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    /// Spending key
    pub admin_key: String,
    /// Receive/read key
    pub invoice_key: String,
}

/// Parameters for an inbound invoice
#[derive(Clone, Debug, Serialize)]
pub struct InvoiceParams {
    pub amount_sat: u64,
    pub memo: String,
    /// URL the backend calls once the invoice is paid
    pub webhook: Option<String>,
}

/// Invoice as created by the backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedInvoice {
    pub payment_request: String,
    pub payment_hash: String,
}

/// Result of paying an invoice
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub payment_hash: String,
}

/// Lightning backend trait (Strategy pattern)
#[async_trait]
pub trait LightningWallet: Send + Sync {
    /// Create an invoice payable to `wallet`
    async fn create_invoice(&self, wallet: &Wallet, params: &InvoiceParams)
    -> Result<CreatedInvoice>;

    /// Pay `payment_request` from `wallet`
    async fn pay(&self, wallet: &Wallet, payment_request: &str) -> Result<Settlement>;

    /// Spendable balance of `wallet` in sats
    async fn balance(&self, wallet: &Wallet) -> Result<u64>;

    /// Whether the backend has settled the invoice with `payment_hash`
    async fn is_paid(&self, wallet: &Wallet, payment_hash: &str) -> Result<bool>;
}

/// Maps chat users to their wallets
pub trait WalletDirectory: Send + Sync {
    fn wallet_of(&self, user: &UserId) -> Result<Option<Wallet>>;

    /// Like `wallet_of`, but a missing wallet is an error
    fn require_wallet(&self, user: &UserId) -> Result<Wallet> {
        self.wallet_of(user)?
            .ok_or_else(|| PaymentError::NoWallet(user.to_string()))
    }
}

/// In-memory wallet directory
pub struct MemoryWalletDirectory {
    wallets: RwLock<HashMap<UserId, Wallet>>,
}

impl Default for MemoryWalletDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWalletDirectory {
    pub fn new() -> Self {
        Self {
            wallets: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, user: UserId, wallet: Wallet) -> Result<()> {
        let mut wallets = self.wallets.write().map_err(poisoned)?;
        tracing::info!(user = %user, wallet = %wallet.id, "Registered wallet");
        wallets.insert(user, wallet);
        Ok(())
    }

    pub fn remove(&self, user: &UserId) -> Result<Option<Wallet>> {
        let mut wallets = self.wallets.write().map_err(poisoned)?;
        Ok(wallets.remove(user))
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> PaymentError {
    PaymentError::Storage("wallet directory lock poisoned".into())
}

impl WalletDirectory for MemoryWalletDirectory {
    fn wallet_of(&self, user: &UserId) -> Result<Option<Wallet>> {
        let wallets = self.wallets.read().map_err(poisoned)?;
        Ok(wallets.get(user).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_wallet() {
        let directory = MemoryWalletDirectory::new();
        let user = UserId::new("7");
        assert!(matches!(
            directory.require_wallet(&user),
            Err(PaymentError::NoWallet(_))
        ));

        directory
            .register(
                user.clone(),
                Wallet {
                    id: "w1".into(),
                    admin_key: "admin".into(),
                    invoice_key: "inkey".into(),
                },
            )
            .unwrap();
        assert_eq!(directory.require_wallet(&user).unwrap().id, "w1");

        directory.remove(&user).unwrap();
        assert!(directory.wallet_of(&user).unwrap().is_none());
    }
}
