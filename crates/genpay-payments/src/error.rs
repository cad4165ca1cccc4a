//! Payment Error Types

use thiserror::Error;

use crate::invoice::{InvoiceId, InvoiceStatus};

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Lightning backend API error
    #[error("Lightning error: {0}")]
    Lightning(String),

    /// Lightning backend could not be reached
    #[error("Lightning transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Wallet balance does not cover a payment
    #[error("Insufficient balance: need {needed} sat, have {available} sat")]
    InsufficientBalance { needed: u64, available: u64 },

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Invoice not found
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    /// Requested status change is not an edge of the invoice state machine
    #[error("Invoice {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: InvoiceId,
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    /// User has no wallet to pay from or refund to
    #[error("User {0} has no wallet")]
    NoWallet(String),

    /// Paid-event queue is closed
    #[error("Payment event queue closed")]
    QueueClosed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    /// Check if this error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Lightning(_) | Self::Transport(_) | Self::Storage(_)
        )
    }

    /// Get user-friendly message
    pub const fn user_message(&self) -> &str {
        match self {
            Self::Lightning(_) | Self::Transport(_) => "Payment processing failed. Please try again.",
            Self::InsufficientBalance { .. } => "Your balance is too low for this payment.",
            Self::NoWallet(_) => "You don't have a wallet yet.",
            Self::Config(_) => "Service configuration error.",
            _ => "An error occurred processing your request.",
        }
    }
}
