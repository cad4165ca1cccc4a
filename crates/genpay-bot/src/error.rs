//! Error Types for the Generation Flow

use genpay_core::{GenerateError, UserId};
use genpay_payments::{InvoiceId, PaymentError};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotError>;

/// Coarse error classes; each one has a fixed handling policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected before any funds move; the user gets a message
    UserInput,
    /// Invoice could not be set up; no job is submitted
    PaymentSetup,
    /// Generation failed after payment; triggers one refund
    Provider,
    /// Compensating payment failed; logged for manual recovery
    Refund,
    /// Storage or transport problems inside the service
    Internal,
}

#[derive(Error, Debug)]
pub enum BotError {
    #[error("User {0} has no wallet")]
    NoWallet(UserId),

    #[error("Prompt not given")]
    EmptyPrompt,

    #[error("Payment setup failed: {0}")]
    PaymentSetup(#[source] PaymentError),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerateError),

    #[error("Refund for invoice {invoice_id} failed: {reason}")]
    Refund { invoice_id: InvoiceId, reason: String },

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Chat error: {0}")]
    Chat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BotError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoWallet(_) | Self::EmptyPrompt => ErrorKind::UserInput,
            Self::PaymentSetup(_) => ErrorKind::PaymentSetup,
            Self::Generation(GenerateError::Session(_)) => ErrorKind::Internal,
            Self::Generation(_) | Self::Io(_) => ErrorKind::Provider,
            Self::Refund { .. } => ErrorKind::Refund,
            Self::Payment(_) | Self::Chat(_) => ErrorKind::Internal,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::NoWallet(_) => "You don't have a wallet yet. Use /start to create one.".into(),
            Self::EmptyPrompt => "Please enter a prompt for your image.".into(),
            Self::PaymentSetup(e) => e.user_message().into(),
            Self::Generation(e) => e.user_message(),
            _ => "Something went wrong. Please try again later.".into(),
        }
    }
}
