//! Error Types

use thiserror::Error;

/// Result type alias for generation operations
pub type Result<T> = std::result::Result<T, GenerateError>;

/// Generation error types
#[derive(Error, Debug)]
pub enum GenerateError {
    /// Generation provider returned an error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider client could not be constructed
    #[error("Provider setup failed: {0}")]
    ProviderSetup(String),

    /// The job deadline elapsed while a provider call was in flight
    #[error("Cancelled: deadline elapsed during {0}")]
    Cancelled(&'static str),

    /// Polling gave up before the job reached a terminal state
    #[error("Polling exhausted after {0} attempts")]
    PollExhausted(u32),

    /// Provider rejected the prompt
    #[error("Job rejected: {0}")]
    Rejected(String),

    /// Artifact id is not usable as a cache key
    #[error("Invalid artifact id: {0}")]
    InvalidArtifact(String),

    /// Session store error
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl GenerateError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::RateLimited(_) | Self::Io(_)
        )
    }

    /// Whether the error came from the job deadline rather than the provider
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(_) | Self::ProviderUnavailable(_) | Self::ProviderSetup(_) => {
                "The image service is currently unavailable. Please try again later.".into()
            }
            Self::Cancelled(_) | Self::PollExhausted(_) => {
                "Image generation took too long and was cancelled.".into()
            }
            Self::Rejected(_) => "The image service rejected your prompt.".into(),
            Self::RateLimited(_) => "Too many requests. Please wait a moment.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for GenerateError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
