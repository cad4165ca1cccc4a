//! Generation Provider Strategy Pattern
//!
//! Defines a common interface for image generation backends so the job
//! orchestrator can submit, poll and download without knowing the vendor.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use genpay_core::provider::GenerationProvider;
//!
//! let handle = provider.submit("a lighthouse at dusk").await?;
//! let job = provider.status(&handle.id).await?;
//! ```
//!
//! Deadlines are not part of the trait: callers wrap each call in
//! `tokio::time::timeout_at` so one budget covers the whole job.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{GenerateError, Result};

/// Provider-assigned job identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle returned by a successful submission
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: JobId,
}

/// Status reported by the provider for a job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Succeeded,
    Rejected,
    /// Anything the provider reports that we do not model; never terminal
    #[serde(untagged)]
    Other(String),
}

impl JobStatus {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => Self::Pending,
            "succeeded" => Self::Succeeded,
            "rejected" => Self::Rejected,
            other => Self::Other(other.to_string()),
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Rejected)
    }
}

/// One produced output of a succeeded job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationArtifact {
    pub id: String,
}

impl GenerationArtifact {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Validate the id before it is used as a local file name
    pub fn cache_key(&self) -> Result<&str> {
        let valid = !self.id.is_empty()
            && self
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(&self.id)
        } else {
            Err(GenerateError::InvalidArtifact(self.id.clone()))
        }
    }
}

/// Snapshot of a job as reported by `status`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    /// Ordered as produced; empty until the job succeeds
    #[serde(default)]
    pub artifacts: Vec<GenerationArtifact>,
}

/// Stream of artifact bytes; dropping it releases the connection
pub type ArtifactStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Strategy trait for generation providers
///
/// Implement this trait to add support for new generation backends.
/// The orchestrator works exclusively through this interface.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Submit a prompt and return the provider's job handle
    async fn submit(&self, prompt: &str) -> Result<JobHandle>;

    /// Query the current state of a job
    async fn status(&self, job: &JobId) -> Result<JobSnapshot>;

    /// Open a byte stream for one artifact
    async fn download(&self, artifact: &GenerationArtifact) -> Result<ArtifactStream>;

    /// Check if the provider is reachable and configured
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Provider name for logs
    fn name(&self) -> &str;
}

/// Builds a provider client per job
///
/// Construction is fallible (bad credentials, TLS setup), and a failure
/// here happens after payment, so callers must treat it like a provider error.
pub trait ProviderFactory: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn GenerationProvider>>;
}

/// Factory that always hands out the same client
pub struct SharedProvider(pub Arc<dyn GenerationProvider>);

impl ProviderFactory for SharedProvider {
    fn connect(&self) -> Result<Arc<dyn GenerationProvider>> {
        Ok(self.0.clone())
    }
}
