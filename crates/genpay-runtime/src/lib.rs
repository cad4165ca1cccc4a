//! # genpay-runtime
//!
//! Generation provider implementations for genpay.
//!
//! ## Providers
//!
//! - **DALL·E** (default): labs task API with bearer-token auth
//!
//! ## Usage
//!
//! ```rust,ignore
//! use genpay_runtime::DalleConfig;
//!
//! let factory = Arc::new(DalleConfig::from_env());
//! let orchestrator = JobOrchestrator::new(factory, ...);
//! ```

#[cfg(feature = "dalle")]
pub mod dalle;

#[cfg(feature = "dalle")]
pub use dalle::{DalleConfig, DalleProvider};

// Re-export core types for convenience
pub use genpay_core::{
    GenerateError, GenerationArtifact, GenerationProvider, JobHandle, JobId, JobSnapshot,
    JobStatus, ProviderFactory, Result,
};
