//! # genpay-core
//!
//! Provider-agnostic generation abstraction, job lifecycle and prompt sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Job Orchestrator                      │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Prompt    │  │     Job     │  │ GenerationProvider  │  │
//! │  │  Sessions   │──│  Lifecycle  │──│     (Strategy)      │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `GenerationProvider` trait lets the orchestrator talk to DALL·E or
//! any other image backend without changing the payment flow.

pub mod chat;
pub mod error;
pub mod job;
pub mod provider;
pub mod session;

pub use chat::{MessageRef, UserId};
pub use error::{GenerateError, Result};
pub use job::{Job, JobPhase};
pub use provider::{
    ArtifactStream, GenerationArtifact, GenerationProvider, JobHandle, JobId, JobSnapshot,
    JobStatus, ProviderFactory, SharedProvider,
};
pub use session::{MemorySessionStore, PromptSession, PromptState, SessionStore};
