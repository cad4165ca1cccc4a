//! Job deadline
//!
//! One wall-clock budget covers submit, every poll and every download of a
//! job. Each stage runs under [`within`], so a stage that outlives the budget
//! is abandoned at the deadline instead of at its own timeout.

use std::future::Future;

use genpay_core::GenerateError;
use tokio::time::Instant;

/// Run `fut` until `deadline`; past it the stage fails with `Cancelled(stage)`
pub async fn within<T, F>(deadline: Instant, stage: &'static str, fut: F) -> Result<T, GenerateError>
where
    F: Future<Output = Result<T, GenerateError>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(GenerateError::Cancelled(stage)),
    }
}
