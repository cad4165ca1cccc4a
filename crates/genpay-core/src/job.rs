//! Job Lifecycle
//!
//! ```text
//!               ┌──────────▶ Succeeded ──▶ delivery
//!  Submitted ───┼──────────▶ Rejected  ──▶ refund
//!               └──────────▶ Failed    ──▶ refund   (provider error, timeout)
//! ```
//!
//! Every terminal phase is reachable only from `Submitted`.

use serde::{Deserialize, Serialize};

use crate::provider::{GenerationArtifact, JobId, JobSnapshot, JobStatus};

/// Where a job sits in its lifecycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Submitted,
    Succeeded,
    Rejected,
    Failed { reason: String, timed_out: bool },
}

impl JobPhase {
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Submitted)
    }

    /// Whether this phase is followed by a compensating refund
    pub const fn needs_refund(&self) -> bool {
        matches!(self, Self::Rejected | Self::Failed { .. })
    }
}

/// A submitted job, owned by the task that submitted it
#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub phase: JobPhase,
    pub artifacts: Vec<GenerationArtifact>,
    pub polls: u32,
}

impl Job {
    pub const fn submitted(id: JobId) -> Self {
        Self {
            id,
            phase: JobPhase::Submitted,
            artifacts: Vec::new(),
            polls: 0,
        }
    }

    /// Apply a status snapshot; terminal phases are never left
    pub fn observe(&mut self, snapshot: JobSnapshot) -> &JobPhase {
        if self.phase.is_terminal() {
            return &self.phase;
        }
        self.polls += 1;
        match snapshot.status {
            JobStatus::Succeeded => {
                self.artifacts = snapshot.artifacts;
                self.phase = JobPhase::Succeeded;
            }
            JobStatus::Rejected => self.phase = JobPhase::Rejected,
            JobStatus::Pending | JobStatus::Other(_) => {}
        }
        &self.phase
    }

    /// Mark the job failed unless it already reached a terminal phase
    pub fn fail(&mut self, reason: impl Into<String>, timed_out: bool) -> &JobPhase {
        if !self.phase.is_terminal() {
            self.phase = JobPhase::Failed {
                reason: reason.into(),
                timed_out,
            };
        }
        &self.phase
    }
}
