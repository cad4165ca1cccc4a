//! Job Orchestrator
//!
//! Runs one paid invoice from submission to delivery or refund.
//!
//! ```text
//!  PaidEvent
//!     │  CAS Paid ──▶ Submitted        (redelivered events stop here)
//!     ▼
//!  connect ──▶ submit ──▶ poll ⟲ ──┬──▶ Succeeded ──▶ deliver ──▶ Delivered
//!     │          │          │      └──▶ Rejected  ──┐
//!     └──────────┴──────────┴── error / deadline ───┴──▶ refund
//! ```
//!
//! Submit, every poll and every download share one deadline.

use std::sync::Arc;

use genpay_core::{
    GenerateError, GenerationProvider, Job, JobId, JobPhase, ProviderFactory, UserId,
};
use genpay_payments::{InvoiceStatus, InvoiceStore, PaidEvent, Transition, WalletDirectory};
use tokio::time::Instant;

use crate::backoff::PollSchedule;
use crate::config::GenerateConfig;
use crate::deadline::within;
use crate::deliver::Deliverer;
use crate::error::Result;
use crate::messenger::Messenger;
use crate::refund::{RefundCompensator, RefundResult};

const GENERATING: &str = "Your images are being generated. Please wait...";
const INVOICE_PAID: &str = "Invoice paid. 🎨";

/// How a paid invoice was handled
#[derive(Clone, Debug)]
pub enum JobOutcome {
    /// The invoice had already been picked up
    Duplicate { current: InvoiceStatus },
    /// Paid but cannot be processed or refunded; needs manual recovery
    Stuck { reason: String },
    /// At least one artifact reached the user
    Delivered {
        job: JobId,
        delivered: usize,
        failed: usize,
    },
    /// The job failed and the refund path ran
    Refunded { phase: JobPhase, refund: RefundResult },
}

pub struct JobOrchestrator {
    store: Arc<dyn InvoiceStore>,
    wallets: Arc<dyn WalletDirectory>,
    factory: Arc<dyn ProviderFactory>,
    messenger: Arc<dyn Messenger>,
    deliverer: Deliverer,
    refunds: Arc<RefundCompensator>,
    config: Arc<GenerateConfig>,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        wallets: Arc<dyn WalletDirectory>,
        factory: Arc<dyn ProviderFactory>,
        messenger: Arc<dyn Messenger>,
        refunds: Arc<RefundCompensator>,
        config: Arc<GenerateConfig>,
    ) -> Self {
        let deliverer = Deliverer::new(messenger.clone(), &config);
        Self {
            store,
            wallets,
            factory,
            messenger,
            deliverer,
            refunds,
            config,
        }
    }

    /// Handle one paid-invoice event
    pub async fn run(&self, event: PaidEvent) -> Result<JobOutcome> {
        let invoice_id = &event.invoice_id;
        let user = &event.payer;

        let invoice = match self.store.transition(
            invoice_id,
            InvoiceStatus::Paid,
            InvoiceStatus::Submitted,
        )? {
            Transition::Applied(invoice) => invoice,
            Transition::Stale { current } => {
                tracing::debug!(invoice_id = %invoice_id, status = ?current, "Paid event already processed");
                return Ok(JobOutcome::Duplicate { current });
            }
        };

        if self.wallets.wallet_of(user)?.is_none() {
            let reason = format!("payer {user} has no wallet");
            tracing::error!(invoice_id = %invoice_id, user = %user, "Paid invoice is stuck: {reason}");
            return Ok(JobOutcome::Stuck { reason });
        }

        if let Some(message) = &invoice.message {
            if let Err(e) = self.messenger.edit_text(message, INVOICE_PAID).await {
                tracing::debug!(invoice_id = %invoice_id, error = %e, "Could not edit payment request");
            }
        }
        self.notify(user, GENERATING).await;

        let deadline = Instant::now() + self.config.deadline;

        let provider = match self.factory.connect() {
            Ok(provider) => provider,
            Err(e) => return self.compensate(&event, failed(&e)).await,
        };

        let handle = match within(deadline, "submit", provider.submit(&event.payload)).await {
            Ok(handle) => handle,
            Err(e) => return self.compensate(&event, failed(&e)).await,
        };

        tracing::info!(
            invoice_id = %invoice_id,
            job_id = %handle.id,
            provider = provider.name(),
            "Generation submitted"
        );

        let mut job = Job::submitted(handle.id);
        self.poll(provider.as_ref(), &mut job, deadline).await;

        match job.phase.clone() {
            JobPhase::Succeeded => self.deliver(&event, provider.as_ref(), &job, deadline).await,
            phase => self.compensate(&event, phase).await,
        }
    }

    /// Poll until the job is terminal, the attempt budget is spent or the deadline passes
    async fn poll(&self, provider: &dyn GenerationProvider, job: &mut Job, deadline: Instant) {
        let mut schedule = PollSchedule::new(self.config.poll.clone());

        while !job.phase.is_terminal() {
            let Some(delay) = schedule.next_delay() else {
                job.fail(GenerateError::PollExhausted(schedule.attempts()).to_string(), false);
                break;
            };

            let id = &job.id;
            let snapshot = within(deadline, "poll", async {
                tokio::time::sleep(delay).await;
                provider.status(id).await
            })
            .await;

            match snapshot {
                Ok(snapshot) => {
                    job.observe(snapshot);
                    tracing::debug!(job_id = %job.id, phase = ?job.phase, "Polled job");
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(job_id = %job.id, error = %e, "Status poll failed; retrying");
                }
                Err(e) => {
                    job.fail(e.to_string(), e.is_cancellation());
                }
            }
        }
    }

    async fn deliver(
        &self,
        event: &PaidEvent,
        provider: &dyn GenerationProvider,
        job: &Job,
        deadline: Instant,
    ) -> Result<JobOutcome> {
        let report = match self
            .deliverer
            .deliver_all(provider, &event.payer, &job.artifacts, deadline)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                let phase = JobPhase::Failed {
                    reason: e.to_string(),
                    timed_out: false,
                };
                return self.compensate(event, phase).await;
            }
        };

        if report.nothing_delivered() {
            let phase = JobPhase::Failed {
                reason: format!("none of {} artifacts could be delivered", job.artifacts.len()),
                timed_out: false,
            };
            return self.compensate(event, phase).await;
        }

        if let Transition::Stale { current } = self.store.transition(
            &event.invoice_id,
            InvoiceStatus::Submitted,
            InvoiceStatus::Delivered,
        )? {
            tracing::warn!(invoice_id = %event.invoice_id, status = ?current, "Invoice left Submitted during delivery");
        }

        tracing::info!(
            invoice_id = %event.invoice_id,
            job_id = %job.id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Generation delivered"
        );

        Ok(JobOutcome::Delivered {
            job: job.id.clone(),
            delivered: report.delivered.len(),
            failed: report.failed.len(),
        })
    }

    async fn compensate(&self, event: &PaidEvent, phase: JobPhase) -> Result<JobOutcome> {
        let cause = match &phase {
            JobPhase::Failed { reason, .. } => reason.clone(),
            other => format!("{other:?}").to_lowercase(),
        };
        tracing::warn!(invoice_id = %event.invoice_id, user = %event.payer, cause = %cause, "Generation failed");

        let refund = self.refunds.refund(&event.invoice_id, &cause).await?;
        Ok(JobOutcome::Refunded { phase, refund })
    }

    async fn notify(&self, user: &UserId, text: &str) {
        if let Err(e) = self.messenger.send_text(user, text).await {
            tracing::warn!(user = %user, error = %e, "Could not notify user");
        }
    }
}

fn failed(e: &GenerateError) -> JobPhase {
    JobPhase::Failed {
        reason: e.to_string(),
        timed_out: e.is_cancellation(),
    }
}
