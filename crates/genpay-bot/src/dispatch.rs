//! Paid-event dispatcher
//!
//! Drains the paid-event queue and runs every event on its own task, so a
//! slow job never holds up the next payment. When the queue closes the
//! dispatcher waits for the jobs still in flight.

use std::sync::Arc;

use genpay_payments::PaidEventReceiver;
use tokio::task::JoinSet;

use crate::orchestrator::{JobOrchestrator, JobOutcome};

pub struct PaymentDispatcher {
    events: PaidEventReceiver,
    orchestrator: Arc<JobOrchestrator>,
}

impl PaymentDispatcher {
    pub const fn new(events: PaidEventReceiver, orchestrator: Arc<JobOrchestrator>) -> Self {
        Self {
            events,
            orchestrator,
        }
    }

    /// Run until every sender is dropped; returns the number of events handled
    pub async fn run(mut self) -> usize {
        let mut jobs = JoinSet::new();
        let mut handled = 0;

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    handled += 1;
                    let orchestrator = self.orchestrator.clone();
                    jobs.spawn(async move {
                        let invoice_id = event.invoice_id.clone();
                        match orchestrator.run(event).await {
                            Ok(outcome) => log_outcome(&invoice_id, &outcome),
                            Err(e) => tracing::error!(
                                invoice_id = %invoice_id,
                                kind = ?e.kind(),
                                error = %e,
                                "Generation job failed"
                            ),
                        }
                    });
                }
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Generation task panicked");
                    }
                }
            }
        }

        tracing::info!(in_flight = jobs.len(), "Paid-event queue closed; draining jobs");
        while let Some(joined) = jobs.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Generation task panicked");
            }
        }
        handled
    }
}

fn log_outcome(invoice_id: &genpay_payments::InvoiceId, outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Duplicate { current } => {
            tracing::debug!(invoice_id = %invoice_id, status = ?current, "Duplicate paid event");
        }
        JobOutcome::Stuck { reason } => {
            tracing::error!(invoice_id = %invoice_id, reason = %reason, "Job stuck");
        }
        JobOutcome::Delivered { delivered, failed, .. } => {
            tracing::info!(invoice_id = %invoice_id, delivered, failed, "Job finished");
        }
        JobOutcome::Refunded { phase, .. } => {
            tracing::info!(invoice_id = %invoice_id, phase = ?phase, "Job refunded");
        }
    }
}
