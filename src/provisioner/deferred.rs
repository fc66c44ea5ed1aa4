//! Deferred-completion state machine.
//!
//! A step that cannot finish synchronously becomes a retry record. Each
//! redelivery resumes the owning provisioner's check, which either resolves
//! the step (report once), asks for redelivery (report nothing), continues
//! with a follow-up record, or abandons the step once the orchestrator has
//! stopped waiting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::{CheckOutcome, Provisioner};
use crate::config::past_wait_window;
use crate::error::Result;
use crate::model::{Outcome, PendingCheck, ProvisionRequest, RetryRecord};
use crate::queue::RetryQueue;
use crate::report::OutcomeReporter;

/// What the queue should do with a record after it was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordDisposition {
    /// The record is finished; delete it.
    Consumed,
    /// The record must be delivered again.
    Redeliver,
}

/// Returns true if the record has been pending longer than the wait window.
#[must_use]
pub fn expired(record: &RetryRecord, now: DateTime<Utc>) -> bool {
    past_wait_window(record.age(now))
}

/// Enqueues and resumes deferred steps.
#[derive(Clone)]
pub struct DeferredCompletion {
    queue: Arc<dyn RetryQueue>,
    reporter: Arc<dyn OutcomeReporter>,
}

impl std::fmt::Debug for DeferredCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCompletion").finish_non_exhaustive()
    }
}

impl DeferredCompletion {
    /// Creates the state machine over a queue and a reporter.
    #[must_use]
    pub fn new(queue: Arc<dyn RetryQueue>, reporter: Arc<dyn OutcomeReporter>) -> Self {
        Self { queue, reporter }
    }

    /// Enqueues the first record of a deferred step.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be enqueued.
    pub async fn defer(
        &self,
        request: &ProvisionRequest,
        check: PendingCheck,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let record = RetryRecord::from_request(check, request, now);
        let message_id = self.queue.enqueue(&record).await?;
        info!(
            "Deferred {:?} for {} as record {message_id}",
            record.record_type,
            request.logical_id()
        );
        Ok(())
    }

    /// Resumes a record through its owning provisioner.
    ///
    /// Provisioner failures are reported as FAILED and consume the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the outcome cannot be reported or a follow-up
    /// record cannot be enqueued; the record should then be redelivered.
    pub async fn resume(
        &self,
        provisioner: &dyn Provisioner,
        record: &RetryRecord,
        now: DateTime<Utc>,
    ) -> Result<RecordDisposition> {
        let outcome = match provisioner.check(record, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Provision check {:?} failed: {e}", record.record_type);
                let outcome = Outcome::failed(record.physical_id_or_sentinel(), e.to_string());
                self.reporter.report(&outcome, &record.correlation).await?;
                return Ok(RecordDisposition::Consumed);
            }
        };

        match outcome {
            CheckOutcome::Complete(outcome) => {
                self.reporter.report(&outcome, &record.correlation).await?;
                Ok(RecordDisposition::Consumed)
            }
            CheckOutcome::Pending(reason) => {
                info!("{reason}");
                Ok(RecordDisposition::Redeliver)
            }
            CheckOutcome::Requeue(check) => {
                let follow_up = record.follow_up(check);
                let message_id = self.queue.enqueue(&follow_up).await?;
                info!(
                    "Requeued {:?} as record {message_id}",
                    follow_up.record_type
                );
                Ok(RecordDisposition::Consumed)
            }
            CheckOutcome::Abandoned(reason) => {
                warn!("{reason}");
                Ok(RecordDisposition::Consumed)
            }
        }
    }
}
