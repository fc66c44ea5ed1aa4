//! Provisioner contract.
//!
//! Every resource type implements [`Provisioner`]. A lifecycle step resolves
//! to one of three shapes:
//!
//! - [`Provisioned::Complete`]: the outcome is known now and is reported once.
//! - [`Provisioned::Deferred`]: the remote operation was accepted but is not
//!   finished; a retry record is enqueued and the outcome is reported later
//!   by [`Provisioner::check`].
//! - [`Provisioned::AwaitingBuild`]: a build was started and its completion
//!   event reports the outcome.
//!
//! Checks distinguish "report now" from "redeliver later" explicitly through
//! [`CheckOutcome`] instead of overloading the error channel.

pub mod deferred;
pub mod fanout;
mod registry;

pub use deferred::{DeferredCompletion, RecordDisposition};
pub use fanout::{RegionDiff, RegionOperationResult, RegionResult};
pub use registry::Registry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ProvisionError;
use crate::model::{Outcome, PendingCheck, ProvisionRequest, RequestType, ResourceType, RetryRecord};

/// Result of a lifecycle step.
#[derive(Debug, Clone, PartialEq)]
pub enum Provisioned {
    /// Terminal outcome, ready to report.
    Complete(Outcome),
    /// Continue later through a retry record.
    Deferred(PendingCheck),
    /// A build was started; its completion event reports the outcome.
    AwaitingBuild,
}

/// Result of a deferred check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// Terminal outcome, ready to report.
    Complete(Outcome),
    /// Still in progress; redeliver the same record later. Nothing is reported.
    Pending(String),
    /// Continue with a new record that keeps the original enqueue time.
    Requeue(PendingCheck),
    /// Stop without reporting; the orchestrator has already given up.
    Abandoned(String),
}

/// Create/update/delete (and optionally check) for one resource type.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Returns the resource type this provisioner handles.
    fn resource_type(&self) -> ResourceType;

    /// Creates the resource.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed input or an unrecoverable remote failure.
    async fn create(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError>;

    /// Updates the resource.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed input or an unrecoverable remote failure.
    async fn update(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError>;

    /// Deletes the resource. A resource that is already gone is a success.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed input or an unrecoverable remote failure.
    async fn delete(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError>;

    /// Resumes a deferred operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be resumed by this provisioner
    /// or the operation failed in a way that has no outcome to report.
    async fn check(
        &self,
        record: &RetryRecord,
        _now: DateTime<Utc>,
    ) -> Result<CheckOutcome, ProvisionError> {
        Err(ProvisionError::failed(format!(
            "Unexpected provision check record type {:?} for {}",
            record.record_type,
            self.resource_type()
        )))
    }

    /// Routes a request to the step it names.
    ///
    /// # Errors
    ///
    /// Returns an error for an unrecognized request type, before any remote
    /// call, or whatever the step returns.
    async fn provision(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        match &request.request_type {
            RequestType::Create => self.create(request).await,
            RequestType::Update => self.update(request).await,
            RequestType::Delete => self.delete(request).await,
            RequestType::Unknown(other) => Err(ProvisionError::InvalidRequestType {
                request_type: other.clone(),
            }),
        }
    }
}
