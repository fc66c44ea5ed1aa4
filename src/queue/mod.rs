//! Durable retry queue for deferred checks.
//!
//! The queue is fire-and-forget and at-least-once: each enqueued record is
//! delivered back to the agent later as part of a record batch.

#[cfg(feature = "lambda")]
mod sqs;

#[cfg(feature = "lambda")]
pub use sqs::SqsRetryQueue;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::model::RetryRecord;

/// Append-only queue of retry records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RetryQueue: Send + Sync {
    /// Enqueues a record and returns the queue's message id.
    async fn enqueue(&self, record: &RetryRecord) -> Result<String, QueueError>;
}
