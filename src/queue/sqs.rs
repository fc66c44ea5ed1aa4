//! Retry queue backed by SQS.

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use tracing::info;

use super::RetryQueue;
use crate::error::QueueError;
use crate::model::RetryRecord;

/// SQS-backed retry queue.
#[derive(Debug, Clone)]
pub struct SqsRetryQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsRetryQueue {
    /// Creates a queue sending to the given URL.
    #[must_use]
    pub fn new(client: aws_sdk_sqs::Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }
}

#[async_trait]
impl RetryQueue for SqsRetryQueue {
    async fn enqueue(&self, record: &RetryRecord) -> Result<String, QueueError> {
        let body = serde_json::to_string(record)?;

        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(&body)
            .send()
            .await
            .map_err(|e| QueueError::Send {
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let message_id = output.message_id().unwrap_or_default().to_string();
        info!("Enqueued provision check record with id {message_id}: {body}");
        Ok(message_id)
    }
}
