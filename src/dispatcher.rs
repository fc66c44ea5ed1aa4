//! Event dispatcher.
//!
//! Classifies an inbound event into one of three shapes and routes it:
//!
//! 1. **Lifecycle request** (has `RequestType`): registry lookup, then
//!    `provision`. The outcome is reported, deferred, or left to a build.
//! 2. **Queue batch** (has `Records`): each record resumes its owning
//!    provisioner's check. Records are handled concurrently and
//!    independently; the ones to redeliver are returned as batch item
//!    failures.
//! 3. **Build completion** (`source` is the build service): translated into a
//!    terminal outcome using the correlation values the build carried.
//!
//! A lifecycle request that fails is reported as FAILED and the error is
//! also returned, so the hosting runtime records the failed invocation too.

use std::sync::Arc;

use aws_lambda_events::codebuild::CodeBuildEvent;
use aws_lambda_events::sqs::{BatchItemFailure, SqsBatchResponse, SqsEvent, SqsMessage};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::{AgentError, DispatchError, ProvisionError, Result};
use crate::model::{
    BuildCompletion, Outcome, ProvisionRequest, RequestType, RetryRecord, BUILD_EVENT_SOURCE,
    SENTINEL_PHYSICAL_ID,
};
use crate::provisioner::{DeferredCompletion, Provisioned, RecordDisposition, Registry};
use crate::report::OutcomeReporter;

/// Event source of queue-delivered records.
const QUEUE_EVENT_SOURCE: &str = "aws:sqs";

/// Queue attribute holding the send time in epoch milliseconds.
const SENT_TIMESTAMP: &str = "SentTimestamp";

/// What an invocation produced, returned to the hosting runtime.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DispatchReport {
    /// A lifecycle request was handled.
    Provisioned,
    /// A queue batch was handled; lists the records to redeliver.
    Batch(SqsBatchResponse),
    /// A build-completion event was translated into an outcome.
    Build,
}

/// When the transport first accepted the message.
fn sent_at(message: &SqsMessage) -> Option<DateTime<Utc>> {
    let millis = message.attributes.get(SENT_TIMESTAMP)?.parse::<i64>().ok()?;
    DateTime::from_timestamp_millis(millis)
}

/// Parses a message body as a retry record. Records written without an
/// enqueue time fall back to the transport's send time.
fn retry_record(message: &SqsMessage) -> std::result::Result<RetryRecord, DispatchError> {
    let raw = message.body.as_deref().unwrap_or_default();
    let malformed = || DispatchError::MalformedRecord {
        body: raw.to_string(),
    };

    let mut body: Value = serde_json::from_str(raw).map_err(|_| malformed())?;
    if let (Some(fields), Some(sent_at)) = (body.as_object_mut(), sent_at(message)) {
        fields
            .entry("EnqueuedAt")
            .or_insert_with(|| Value::String(sent_at.to_rfc3339()));
    }
    serde_json::from_value(body).map_err(|_| malformed())
}

/// Routes inbound events to provisioners.
pub struct Dispatcher {
    registry: Registry,
    deferred: DeferredCompletion,
    reporter: Arc<dyn OutcomeReporter>,
    region: String,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher for the agent running in `region`.
    #[must_use]
    pub fn new(
        registry: Registry,
        deferred: DeferredCompletion,
        reporter: Arc<dyn OutcomeReporter>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            deferred,
            reporter,
            region: region.into(),
        }
    }

    /// Handles one inbound event at the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the event shape is unrecognized, a lifecycle
    /// request failed (after reporting it as FAILED), or a build event
    /// cannot be correlated or reported.
    pub async fn handle(&self, event: Value) -> Result<DispatchReport> {
        self.handle_at(event, Utc::now()).await
    }

    /// Handles one inbound event as of `now`.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::handle`].
    pub async fn handle_at(&self, event: Value, now: DateTime<Utc>) -> Result<DispatchReport> {
        if event.get("RequestType").is_some() {
            let request: ProvisionRequest =
                serde_json::from_value(event).map_err(|e| DispatchError::MalformedEvent {
                    shape: "lifecycle request",
                    message: e.to_string(),
                })?;
            let span = info_span!(
                "request",
                request_type = %request.request_type,
                resource_type = %request.resource_type,
                logical_id = %request.logical_id()
            );
            self.handle_request(&request, now).instrument(span).await?;
            return Ok(DispatchReport::Provisioned);
        }

        if event.get("Records").is_some_and(Value::is_array) {
            let batch: SqsEvent =
                serde_json::from_value(event).map_err(|e| DispatchError::MalformedEvent {
                    shape: "record batch",
                    message: e.to_string(),
                })?;
            let response = self.handle_records(batch.records, now).await;
            return Ok(DispatchReport::Batch(response));
        }

        if event.get("source").and_then(Value::as_str) == Some(BUILD_EVENT_SOURCE) {
            let change: CodeBuildEvent =
                serde_json::from_value(event).map_err(|e| DispatchError::MalformedEvent {
                    shape: "build state change",
                    message: e.to_string(),
                })?;
            self.handle_build(&BuildCompletion::from(change.detail)).await?;
            return Ok(DispatchReport::Build);
        }

        Err(DispatchError::UnrecognizedEvent {
            payload: event.to_string(),
        }
        .into())
    }

    async fn handle_request(&self, request: &ProvisionRequest, now: DateTime<Utc>) -> Result<()> {
        log_manual_cancel(request);

        let result = self.provision(request, now).await;
        if let Err(e) = &result {
            error!("Provisioning {} failed: {e}", request.logical_id());
            let outcome = Outcome::failed(request.physical_id_or_sentinel(), e.to_string());
            if let Err(report_error) = self.reporter.report(&outcome, &request.correlation).await {
                error!("Failed to report failure of {}: {report_error}", request.logical_id());
            }
        }
        result
    }

    async fn provision(&self, request: &ProvisionRequest, now: DateTime<Utc>) -> Result<()> {
        let Some(provisioner) = self.registry.lookup(&request.resource_type) else {
            if request.request_type == RequestType::Delete {
                warn!("Skipping deletion of unsupported type {}", request.resource_type);
                let outcome = Outcome::success(request.physical_id_or_sentinel()).with_reason(format!(
                    "Skipping deletion: custom resource type {} is not supported in this agent version.",
                    request.resource_type
                ));
                if let Err(e) = self.reporter.report(&outcome, &request.correlation).await {
                    error!("Failed to report skipped deletion of {}: {e}", request.logical_id());
                }
                return Ok(());
            }
            return Err(ProvisionError::UnsupportedResourceType {
                resource_type: request.resource_type.clone(),
            }
            .into());
        };

        match provisioner.provision(request).await? {
            Provisioned::Complete(outcome) => {
                info!(
                    "{} {} finished with {}",
                    request.request_type, request.logical_id(), outcome.status
                );
                self.reporter.report(&outcome, &request.correlation).await?;
            }
            Provisioned::Deferred(check) => {
                self.deferred.defer(request, check, now).await?;
            }
            Provisioned::AwaitingBuild => {
                info!("Waiting for build completion of {}", request.logical_id());
            }
        }
        Ok(())
    }

    async fn handle_records(&self, messages: Vec<SqsMessage>, now: DateTime<Utc>) -> SqsBatchResponse {
        info!("Handling {} provision check records", messages.len());

        let results = join_all(messages.iter().map(|message| {
            let span = info_span!(
                "record",
                message_id = message.message_id.as_deref().unwrap_or_default()
            );
            self.handle_record(message, now).instrument(span)
        }))
        .await;

        let batch_item_failures = messages
            .into_iter()
            .zip(results)
            .filter_map(|(message, result)| {
                let message_id = message.message_id.unwrap_or_default();
                match result {
                    Ok(RecordDisposition::Consumed) => None,
                    Ok(RecordDisposition::Redeliver) => Some(message_id),
                    Err(e) => {
                        error!("Record {message_id} failed: {e}");
                        Some(message_id)
                    }
                }
            })
            .map(|item_identifier| BatchItemFailure { item_identifier })
            .collect();

        SqsBatchResponse { batch_item_failures }
    }

    async fn handle_record(&self, message: &SqsMessage, now: DateTime<Utc>) -> Result<RecordDisposition> {
        let source = message.event_source.as_deref().unwrap_or_default();
        if source != QUEUE_EVENT_SOURCE {
            return Err(DispatchError::UnexpectedEventSource {
                source_name: source.to_string(),
            }
            .into());
        }

        let record = retry_record(message)?;
        let owner = record.record_type.owner();
        let provisioner = self.registry.get(owner).ok_or_else(|| {
            AgentError::from(ProvisionError::UnsupportedResourceType {
                resource_type: owner.to_string(),
            })
        })?;

        self.deferred.resume(provisioner, &record, now).await
    }

    async fn handle_build(&self, detail: &BuildCompletion) -> Result<()> {
        let correlation = detail.correlation().map_err(|missing| DispatchError::MissingCorrelation {
            missing: missing.join(", "),
        })?;
        let physical_id = detail
            .source_version()
            .unwrap_or_else(|| SENTINEL_PHYSICAL_ID.to_string());

        let outcome = match detail.build_status.as_str() {
            "SUCCEEDED" => Outcome::success(physical_id),
            "FAULT" | "TIMED_OUT" | "FAILED" | "STOPPED" => Outcome::failed(
                physical_id,
                format!("Failed to publish site, see {}", detail.console_link(&self.region)),
            ),
            other => {
                error!("Failed to handle build event: unrecognized status {other}");
                Outcome::failed(physical_id, format!("Unrecognized build status: {other}"))
            }
        };

        info!(
            "Build {} of {} finished with {}",
            detail.short_build_id(),
            detail.project_name,
            detail.build_status
        );
        self.reporter.report(&outcome, &correlation).await?;
        Ok(())
    }
}

/// Logs a command operators can run to fail a stuck request by hand.
fn log_manual_cancel(request: &ProvisionRequest) {
    let body = json!({
        "Status": "FAILED",
        "Reason": "Manually cancelled",
        "PhysicalResourceId": request.physical_id_or_sentinel(),
        "StackId": request.correlation.stack_id,
        "RequestId": request.correlation.request_id,
        "LogicalResourceId": request.correlation.logical_resource_id,
    });
    info!(
        "To forcibly fail this provision, execute: curl -X PUT '{}' -H 'Content-Type:' -d '{body}'",
        request.correlation.response_url
    );
}
