//! Outcome delivery over the orchestrator's pre-signed response URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::OutcomeReporter;
use crate::error::ReportError;
use crate::model::{Correlation, Outcome, OutcomeStatus};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Response document accepted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseBody<'a> {
    /// Terminal status.
    pub status: OutcomeStatus,
    /// Human-readable reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'a str>,
    /// Identifier of the remote resource.
    pub physical_resource_id: &'a str,
    /// Stack id.
    pub stack_id: &'a str,
    /// Request id.
    pub request_id: &'a str,
    /// Logical resource id.
    pub logical_resource_id: &'a str,
    /// Resolved attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a Map<String, Value>>,
}

impl<'a> ResponseBody<'a> {
    /// Builds the response document for an outcome.
    #[must_use]
    pub fn new(outcome: &'a Outcome, correlation: &'a Correlation) -> Self {
        Self {
            status: outcome.status,
            reason: outcome.reason.as_deref(),
            physical_resource_id: &outcome.physical_resource_id,
            stack_id: &correlation.stack_id,
            request_id: &correlation.request_id,
            logical_resource_id: &correlation.logical_resource_id,
            data: outcome.attributes.as_ref(),
        }
    }
}

/// Reporter that PUTs the response document to the response URL.
#[derive(Debug, Clone)]
pub struct HttpOutcomeReporter {
    client: Client,
}

impl HttpOutcomeReporter {
    /// Creates a reporter.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self, ReportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ReportError::Delivery {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self { client })
    }

    /// Creates a reporter with an existing client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OutcomeReporter for HttpOutcomeReporter {
    async fn report(
        &self,
        outcome: &Outcome,
        correlation: &Correlation,
    ) -> Result<(), ReportError> {
        let body = serde_json::to_string(&ResponseBody::new(outcome, correlation))?;
        debug!("Sending response to {}: {body}", correlation.response_url);

        let response = self
            .client
            .put(&correlation.response_url)
            .header(header::CONTENT_TYPE, "")
            .body(body)
            .send()
            .await
            .map_err(|e| ReportError::Delivery {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            "Reported {} for {} ({})",
            outcome.status, correlation.logical_resource_id, outcome.physical_resource_id
        );
        Ok(())
    }
}
