//! Terminal outcome reported back to the orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Terminal status of a lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    /// The step succeeded.
    Success,
    /// The step failed.
    Failed,
}

impl OutcomeStatus {
    /// Returns the wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal report for one lifecycle step.
///
/// A FAILED outcome always carries a reason; construct it through
/// [`Outcome::failed`].
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Identifier of the remote resource.
    pub physical_resource_id: String,
    /// Resolved attributes exposed to the template.
    pub attributes: Option<Map<String, Value>>,
    /// Terminal status.
    pub status: OutcomeStatus,
    /// Human-readable reason.
    pub reason: Option<String>,
}

impl Outcome {
    /// Creates a SUCCESS outcome without attributes.
    #[must_use]
    pub fn success(physical_resource_id: impl Into<String>) -> Self {
        Self {
            physical_resource_id: physical_resource_id.into(),
            attributes: None,
            status: OutcomeStatus::Success,
            reason: None,
        }
    }

    /// Creates a FAILED outcome.
    #[must_use]
    pub fn failed(physical_resource_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            physical_resource_id: physical_resource_id.into(),
            attributes: None,
            status: OutcomeStatus::Failed,
            reason: Some(reason.into()),
        }
    }

    /// Attaches resolved attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Attaches an informational reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Returns true if the outcome is a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}
