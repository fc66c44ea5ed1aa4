//! Retry records: durable continuations for operations that cannot complete
//! within one invocation.
//!
//! A record is enqueued with the correlation fields of the originating
//! request and the time it was first enqueued. Each redelivery hands the same
//! record back to the owning provisioner's check, which compares
//! `enqueued_at` against the wait window before touching the remote system.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::request::{Correlation, ProvisionRequest, SENTINEL_PHYSICAL_ID};
use super::resource_type::ResourceType;
use crate::error::ProvisionError;

/// Discriminator selecting which check a record resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// Waiting for a new certificate to be issued.
    #[serde(rename = "US_EAST_1_CERTIFICATE_CREATE")]
    CertificateCreate,
    /// Waiting for a certificate to be released by its dependents.
    #[serde(rename = "US_EAST_1_CERTIFICATE_DELETE")]
    CertificateDelete,
    /// Waiting for an edge function's replicas to be removed.
    #[serde(rename = "LAMBDA_EDGE_FUNCTION_DELETE")]
    EdgeFunctionDelete,
}

impl RecordType {
    /// Returns the resource type whose provisioner owns this record.
    #[must_use]
    pub const fn owner(self) -> ResourceType {
        match self {
            Self::CertificateCreate | Self::CertificateDelete => ResourceType::UsEast1Certificate,
            Self::EdgeFunctionDelete => ResourceType::EdgeFunction,
        }
    }

    /// Returns true for records waiting on a creation.
    #[must_use]
    pub const fn is_creation(self) -> bool {
        matches!(self, Self::CertificateCreate)
    }
}

/// Continuation produced by a provisioner that cannot finish synchronously.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCheck {
    /// Which check resumes the operation.
    pub record_type: RecordType,
    /// Provisioner-defined resume data.
    pub payload: Value,
}

impl PendingCheck {
    /// Creates a pending check from a serializable payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn new<T: Serialize>(record_type: RecordType, payload: &T) -> Result<Self, ProvisionError> {
        let payload = serde_json::to_value(payload).map_err(|e| {
            ProvisionError::failed(format!("Failed to encode {record_type:?} payload: {e}"))
        })?;
        Ok(Self {
            record_type,
            payload,
        })
    }
}

/// A queued continuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    /// Which check to invoke.
    #[serde(rename = "type")]
    pub record_type: RecordType,
    /// Provisioner-defined resume data.
    #[serde(default)]
    pub payload: Value,
    /// Correlation fields copied from the originating request.
    #[serde(flatten)]
    pub correlation: Correlation,
    /// Physical id of the originating request, if it had one.
    #[serde(
        rename = "PhysicalResourceId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub physical_resource_id: Option<String>,
    /// When the record was first enqueued.
    #[serde(rename = "EnqueuedAt")]
    pub enqueued_at: DateTime<Utc>,
}

impl RetryRecord {
    /// Builds the first record for a request.
    #[must_use]
    pub fn from_request(check: PendingCheck, request: &ProvisionRequest, now: DateTime<Utc>) -> Self {
        Self {
            record_type: check.record_type,
            payload: check.payload,
            correlation: request.correlation.clone(),
            physical_resource_id: request.physical_resource_id.clone(),
            enqueued_at: now,
        }
    }

    /// Builds a follow-up record that keeps this record's correlation and
    /// original enqueue time.
    #[must_use]
    pub fn follow_up(&self, check: PendingCheck) -> Self {
        Self {
            record_type: check.record_type,
            payload: check.payload,
            correlation: self.correlation.clone(),
            physical_resource_id: self.physical_resource_id.clone(),
            enqueued_at: self.enqueued_at,
        }
    }

    /// Deserializes the payload into a provisioner-specific shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match the expected shape.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProvisionError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            ProvisionError::invalid(format!(
                "Invalid {:?} record payload: {e}",
                self.record_type
            ))
        })
    }

    /// Returns the time elapsed since the record was first enqueued.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.enqueued_at
    }

    /// Returns the best-known physical id, or the sentinel.
    #[must_use]
    pub fn physical_id_or_sentinel(&self) -> &str {
        self.physical_resource_id
            .as_deref()
            .unwrap_or(SENTINEL_PHYSICAL_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn request() -> ProvisionRequest {
        serde_json::from_value(json!({
            "RequestType": "Delete",
            "ResourceType": "Custom::EdgeFunction",
            "PhysicalResourceId": "edge",
            "StackId": "stack",
            "RequestId": "req",
            "LogicalResourceId": "Edge",
            "ResponseURL": "https://example.com/reply"
        }))
        .unwrap()
    }

    #[test]
    fn test_record_wire_format() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let check = PendingCheck::new(RecordType::EdgeFunctionDelete, &json!({ "cycle": 1 })).unwrap();
        let record = RetryRecord::from_request(check, &request(), now);

        let body = serde_json::to_value(&record).unwrap();
        assert_eq!(body["type"], "LAMBDA_EDGE_FUNCTION_DELETE");
        assert_eq!(body["ResponseURL"], "https://example.com/reply");
        assert_eq!(body["PhysicalResourceId"], "edge");
        assert_eq!(body["payload"]["cycle"], 1);

        let parsed: RetryRecord = serde_json::from_value(body).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_follow_up_keeps_enqueue_time() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let check = PendingCheck::new(RecordType::EdgeFunctionDelete, &json!({ "cycle": 1 })).unwrap();
        let record = RetryRecord::from_request(check, &request(), now);

        let next = PendingCheck::new(RecordType::EdgeFunctionDelete, &json!({ "cycle": 2 })).unwrap();
        let follow_up = record.follow_up(next);
        assert_eq!(follow_up.enqueued_at, now);
        assert_eq!(follow_up.correlation, record.correlation);
        assert_eq!(follow_up.payload["cycle"], 2);
    }

    #[test]
    fn test_owner() {
        assert_eq!(RecordType::CertificateDelete.owner(), ResourceType::UsEast1Certificate);
        assert_eq!(RecordType::EdgeFunctionDelete.owner(), ResourceType::EdgeFunction);
        assert!(RecordType::CertificateCreate.is_creation());
    }
}
