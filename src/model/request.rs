//! Lifecycle request shape delivered by the template orchestrator.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProvisionError;

/// Physical id reported when a request fails before any id is known.
pub const SENTINEL_PHYSICAL_ID: &str = "resource";

/// Lifecycle step requested by the orchestrator.
///
/// Anything other than the three known steps is kept verbatim so the
/// provisioner can fail fast with a descriptive error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestType {
    /// Create a new resource.
    Create,
    /// Update an existing resource in place.
    Update,
    /// Delete an existing resource.
    Delete,
    /// Unrecognized request type.
    Unknown(String),
}

impl From<String> for RequestType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Create" => Self::Create,
            "Update" => Self::Update,
            "Delete" => Self::Delete,
            _ => Self::Unknown(value),
        }
    }
}

impl From<RequestType> for String {
    fn from(value: RequestType) -> Self {
        value.as_str().to_string()
    }
}

impl RequestType {
    /// Returns the wire name of the request type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reply-routing metadata, opaque to provisioners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Correlation {
    /// Pre-signed URL the outcome is delivered to.
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    /// Stack the resource belongs to.
    pub stack_id: String,
    /// Unique id of the lifecycle request.
    pub request_id: String,
    /// Logical id of the resource in the template.
    pub logical_resource_id: String,
}

/// One inbound lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProvisionRequest {
    /// Requested lifecycle step.
    pub request_type: RequestType,
    /// Resource type selecting the provisioner.
    pub resource_type: String,
    /// Desired properties.
    #[serde(default)]
    pub resource_properties: Map<String, Value>,
    /// Previous properties (Update only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<Map<String, Value>>,
    /// Identifier of the remote resource from a prior response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    /// Reply-routing metadata.
    #[serde(flatten)]
    pub correlation: Correlation,
}

impl ProvisionRequest {
    /// Deserializes the desired properties into a provisioner-specific shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the properties do not match the expected shape.
    pub fn properties<T: DeserializeOwned>(&self) -> Result<T, ProvisionError> {
        decode_properties(&self.resource_properties)
    }

    /// Deserializes the previous properties into a provisioner-specific shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the previous properties are missing or malformed.
    pub fn old_properties<T: DeserializeOwned>(&self) -> Result<T, ProvisionError> {
        let old = self.old_resource_properties.as_ref().ok_or_else(|| {
            ProvisionError::invalid(format!(
                "{} request for {} is missing OldResourceProperties",
                self.request_type, self.logical_id()
            ))
        })?;
        decode_properties(old)
    }

    /// Returns the physical id, failing if none was supplied.
    ///
    /// # Errors
    ///
    /// Returns an error if the request carries no physical id.
    pub fn physical_id(&self) -> Result<&str, ProvisionError> {
        self.physical_resource_id.as_deref().ok_or_else(|| {
            ProvisionError::invalid(format!(
                "{} request for {} is missing PhysicalResourceId",
                self.request_type, self.logical_id()
            ))
        })
    }

    /// Returns the best-known physical id, or the sentinel.
    #[must_use]
    pub fn physical_id_or_sentinel(&self) -> &str {
        self.physical_resource_id
            .as_deref()
            .unwrap_or(SENTINEL_PHYSICAL_ID)
    }

    /// Returns the logical resource id.
    #[must_use]
    pub fn logical_id(&self) -> &str {
        &self.correlation.logical_resource_id
    }
}

fn decode_properties<T: DeserializeOwned>(map: &Map<String, Value>) -> Result<T, ProvisionError> {
    serde_json::from_value(Value::Object(map.clone()))
        .map_err(|e| ProvisionError::invalid(format!("Invalid resource properties: {e}")))
}

/// Serde helpers for template values, which arrive as strings even when numeric.
pub mod lenient {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        String(String),
    }

    /// Deserializes an optional integer given either as a number or a string.
    ///
    /// # Errors
    ///
    /// Returns an error if a string value is not an integer.
    pub fn optional_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<NumberOrString>::deserialize(deserializer)?;
        match value {
            None => Ok(None),
            Some(NumberOrString::Number(n)) => i32::try_from(n)
                .map(Some)
                .map_err(serde::de::Error::custom),
            Some(NumberOrString::String(s)) if s.is_empty() => Ok(None),
            Some(NumberOrString::String(s)) => s
                .parse::<i32>()
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }

    /// Deserializes a boolean given either as a bool or a `"true"`/`"false"` string.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is neither.
    pub fn boolean<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum BoolOrString {
            Bool(bool),
            String(String),
        }

        match BoolOrString::deserialize(deserializer)? {
            BoolOrString::Bool(b) => Ok(b),
            BoolOrString::String(s) => match s.as_str() {
                "true" | "True" => Ok(true),
                "false" | "False" | "" => Ok(false),
                other => Err(serde::de::Error::custom(format!("invalid boolean '{other}'"))),
            },
        }
    }
}
