//! Error types for the provisioning agent.
//!
//! The hierarchy separates the failure sources of a provisioning step:
//! configuration, remote capability calls, provisioner logic, event
//! dispatch, and the two outbound transports (outcome reports and the
//! retry queue).

use thiserror::Error;

/// The main error type for the provisioning agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Provisioner errors.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Event dispatch errors.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Outcome reporting errors.
    #[error("Outcome report error: {0}")]
    Report(#[from] ReportError),

    /// Retry queue errors.
    #[error("Retry queue error: {0}")]
    Queue(#[from] QueueError),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Environment variable is present but unusable.
    #[error("Invalid value for {name}: {message}")]
    InvalidValue {
        /// Name of the variable.
        name: String,
        /// Description of the problem.
        message: String,
    },

    /// The `.env` file could not be loaded.
    #[error("Failed to load environment file: {message}")]
    DotEnv {
        /// Description of the failure.
        message: String,
    },
}

/// Error returned by a remote capability call.
///
/// Remote services classify their failures with a structured code
/// (`ResourceNotFoundException`, `ThrottlingException`, ...) plus a
/// human-readable message. Provisioners match on both.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} ({code})")]
pub struct RemoteError {
    /// Structured error code.
    pub code: String,
    /// Error message.
    pub message: String,
}

/// Error codes meaning "the resource does not exist".
const NOT_FOUND_CODES: &[&str] = &["ResourceNotFoundException", "NotFoundException", "NotFound"];

/// Error codes meaning "slow down".
const THROTTLING_CODES: &[&str] = &[
    "TooManyRequestsException",
    "ThrottlingException",
    "Throttling",
    "RequestLimitExceeded",
];

/// Error codes meaning "the resource is still referenced".
const IN_USE_CODES: &[&str] = &["ResourceInUseException"];

impl RemoteError {
    /// Creates a remote error from a code and message.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error carries the given code.
    #[must_use]
    pub fn has_code(&self, code: &str) -> bool {
        self.code == code
    }

    /// Returns true if the message contains the given fragment.
    #[must_use]
    pub fn message_contains(&self, fragment: &str) -> bool {
        self.message.contains(fragment)
    }

    /// Returns true if the remote resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        NOT_FOUND_CODES.contains(&self.code.as_str())
    }

    /// Returns true if the call was rejected by a rate limit.
    #[must_use]
    pub fn is_throttling(&self) -> bool {
        THROTTLING_CODES.contains(&self.code.as_str())
    }

    /// Returns true if the resource is still referenced by a dependent.
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        IN_USE_CODES.contains(&self.code.as_str())
    }

    /// Formats the error the way outcome reasons present it: `(code) message`.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("({}) {}", self.code, self.message)
    }
}

/// Provisioner errors.
///
/// Every variant is terminal: the dispatcher reports it as a FAILED outcome.
/// Conditions that should be retried are expressed through
/// [`CheckOutcome::Pending`](crate::provisioner::CheckOutcome::Pending)
/// instead.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The request type is not Create, Update or Delete.
    #[error("Invalid CloudFormation custom resource RequestType '{request_type}'")]
    InvalidRequestType {
        /// The unrecognized request type.
        request_type: String,
    },

    /// No provisioner is registered for the resource type.
    #[error(
        "Custom resource type {resource_type} is not supported in this agent version. \
         Please update the agent in this account to the latest version and try again."
    )]
    UnsupportedResourceType {
        /// The unrecognized resource type.
        resource_type: String,
    },

    /// Resource properties are missing or malformed.
    #[error("{message}")]
    InvalidProperties {
        /// Description of the problem.
        message: String,
    },

    /// A remote call failed.
    #[error("{context}: {source}")]
    Remote {
        /// What the provisioner was doing.
        context: String,
        /// The remote failure.
        source: RemoteError,
    },

    /// A terminal failure with a ready-made reason.
    #[error("{0}")]
    Failed(String),
}

/// Event dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The inbound event matches none of the known shapes.
    #[error("Unrecognized message: {payload}")]
    UnrecognizedEvent {
        /// The event, serialized.
        payload: String,
    },

    /// The inbound event has a known shape but invalid content.
    #[error("Malformed {shape}: {message}")]
    MalformedEvent {
        /// Which shape was being parsed.
        shape: &'static str,
        /// Description of the problem.
        message: String,
    },

    /// A queue record came from an unexpected source.
    #[error("Unexpected record event source {source_name}")]
    UnexpectedEventSource {
        /// The event source of the record.
        source_name: String,
    },

    /// A queue record body is not a retry record.
    #[error("Failed to parse provision record body {body}")]
    MalformedRecord {
        /// The raw body.
        body: String,
    },

    /// A build-completion event is missing its correlation values.
    #[error("Missing CloudFormation params: {missing}")]
    MissingCorrelation {
        /// Names of the missing variables.
        missing: String,
    },
}

/// Outcome reporting errors.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The report could not be delivered.
    #[error("Error while sending response to CloudFormation: {message}")]
    Delivery {
        /// Description of the failure.
        message: String,
    },

    /// The receiver rejected the report.
    #[error("CloudFormation rejected response with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The report could not be serialized.
    #[error("Failed to serialize response: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Retry queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The record could not be sent.
    #[error("Failed to enqueue provision check record: {message}")]
    Send {
        /// Description of the failure.
        message: String,
    },

    /// The record could not be serialized.
    #[error("Failed to serialize provision check record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl ConfigError {
    /// Creates a missing variable error.
    #[must_use]
    pub fn missing(name: impl Into<String>) -> Self {
        Self::MissingEnvVar { name: name.into() }
    }
}

impl ProvisionError {
    /// Creates an invalid properties error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidProperties {
            message: message.into(),
        }
    }

    /// Wraps a remote error with context.
    #[must_use]
    pub fn remote(context: impl Into<String>, source: RemoteError) -> Self {
        Self::Remote {
            context: context.into(),
            source,
        }
    }

    /// Creates a terminal failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_classification() {
        assert!(RemoteError::new("ResourceNotFoundException", "gone").is_not_found());
        assert!(RemoteError::new("ThrottlingException", "slow").is_throttling());
        assert!(RemoteError::new("TooManyRequestsException", "slow").is_throttling());
        assert!(RemoteError::new("ResourceInUseException", "busy").is_in_use());
        assert!(!RemoteError::new("ValidationException", "bad").is_not_found());
    }

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::new("AccessDenied", "no permission");
        assert_eq!(err.to_string(), "no permission (AccessDenied)");
        assert_eq!(err.describe(), "(AccessDenied) no permission");
    }

    #[test]
    fn test_provision_error_messages() {
        let err = ProvisionError::remote(
            "Failed to create CDN Function",
            RemoteError::new("InvalidParameterValueException", "bad role"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to create CDN Function: bad role (InvalidParameterValueException)"
        );

        let err = ProvisionError::InvalidRequestType {
            request_type: String::from("Replace"),
        };
        assert!(err.to_string().contains("'Replace'"));
    }
}
