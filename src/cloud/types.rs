//! Request and response types of the capability interface.

use std::collections::BTreeMap;

/// Resource tags, keyed by tag name.
pub type Tags = BTreeMap<String, String>;

/// Prefix of tags managed by the platform itself.
pub const RESERVED_TAG_PREFIX: &str = "aws:";

/// Removes platform-managed tags.
#[must_use]
pub fn strip_reserved(mut tags: Tags) -> Tags {
    tags.retain(|key, _| !key.starts_with(RESERVED_TAG_PREFIX));
    tags
}

/// Resource whose tags the tag cache can fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagTarget {
    /// A function, by ARN.
    Function {
        /// Region of the function.
        region: String,
        /// Function ARN.
        arn: String,
    },
    /// A build project, by name.
    BuildProject {
        /// Region of the project.
        region: String,
        /// Project name.
        name: String,
    },
    /// An event rule, by ARN.
    EventRule {
        /// Region of the rule.
        region: String,
        /// Rule ARN.
        arn: String,
    },
}

impl TagTarget {
    /// Returns the error code the target's service uses for throttling.
    #[must_use]
    pub const fn throttling_code(&self) -> &'static str {
        match self {
            Self::Function { .. } => "TooManyRequestsException",
            Self::BuildProject { .. } | Self::EventRule { .. } => "ThrottlingException",
        }
    }
}

impl std::fmt::Display for TagTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function { arn, .. } => write!(f, "function {arn}"),
            Self::BuildProject { region, name } => write!(f, "build project {name} ({region})"),
            Self::EventRule { arn, .. } => write!(f, "event rule {arn}"),
        }
    }
}

/// Certificate domain validation option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainValidation {
    /// Domain being validated.
    pub domain_name: String,
    /// Domain receiving the validation mail.
    pub validation_domain: String,
}

/// Request for a new certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Certificate domain.
    pub domain_name: String,
    /// Validation options.
    pub validation: Vec<DomainValidation>,
}

/// Location of a function code bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLocation {
    /// Bucket holding the bundle.
    pub bucket: String,
    /// Key of the bundle.
    pub key: String,
}

impl CodeLocation {
    /// Parses an `s3://bucket/key` URI.
    #[must_use]
    pub fn parse_uri(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("s3://")?;
        let (bucket, key) = rest.split_once('/')?;
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

/// Full definition of a new function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    /// Function name.
    pub name: String,
    /// Runtime identifier.
    pub runtime: String,
    /// Execution role ARN.
    pub role: String,
    /// Handler entrypoint.
    pub handler: String,
    /// Code bundle.
    pub code: CodeLocation,
    /// Description.
    pub description: String,
    /// Timeout in seconds.
    pub timeout: i32,
    /// Memory in MB.
    pub memory_size: i32,
    /// Publish a version on creation.
    pub publish: bool,
    /// Tracing mode.
    pub tracing_mode: Option<String>,
    /// Environment variables.
    pub environment: BTreeMap<String, String>,
    /// Tags.
    pub tags: Tags,
}

/// Partial configuration update of an existing function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionConfig {
    /// Function name.
    pub name: String,
    /// Runtime identifier.
    pub runtime: Option<String>,
    /// Execution role ARN.
    pub role: Option<String>,
    /// Handler entrypoint.
    pub handler: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Timeout in seconds.
    pub timeout: Option<i32>,
    /// Memory in MB.
    pub memory_size: Option<i32>,
    /// Tracing mode.
    pub tracing_mode: Option<String>,
    /// Environment variables.
    pub environment: Option<BTreeMap<String, String>>,
}

/// Function identity returned by create and code update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionVersion {
    /// Function name.
    pub name: String,
    /// Function ARN, qualified with the version after a code update.
    pub arn: String,
    /// Published version.
    pub version: String,
}

/// Build project definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSpec {
    /// Project name.
    pub name: String,
    /// Service role ARN.
    pub service_role: String,
    /// Build image.
    pub image: String,
    /// Environment type.
    pub environment_type: String,
    /// Compute type.
    pub compute_type: String,
    /// Inline buildspec.
    pub buildspec: String,
    /// Tags.
    pub tags: Tags,
}

/// Event rule definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    /// Rule name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Event bus the rule is attached to.
    pub event_bus: String,
    /// JSON event pattern.
    pub event_pattern: String,
    /// Tags.
    pub tags: Tags,
}

/// Event rule target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTarget {
    /// Target id.
    pub id: String,
    /// Target ARN.
    pub arn: String,
}

/// Database endpoint description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseEndpoint {
    /// Writer address.
    pub address: Option<String>,
    /// Port.
    pub port: Option<i32>,
    /// Reader address (clusters only).
    pub read_address: Option<String>,
}

/// Graph database cluster description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphCluster {
    /// Cluster resource id.
    pub resource_id: Option<String>,
    /// Writer endpoint.
    pub endpoint: Option<String>,
    /// Port.
    pub port: Option<i32>,
    /// Reader endpoint.
    pub read_endpoint: Option<String>,
}
