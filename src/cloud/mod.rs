//! Capability interface over the remote cloud services.
//!
//! Each service family is one async trait so provisioners depend only on the
//! calls they make, and tests mock exactly those. Every call fails with a
//! [`RemoteError`] carrying the service's structured error code.

#[cfg(feature = "lambda")]
pub mod aws;
mod types;

pub use types::{
    strip_reserved, CertificateRequest, CodeLocation, DatabaseEndpoint, DomainValidation,
    FunctionConfig, FunctionSpec, FunctionVersion, GraphCluster, ProjectSpec, RuleSpec,
    RuleTarget, TagTarget, Tags, RESERVED_TAG_PREFIX,
};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RemoteError;

/// Region hosting certificates and functions used by the global CDN.
pub const EDGE_REGION: &str = "us-east-1";

/// Result of a remote capability call.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Certificates, managed in [`EDGE_REGION`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CertificateApi: Send + Sync {
    /// Requests a new certificate and returns its ARN.
    async fn request_certificate(&self, request: &CertificateRequest) -> RemoteResult<String>;

    /// Adds tags to a certificate.
    async fn add_tags(&self, arn: &str, tags: &Tags) -> RemoteResult<()>;

    /// Removes tags from a certificate.
    async fn remove_tags(&self, arn: &str, tags: &Tags) -> RemoteResult<()>;

    /// Deletes a certificate.
    async fn delete_certificate(&self, arn: &str) -> RemoteResult<()>;

    /// Returns the issuance status of a certificate.
    async fn certificate_status(&self, arn: &str) -> RemoteResult<String>;
}

/// Functions, per region.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FunctionApi: Send + Sync {
    /// Creates a function.
    async fn create_function(&self, region: &str, spec: &FunctionSpec)
        -> RemoteResult<FunctionVersion>;

    /// Updates a function's configuration.
    async fn update_configuration(&self, region: &str, config: &FunctionConfig)
        -> RemoteResult<()>;

    /// Updates a function's code, optionally publishing a version.
    async fn update_code(
        &self,
        region: &str,
        name: &str,
        code: &CodeLocation,
        publish: bool,
    ) -> RemoteResult<FunctionVersion>;

    /// Deletes a function.
    async fn delete_function(&self, region: &str, name: &str) -> RemoteResult<()>;

    /// Adds or overwrites tags on a function.
    async fn tag_function(&self, region: &str, arn: &str, tags: &Tags) -> RemoteResult<()>;

    /// Removes tags from a function.
    async fn untag_function(&self, region: &str, arn: &str, keys: &[String]) -> RemoteResult<()>;
}

/// Build projects, per region.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuildApi: Send + Sync {
    /// Creates a build project.
    async fn create_project(&self, region: &str, spec: &ProjectSpec) -> RemoteResult<()>;

    /// Updates a build project.
    async fn update_project(&self, region: &str, spec: &ProjectSpec) -> RemoteResult<()>;

    /// Deletes a build project.
    async fn delete_project(&self, region: &str, name: &str) -> RemoteResult<()>;

    /// Starts a build in the home region with environment overrides.
    async fn start_build(&self, project: &str, environment: &[(String, String)])
        -> RemoteResult<()>;
}

/// Regional platform prerequisites: container clusters, default networks
/// and service-linked roles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Returns the status of a container cluster, if it exists.
    async fn cluster_status(&self, region: &str, name: &str) -> RemoteResult<Option<String>>;

    /// Creates a container cluster.
    async fn create_cluster(&self, region: &str, name: &str) -> RemoteResult<()>;

    /// Creates the default virtual network.
    async fn create_default_vpc(&self, region: &str) -> RemoteResult<()>;

    /// Creates the service-linked role for a service principal.
    async fn create_service_linked_role(&self, service: &str) -> RemoteResult<()>;
}

/// Event rules and notification topics, per region.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventApi: Send + Sync {
    /// Creates or replaces an event rule.
    async fn put_rule(&self, region: &str, rule: &RuleSpec) -> RemoteResult<()>;

    /// Adds targets to an event rule.
    async fn put_targets(&self, region: &str, rule: &str, targets: &[RuleTarget])
        -> RemoteResult<()>;

    /// Removes targets from an event rule.
    async fn remove_targets(&self, region: &str, rule: &str, ids: &[String]) -> RemoteResult<()>;

    /// Deletes an event rule.
    async fn delete_rule(&self, region: &str, name: &str) -> RemoteResult<()>;

    /// Deletes a notification topic.
    async fn delete_topic(&self, region: &str, arn: &str) -> RemoteResult<()>;
}

/// Read-only lookups used when adopting existing resources.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LookupApi: Send + Sync {
    /// Resolves a queue URL.
    async fn queue_url(&self, region: &str, name: &str, owner: &str) -> RemoteResult<String>;

    /// Returns the latest stream ARN of a table, if streaming is enabled.
    async fn table_stream(&self, region: &str, table: &str) -> RemoteResult<Option<String>>;

    /// Describes a database instance.
    async fn database_instance(&self, region: &str, id: &str) -> RemoteResult<DatabaseEndpoint>;

    /// Describes a database cluster.
    async fn database_cluster(&self, region: &str, id: &str) -> RemoteResult<DatabaseEndpoint>;

    /// Describes a graph database cluster.
    async fn graph_cluster(&self, region: &str, id: &str) -> RemoteResult<GraphCluster>;

    /// Returns the id of a virtual network's default security group.
    async fn default_security_group(&self, region: &str, vpc_id: &str)
        -> RemoteResult<Option<String>>;
}

/// Tag listing, used by the tag cache.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TagApi: Send + Sync {
    /// Lists the tags of a resource, including reserved ones.
    async fn list_tags(&self, target: &TagTarget) -> RemoteResult<Tags>;
}

/// The full set of capabilities, shared by all provisioners.
#[derive(Clone)]
pub struct Cloud {
    /// Certificates.
    pub certificates: Arc<dyn CertificateApi>,
    /// Functions.
    pub functions: Arc<dyn FunctionApi>,
    /// Build projects.
    pub builds: Arc<dyn BuildApi>,
    /// Platform prerequisites.
    pub platform: Arc<dyn PlatformApi>,
    /// Event rules and topics.
    pub events: Arc<dyn EventApi>,
    /// Read-only lookups.
    pub lookup: Arc<dyn LookupApi>,
    /// Tag listing.
    pub tags: Arc<dyn TagApi>,
}

impl std::fmt::Debug for Cloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cloud").finish_non_exhaustive()
    }
}

/// Mock capabilities for tests. Any call without a matching expectation
/// panics, so an untouched mock asserts that no remote call was made.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Default)]
    pub struct MockCloud {
        pub certificates: MockCertificateApi,
        pub functions: MockFunctionApi,
        pub builds: MockBuildApi,
        pub platform: MockPlatformApi,
        pub events: MockEventApi,
        pub lookup: MockLookupApi,
        pub tags: MockTagApi,
    }

    impl MockCloud {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn build(self) -> Cloud {
            Cloud {
                certificates: Arc::new(self.certificates),
                functions: Arc::new(self.functions),
                builds: Arc::new(self.builds),
                platform: Arc::new(self.platform),
                events: Arc::new(self.events),
                lookup: Arc::new(self.lookup),
                tags: Arc::new(self.tags),
            }
        }
    }
}
