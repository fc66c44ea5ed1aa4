//! Provisioners for every supported resource type.
//!
//! Each provisioner holds a [`ProvisionContext`] with the agent settings,
//! the capability interface, the shared tag cache and the domain API.

mod build_project;
mod build_trigger;
mod certificate;
mod commander_bootstrap;
mod edge_function;
mod existing;
mod factory_bootstrap;
mod pipeline_runner;
mod stacks_domain;

pub use build_trigger::{BuildTrigger, BuildTriggerKind};
pub use certificate::CertificateProvisioner;
pub use commander_bootstrap::CommanderBootstrap;
pub use edge_function::EdgeFunctionProvisioner;
pub use existing::ExistingResourceProvisioner;
pub use factory_bootstrap::FactoryBootstrap;
pub use pipeline_runner::PipelineRunnerBootstrap;
pub use stacks_domain::StacksDomainProvisioner;

use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use crate::cloud::{Cloud, Tags};
use crate::config::AgentConfig;
use crate::domain::DomainApi;
use crate::provisioner::Registry;
use crate::tags::TagCache;

/// Shared dependencies of all provisioners.
#[derive(Clone)]
pub struct ProvisionContext {
    /// Agent settings.
    pub config: Arc<AgentConfig>,
    /// Remote capabilities.
    pub cloud: Cloud,
    /// Process-wide tag cache.
    pub tags: TagCache,
    /// Subdomain API.
    pub domains: Arc<dyn DomainApi>,
}

impl std::fmt::Debug for ProvisionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionContext")
            .field("region", &self.config.region)
            .field("account_id", &self.config.account_id)
            .finish_non_exhaustive()
    }
}

impl ProvisionContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        config: Arc<AgentConfig>,
        cloud: Cloud,
        tags: TagCache,
        domains: Arc<dyn DomainApi>,
    ) -> Self {
        Self {
            config,
            cloud,
            tags,
            domains,
        }
    }

    /// Returns the region the agent runs in.
    #[must_use]
    pub fn home_region(&self) -> &str {
        &self.config.region
    }

    /// Returns the agent's account id.
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.config.account_id
    }
}

/// Builds the registry of every supported resource type.
#[must_use]
pub fn registry(ctx: &ProvisionContext) -> Registry {
    Registry::new()
        .with(Arc::new(CommanderBootstrap::new(ctx.clone())))
        .with(Arc::new(FactoryBootstrap::new(ctx.clone())))
        .with(Arc::new(PipelineRunnerBootstrap::new(ctx.clone())))
        .with(Arc::new(CertificateProvisioner::new(ctx.clone())))
        .with(Arc::new(StacksDomainProvisioner::new(ctx.clone())))
        .with(Arc::new(EdgeFunctionProvisioner::new(ctx.clone())))
        .with(Arc::new(ExistingResourceProvisioner::new(ctx.clone())))
        .with(Arc::new(BuildTrigger::new(BuildTriggerKind::Website, ctx.clone())))
        .with(Arc::new(BuildTrigger::new(BuildTriggerKind::DockerImage, ctx.clone())))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagEntry {
    key: String,
    value: String,
}

/// Deserializes template tags given as `[{Key, Value}]`.
fn tag_list<'de, D>(deserializer: D) -> Result<Tags, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<TagEntry>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries.into_iter().map(|t| (t.key, t.value)).collect())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::cloud::testing::MockCloud;
    use crate::domain::MockDomainApi;
    use crate::model::ProvisionRequest;
    use serde_json::{json, Value};

    pub const HOME: &str = "us-west-2";
    pub const ACCOUNT: &str = "123456789012";

    pub fn config() -> AgentConfig {
        AgentConfig {
            region: HOME.to_string(),
            account_id: ACCOUNT.to_string(),
            function_name: String::from("agent-commander"),
            runtime: String::from("provided.al2023"),
            check_queue_url: Some(String::from("https://sqs.us-west-2.amazonaws.com/123456789012/checks")),
            external_id: Some(String::from("external")),
            provision_api_host: None,
        }
    }

    pub fn context(cloud: MockCloud) -> ProvisionContext {
        context_with_domains(cloud, MockDomainApi::new())
    }

    pub fn context_with_domains(cloud: MockCloud, domains: MockDomainApi) -> ProvisionContext {
        let cloud = cloud.build();
        let tags = TagCache::new(cloud.tags.clone());
        ProvisionContext::new(Arc::new(config()), cloud, tags, Arc::new(domains))
    }

    pub fn request(request_type: &str, resource_type: &str, properties: Value) -> ProvisionRequest {
        serde_json::from_value(json!({
            "RequestType": request_type,
            "ResourceType": resource_type,
            "ResourceProperties": properties,
            "StackId": format!("arn:aws:cloudformation:{HOME}:{ACCOUNT}:stack/app/0f3c"),
            "RequestId": "req-1",
            "LogicalResourceId": "Resource",
            "ResponseURL": "https://example.com/reply"
        }))
        .unwrap()
    }

    pub fn update(resource_type: &str, physical_id: &str, old: Value, new: Value) -> ProvisionRequest {
        let mut request = request("Update", resource_type, new);
        request.old_resource_properties = old.as_object().cloned();
        request.physical_resource_id = Some(physical_id.to_string());
        request
    }

    pub fn delete(resource_type: &str, physical_id: &str, properties: Value) -> ProvisionRequest {
        let mut request = request("Delete", resource_type, properties);
        request.physical_resource_id = Some(physical_id.to_string());
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::testing::MockCloud;
    use crate::model::ResourceType;

    #[test]
    fn test_registry_covers_every_type() {
        let registry = registry(&testing::context(MockCloud::new()));
        assert_eq!(registry.len(), ResourceType::ALL.len());
        for resource_type in ResourceType::ALL {
            let provisioner = registry.get(resource_type).unwrap();
            assert_eq!(provisioner.resource_type(), resource_type);
        }
    }

    #[test]
    fn test_tag_list() {
        #[derive(Deserialize)]
        struct Props {
            #[serde(default, deserialize_with = "tag_list")]
            tags: Tags,
        }

        let props: Props = serde_json::from_value(serde_json::json!({
            "tags": [{ "Key": "team", "Value": "web" }]
        }))
        .unwrap();
        assert_eq!(props.tags.get("team").map(String::as_str), Some("web"));

        let props: Props = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(props.tags.is_empty());
    }
}
