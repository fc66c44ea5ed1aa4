//! `Custom::AgentCommanderBootstrap`: companion commander functions in every
//! declared region, plus the regional prerequisites dependent resources need
//! (a `default` container cluster, a default network and the container
//! service-linked role).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::ProvisionContext;
use crate::cloud::{CodeLocation, FunctionConfig, FunctionSpec, TagTarget, Tags};
use crate::config::vars;
use crate::error::{ProvisionError, RemoteError};
use crate::model::{Outcome, ProvisionRequest, ResourceType};
use crate::provisioner::fanout::{aggregate, diff_regions, fan_out, target_regions, teardown};
use crate::provisioner::{Provisioned, Provisioner, RegionResult};

/// Physical id reported for the bootstrap resource.
const PHYSICAL_ID: &str = "agent-commanders";

const CLUSTER_NAME: &str = "default";
const CLUSTER_ACTIVE: &str = "ACTIVE";
const CONTAINER_SERVICE: &str = "ecs.amazonaws.com";
const NOTIFICATION_TOPIC: &str = "AgentStackNotifications";

const SERVICE_ROLE_ATTEMPTS: u32 = 4;
const SERVICE_ROLE_RETRY_DELAY: Duration = Duration::from_secs(1);

const COMMANDER_HANDLER: &str = "index.handler";
const COMMANDER_DESCRIPTION: &str = "Provisions custom resources";
const COMMANDER_TIMEOUT: i32 = 30;
const COMMANDER_MEMORY_SIZE: i32 = 1024;

/// Default VPC errors that only mean the region cannot host one.
const SOFT_VPC_CODES: &[&str] = &["OptInRequired", "VpcLimitExceeded", "UnauthorizedOperation"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CommanderProperties {
    #[serde(default)]
    regions: Vec<String>,
    #[serde(default)]
    agent_env: String,
    #[serde(default)]
    agent_version: String,
}

impl CommanderProperties {
    fn code(&self, region: &str) -> CodeLocation {
        CodeLocation {
            bucket: format!("agent-{}-{region}-commander", self.agent_env),
            key: format!("agent-commander-{}.zip", self.agent_version),
        }
    }
}

fn vpc_is_soft(err: &RemoteError) -> bool {
    err.message_contains("EC2-Classic") || SOFT_VPC_CODES.contains(&err.code.as_str())
}

/// Commander bootstrap provisioner.
#[derive(Debug, Clone)]
pub struct CommanderBootstrap {
    ctx: ProvisionContext,
}

impl CommanderBootstrap {
    /// Creates the provisioner.
    #[must_use]
    pub const fn new(ctx: ProvisionContext) -> Self {
        Self { ctx }
    }

    fn function_name(&self) -> &str {
        &self.ctx.config.function_name
    }

    fn environment(&self) -> BTreeMap<String, String> {
        let config = &self.ctx.config;
        let mut env = BTreeMap::new();
        env.insert(vars::ACCOUNT_ID.to_string(), config.account_id.clone());
        if let Some(url) = &config.check_queue_url {
            env.insert(vars::CHECK_QUEUE_URL.to_string(), url.clone());
        }
        if let Some(external_id) = &config.external_id {
            env.insert(vars::EXTERNAL_ID.to_string(), external_id.clone());
        }
        if let Some(host) = &config.provision_api_host {
            env.insert(vars::PROVISION_API_HOST.to_string(), host.clone());
        }
        env
    }

    async fn own_tags(&self) -> Result<Tags, ProvisionError> {
        let home = self.ctx.home_region();
        let target = TagTarget::Function {
            region: home.to_string(),
            arn: self.ctx.config.function_arn(home),
        };
        self.ctx
            .tags
            .get(&target)
            .await
            .map_err(|e| ProvisionError::remote("Failed to read agent function tags", e))
    }

    async fn ensure_commander(&self, region: String, props: &CommanderProperties, tags: &Tags) -> RegionResult {
        match self.create_or_update_commander(&region, props, tags).await {
            Ok(()) => RegionResult::Succeeded,
            Err(e) => RegionResult::Failed(e),
        }
    }

    async fn create_or_update_commander(
        &self,
        region: &str,
        props: &CommanderProperties,
        tags: &Tags,
    ) -> Result<(), ProvisionError> {
        let config = &self.ctx.config;
        let functions = self.ctx.cloud.functions.as_ref();
        let name = self.function_name();

        let spec = FunctionSpec {
            name: name.to_string(),
            runtime: config.runtime.clone(),
            role: format!("arn:aws:iam::{}:role/agent/agent-commander-role", config.account_id),
            handler: COMMANDER_HANDLER.to_string(),
            code: props.code(region),
            description: COMMANDER_DESCRIPTION.to_string(),
            timeout: COMMANDER_TIMEOUT,
            memory_size: COMMANDER_MEMORY_SIZE,
            publish: false,
            tracing_mode: None,
            environment: self.environment(),
            tags: tags.clone(),
        };

        match functions.create_function(region, &spec).await {
            Ok(_) => {
                info!("Created {name} function in region {region}");
                return Ok(());
            }
            Err(e) if e.has_code("ResourceConflictException") => {}
            Err(e) => {
                return Err(ProvisionError::remote(
                    format!("Error while attempting to create {name} function in {region}"),
                    e,
                ));
            }
        }

        // The runtime has to move before the code when the old runtime is obsolete.
        let update = FunctionConfig {
            name: name.to_string(),
            runtime: Some(config.runtime.clone()),
            environment: Some(self.environment()),
            ..FunctionConfig::default()
        };
        functions.update_configuration(region, &update).await.map_err(|e| {
            ProvisionError::remote(
                format!("Error while attempting to update {name} configuration in {region}"),
                e,
            )
        })?;

        functions
            .update_code(region, name, &props.code(region), false)
            .await
            .map_err(|e| {
                ProvisionError::remote(format!("Error while attempting to update {name} code in {region}"), e)
            })?;

        let arn = config.function_arn(region);
        let current = self
            .ctx
            .tags
            .get(&TagTarget::Function {
                region: region.to_string(),
                arn: arn.clone(),
            })
            .await
            .map_err(|e| {
                ProvisionError::remote(format!("Error while attempting to get existing {name} tags in {region}"), e)
            })?;

        if !tags.is_empty() {
            functions.tag_function(region, &arn, tags).await.map_err(|e| {
                ProvisionError::remote(format!("Error while attempting to set new tags on {name} in {region}"), e)
            })?;
        }

        let removed: Vec<String> = current.into_keys().filter(|key| !tags.contains_key(key)).collect();
        if !removed.is_empty() {
            functions.untag_function(region, &arn, &removed).await.map_err(|e| {
                ProvisionError::remote(format!("Error while attempting to remove tags from {name} in {region}"), e)
            })?;
        }

        info!("Updated {name} function in region {region}");
        Ok(())
    }

    async fn ensure_cluster(&self, region: String) -> RegionResult {
        let platform = self.ctx.cloud.platform.as_ref();

        match platform.cluster_status(&region, CLUSTER_NAME).await {
            Ok(Some(status)) if status == CLUSTER_ACTIVE => return RegionResult::Succeeded,
            Ok(_) => {}
            Err(e) => {
                return RegionResult::Failed(ProvisionError::remote(
                    format!("Failed to describe '{CLUSTER_NAME}' cluster in {region}"),
                    e,
                ));
            }
        }

        match platform.create_cluster(&region, CLUSTER_NAME).await {
            Ok(()) => {
                info!("Created '{CLUSTER_NAME}' container cluster in region {region}");
                RegionResult::Succeeded
            }
            Err(e) => RegionResult::Failed(ProvisionError::remote(
                format!("Failed to create '{CLUSTER_NAME}' cluster in {region}"),
                e,
            )),
        }
    }

    async fn ensure_default_vpc(&self, region: String) -> RegionResult {
        match self.ctx.cloud.platform.create_default_vpc(&region).await {
            Ok(()) => {
                info!("Created default VPC in region {region}");
                RegionResult::Succeeded
            }
            Err(e) if e.has_code("DefaultVpcAlreadyExists") => RegionResult::Succeeded,
            Err(e) => RegionResult::classify(
                e,
                vpc_is_soft,
                format!("Could not create a default VPC in region {region}"),
            ),
        }
    }

    /// Ensures the container service-linked role. Never fails the step.
    async fn ensure_service_linked_role(&self) {
        let platform = self.ctx.cloud.platform.as_ref();

        for attempt in 0..SERVICE_ROLE_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(SERVICE_ROLE_RETRY_DELAY).await;
            }

            match platform.create_service_linked_role(CONTAINER_SERVICE).await {
                Ok(()) => {
                    info!("Created service-linked role for {CONTAINER_SERVICE}");
                    return;
                }
                Err(e) if e.message_contains("has been taken") => {
                    info!("Found existing service-linked role for {CONTAINER_SERVICE}");
                    return;
                }
                Err(e) => warn!("createServiceLinkedRole error: {}", e.describe()),
            }
        }

        warn!("Giving up on service-linked role for {CONTAINER_SERVICE} after {SERVICE_ROLE_ATTEMPTS} attempts");
    }

    async fn bootstrap(
        &self,
        commander_regions: &[String],
        props: &CommanderProperties,
    ) -> Result<Provisioned, ProvisionError> {
        let tags = self.own_tags().await?;

        let (commanders, clusters, vpcs) = tokio::join!(
            fan_out(commander_regions, |region| self.ensure_commander(region, props, &tags)),
            fan_out(&props.regions, |region| self.ensure_cluster(region)),
            fan_out(&props.regions, |region| self.ensure_default_vpc(region)),
        );
        aggregate(
            "Commander bootstrap",
            commanders.into_iter().chain(clusters).chain(vpcs),
        )?;

        self.ensure_service_linked_role().await;

        Ok(Provisioned::Complete(Outcome::success(PHYSICAL_ID)))
    }
}

#[async_trait]
impl Provisioner for CommanderBootstrap {
    fn resource_type(&self) -> ResourceType {
        ResourceType::AgentCommanderBootstrap
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: CommanderProperties = request.properties()?;
        let regions = target_regions(&props.regions, self.ctx.home_region());
        self.bootstrap(&regions, &props).await
    }

    async fn update(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: CommanderProperties = request.properties()?;
        let old: CommanderProperties = request.old_properties()?;

        let diff = diff_regions(&old.regions, &props.regions, self.ctx.home_region());
        info!(
            "Commander regions: new {:?}, retained {:?}",
            diff.new_regions, diff.retained_regions
        );

        // Retained regions go through the same create-or-update path.
        let regions: Vec<String> = diff
            .new_regions
            .into_iter()
            .chain(diff.retained_regions)
            .collect();
        self.bootstrap(&regions, &props).await
    }

    async fn delete(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: CommanderProperties = request.properties()?;
        let regions = target_regions(&props.regions, self.ctx.home_region());
        let functions = self.ctx.cloud.functions.as_ref();
        let events = self.ctx.cloud.events.as_ref();
        let name = self.function_name();
        let account = self.ctx.account_id();
        let function_action = format!("delete {name} function");
        let topic_action = format!("delete {NOTIFICATION_TOPIC} topic");

        tokio::join!(
            teardown(&function_action, &regions, |region| async move {
                functions.delete_function(&region, name).await
            }),
            teardown(&topic_action, &regions, |region| async move {
                let arn = format!("arn:aws:sns:{region}:{account}:{NOTIFICATION_TOPIC}");
                events.delete_topic(&region, &arn).await
            }),
        );

        Ok(Provisioned::Complete(Outcome::success(
            request.physical_id_or_sentinel(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::testing::MockCloud;
    use crate::cloud::FunctionVersion;
    use crate::resources::testing::{context, delete, request, update, HOME};
    use serde_json::json;

    const COMMANDER: &str = "Custom::AgentCommanderBootstrap";
    const REMOTE: &str = "us-east-2";

    fn properties(regions: &[&str]) -> serde_json::Value {
        json!({ "Regions": regions, "AgentEnv": "prod", "AgentVersion": "1.2.3" })
    }

    fn own_tags(cloud: &mut MockCloud) {
        cloud
            .tags
            .expect_list_tags()
            .withf(|target| matches!(target, TagTarget::Function { region, .. } if region == HOME))
            .times(1)
            .returning(|_| {
                Ok(Tags::from([
                    (String::from("team"), String::from("platform")),
                    (String::from("aws:cloudformation:stack-name"), String::from("agent")),
                ]))
            });
    }

    fn prerequisites_ok(cloud: &mut MockCloud) {
        cloud
            .platform
            .expect_cluster_status()
            .returning(|_, _| Ok(Some(String::from("ACTIVE"))));
        cloud.platform.expect_create_default_vpc().returning(|_| Ok(()));
        cloud
            .platform
            .expect_create_service_linked_role()
            .returning(|_| Ok(()));
    }

    fn created() -> FunctionVersion {
        FunctionVersion {
            name: String::from("agent-commander"),
            arn: format!("arn:aws:lambda:{REMOTE}:123456789012:function:agent-commander"),
            version: String::from("$LATEST"),
        }
    }

    #[tokio::test]
    async fn test_create_fans_out() {
        let mut cloud = MockCloud::new();
        own_tags(&mut cloud);
        cloud
            .functions
            .expect_create_function()
            .withf(|region, spec| {
                region == REMOTE
                    && spec.code.bucket == "agent-prod-us-east-2-commander"
                    && spec.code.key == "agent-commander-1.2.3.zip"
                    && spec.role == "arn:aws:iam::123456789012:role/agent/agent-commander-role"
                    && spec.tags.len() == 1
                    && spec.environment.contains_key("PROVISION_CHECK_QUEUE_URL")
            })
            .times(1)
            .returning(|_, _| Ok(created()));
        cloud
            .platform
            .expect_cluster_status()
            .withf(|region, _| region == HOME)
            .returning(|_, _| Ok(Some(String::from("ACTIVE"))));
        cloud
            .platform
            .expect_cluster_status()
            .withf(|region, _| region == REMOTE)
            .returning(|_, _| Ok(None));
        cloud
            .platform
            .expect_create_cluster()
            .withf(|region, name| region == REMOTE && name == "default")
            .times(1)
            .returning(|_, _| Ok(()));
        cloud
            .platform
            .expect_create_default_vpc()
            .withf(|region| region == HOME)
            .returning(|_| Err(RemoteError::new("DefaultVpcAlreadyExists", "exists")));
        cloud
            .platform
            .expect_create_default_vpc()
            .withf(|region| region == REMOTE)
            .returning(|_| {
                Err(RemoteError::new(
                    "InvalidParameter",
                    "Accounts on the EC2-Classic platform cannot create a default VPC.",
                ))
            });
        cloud
            .platform
            .expect_create_service_linked_role()
            .times(1)
            .returning(|_| {
                Err(RemoteError::new(
                    "InvalidInput",
                    "Service role name AWSServiceRoleForECS has been taken in this account",
                ))
            });

        let provisioner = CommanderBootstrap::new(context(cloud));
        let result = provisioner
            .provision(&request("Create", COMMANDER, properties(&[HOME, REMOTE])))
            .await
            .unwrap();

        assert_eq!(result, Provisioned::Complete(Outcome::success("agent-commanders")));
    }

    #[tokio::test]
    async fn test_existing_commander_is_updated_and_retagged() {
        let mut cloud = MockCloud::new();
        own_tags(&mut cloud);
        prerequisites_ok(&mut cloud);
        cloud
            .functions
            .expect_create_function()
            .returning(|_, _| Err(RemoteError::new("ResourceConflictException", "exists")));
        cloud
            .functions
            .expect_update_configuration()
            .withf(|region, config| {
                region == REMOTE && config.runtime.as_deref() == Some("provided.al2023") && config.environment.is_some()
            })
            .times(1)
            .returning(|_, _| Ok(()));
        cloud
            .functions
            .expect_update_code()
            .times(1)
            .returning(|_, _, _, _| Ok(created()));
        cloud
            .tags
            .expect_list_tags()
            .withf(|target| matches!(target, TagTarget::Function { region, .. } if region == REMOTE))
            .returning(|_| {
                Ok(Tags::from([
                    (String::from("team"), String::from("old")),
                    (String::from("legacy"), String::from("x")),
                ]))
            });
        cloud
            .functions
            .expect_tag_function()
            .withf(|_, _, tags| tags.get("team").map(String::as_str) == Some("platform"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        cloud
            .functions
            .expect_untag_function()
            .withf(|_, _, keys| keys == [String::from("legacy")])
            .times(1)
            .returning(|_, _, _| Ok(()));

        let provisioner = CommanderBootstrap::new(context(cloud));
        let result = provisioner
            .update(&update(
                COMMANDER,
                "agent-commanders",
                properties(&[HOME, REMOTE]),
                properties(&[HOME, REMOTE]),
            ))
            .await
            .unwrap();

        assert_eq!(result, Provisioned::Complete(Outcome::success("agent-commanders")));
    }

    #[tokio::test]
    async fn test_hard_vpc_failure_fails_step() {
        let mut cloud = MockCloud::new();
        own_tags(&mut cloud);
        cloud
            .platform
            .expect_cluster_status()
            .returning(|_, _| Ok(Some(String::from("ACTIVE"))));
        cloud
            .platform
            .expect_create_default_vpc()
            .returning(|_| Err(RemoteError::new("InternalError", "boom")));

        let provisioner = CommanderBootstrap::new(context(cloud));
        let err = provisioner
            .create(&request("Create", COMMANDER, properties(&[HOME])))
            .await
            .unwrap_err();

        assert!(err.to_string().contains(HOME));
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_linked_role_exhaustion_is_logged_only() {
        let mut cloud = MockCloud::new();
        own_tags(&mut cloud);
        cloud
            .platform
            .expect_cluster_status()
            .returning(|_, _| Ok(Some(String::from("ACTIVE"))));
        cloud.platform.expect_create_default_vpc().returning(|_| Ok(()));
        cloud
            .platform
            .expect_create_service_linked_role()
            .times(4)
            .returning(|_| Err(RemoteError::new("AccessDenied", "denied")));

        let provisioner = CommanderBootstrap::new(context(cloud));
        let result = provisioner
            .create(&request("Create", COMMANDER, properties(&[HOME])))
            .await
            .unwrap();

        assert!(matches!(result, Provisioned::Complete(outcome) if outcome.is_success()));
    }

    #[tokio::test]
    async fn test_delete_is_best_effort() {
        let mut cloud = MockCloud::new();
        cloud
            .functions
            .expect_delete_function()
            .withf(|region, name| region == REMOTE && name == "agent-commander")
            .times(1)
            .returning(|_, _| Err(RemoteError::new("AccessDeniedException", "denied")));
        cloud
            .events
            .expect_delete_topic()
            .withf(|region, arn| {
                region == REMOTE && arn == "arn:aws:sns:us-east-2:123456789012:AgentStackNotifications"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let provisioner = CommanderBootstrap::new(context(cloud));
        let result = provisioner
            .delete(&delete(COMMANDER, "agent-commanders", properties(&[HOME, REMOTE])))
            .await
            .unwrap();

        assert_eq!(result, Provisioned::Complete(Outcome::success("agent-commanders")));
    }
}
