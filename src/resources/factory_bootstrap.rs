//! `Custom::AgentFactoryBootstrap`: the `AgentFactory` build project in
//! every declared region other than home.

use async_trait::async_trait;
use serde::Deserialize;

use super::{build_project, ProvisionContext};
use crate::cloud::{ProjectSpec, TagTarget};
use crate::error::ProvisionError;
use crate::model::{Outcome, ProvisionRequest, ResourceType};
use crate::provisioner::fanout::{aggregate, diff_regions, fan_out, target_regions, teardown};
use crate::provisioner::{Provisioned, Provisioner};

const PROJECT_NAME: &str = "AgentFactory";
const PHYSICAL_ID: &str = "agent-factories";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FactoryProperties {
    #[serde(default)]
    regions: Vec<String>,
}

/// Factory bootstrap provisioner.
#[derive(Debug, Clone)]
pub struct FactoryBootstrap {
    ctx: ProvisionContext,
}

impl FactoryBootstrap {
    /// Creates the provisioner.
    #[must_use]
    pub const fn new(ctx: ProvisionContext) -> Self {
        Self { ctx }
    }

    /// Builds the project definition, tagged like the home region's project.
    async fn spec(&self) -> Result<ProjectSpec, ProvisionError> {
        let target = TagTarget::BuildProject {
            region: self.ctx.home_region().to_string(),
            name: PROJECT_NAME.to_string(),
        };
        let tags = self
            .ctx
            .tags
            .get(&target)
            .await
            .map_err(|e| ProvisionError::remote(format!("Failed to read {PROJECT_NAME} tags"), e))?;

        let role = format!(
            "arn:aws:iam::{}:role/agent/agent-factory-role",
            self.ctx.account_id()
        );
        Ok(build_project::project_spec(PROJECT_NAME, role, tags))
    }
}

#[async_trait]
impl Provisioner for FactoryBootstrap {
    fn resource_type(&self) -> ResourceType {
        ResourceType::AgentFactoryBootstrap
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: FactoryProperties = request.properties()?;
        let regions = target_regions(&props.regions, self.ctx.home_region());
        let spec = self.spec().await?;
        let builds = self.ctx.cloud.builds.as_ref();

        let results = fan_out(&regions, |region| {
            let spec = &spec;
            async move { build_project::recreate(builds, &region, spec).await }
        })
        .await;
        aggregate("Create factory", results)?;

        Ok(Provisioned::Complete(Outcome::success(PHYSICAL_ID)))
    }

    async fn update(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: FactoryProperties = request.properties()?;
        let old: FactoryProperties = request.old_properties()?;
        let diff = diff_regions(&old.regions, &props.regions, self.ctx.home_region());
        let spec = self.spec().await?;
        let builds = self.ctx.cloud.builds.as_ref();

        let (created, updated) = tokio::join!(
            fan_out(&diff.new_regions, |region| {
                let spec = &spec;
                async move { build_project::recreate(builds, &region, spec).await }
            }),
            fan_out(&diff.retained_regions, |region| {
                let spec = &spec;
                async move { build_project::update(builds, &region, spec).await }
            }),
        );
        aggregate("Update factory", created.into_iter().chain(updated))?;

        Ok(Provisioned::Complete(Outcome::success(
            request.physical_id_or_sentinel(),
        )))
    }

    async fn delete(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: FactoryProperties = request.properties()?;
        let regions = target_regions(&props.regions, self.ctx.home_region());
        let builds = self.ctx.cloud.builds.as_ref();

        teardown(&format!("delete {PROJECT_NAME}"), &regions, |region| async move {
            builds.delete_project(&region, PROJECT_NAME).await
        })
        .await;

        Ok(Provisioned::Complete(Outcome::success(
            request.physical_id_or_sentinel(),
        )))
    }
}
