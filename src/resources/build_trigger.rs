//! `Custom::WebsiteBuildTrigger` and `Custom::DockerImageBuildTrigger`.
//!
//! Both start a build whose environment carries the correlation fields; the
//! build-completion event reports the outcome later.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::ProvisionContext;
use crate::error::ProvisionError;
use crate::model::{build_env, Outcome, ProvisionRequest, ResourceType, SENTINEL_PHYSICAL_ID};
use crate::provisioner::{Provisioned, Provisioner};

/// Which build a trigger starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildTriggerKind {
    /// Website publish build.
    Website,
    /// Container image build.
    DockerImage,
}

impl BuildTriggerKind {
    const fn label(self) -> &'static str {
        match self {
            Self::Website => "Website Builder",
            Self::DockerImage => "Docker Image Builder",
        }
    }

    const fn resource_type(self) -> ResourceType {
        match self {
            Self::Website => ResourceType::WebsiteBuildTrigger,
            Self::DockerImage => ResourceType::DockerImageBuildTrigger,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TriggerProperties {
    project_name: String,
    #[serde(default)]
    source_version: Option<String>,
}

/// Build trigger provisioner.
#[derive(Debug, Clone)]
pub struct BuildTrigger {
    kind: BuildTriggerKind,
    ctx: ProvisionContext,
}

impl BuildTrigger {
    /// Creates a trigger of the given kind.
    #[must_use]
    pub const fn new(kind: BuildTriggerKind, ctx: ProvisionContext) -> Self {
        Self { kind, ctx }
    }

    async fn start(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: TriggerProperties = request.properties()?;
        let source_version = props.source_version.filter(|v| !v.is_empty());

        if self.kind == BuildTriggerKind::Website && source_version.is_none() {
            info!("Skipping website build: local deployment strategy is not supported for websites");
            return Ok(Provisioned::Complete(Outcome::success(SENTINEL_PHYSICAL_ID)));
        }

        let correlation = &request.correlation;
        let environment = vec![
            (build_env::STACK_ID.to_string(), correlation.stack_id.clone()),
            (build_env::REQUEST_ID.to_string(), correlation.request_id.clone()),
            (build_env::LOGICAL_ID.to_string(), correlation.logical_resource_id.clone()),
            (build_env::RESPONSE_URL.to_string(), correlation.response_url.clone()),
            (build_env::SOURCE_VERSION.to_string(), source_version.unwrap_or_default()),
        ];

        self.ctx
            .cloud
            .builds
            .start_build(&props.project_name, &environment)
            .await
            .map_err(|e| {
                ProvisionError::failed(format!(
                    "Failed to start {} project: {}",
                    self.kind.label(),
                    e.message
                ))
            })?;
        info!("Started {} build {} for {}", self.kind.label(), props.project_name, request.logical_id());

        Ok(Provisioned::AwaitingBuild)
    }
}

#[async_trait]
impl Provisioner for BuildTrigger {
    fn resource_type(&self) -> ResourceType {
        self.kind.resource_type()
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        self.start(request).await
    }

    async fn update(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        self.start(request).await
    }

    async fn delete(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        Ok(Provisioned::Complete(Outcome::success(
            request.physical_id_or_sentinel(),
        )))
    }
}
