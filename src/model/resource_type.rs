//! Closed set of resource types this agent provisions.

use std::str::FromStr;

/// A resource type handled by a registered provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// Companion commander functions and regional prerequisites.
    AgentCommanderBootstrap,
    /// Regional agent factory build projects.
    AgentFactoryBootstrap,
    /// Regional pipeline runner build projects and event forwarding.
    PipelineRunnerBootstrap,
    /// Certificate in us-east-1.
    UsEast1Certificate,
    /// Stacks subdomain registered through the domain API.
    StacksDomain,
    /// Edge function in us-east-1.
    EdgeFunction,
    /// Adopted pre-existing resource.
    ExistingResource,
    /// Website publish build.
    WebsiteBuildTrigger,
    /// Container image build.
    DockerImageBuildTrigger,
}

impl ResourceType {
    /// Every registered resource type.
    pub const ALL: [Self; 9] = [
        Self::AgentCommanderBootstrap,
        Self::AgentFactoryBootstrap,
        Self::PipelineRunnerBootstrap,
        Self::UsEast1Certificate,
        Self::StacksDomain,
        Self::EdgeFunction,
        Self::ExistingResource,
        Self::WebsiteBuildTrigger,
        Self::DockerImageBuildTrigger,
    ];

    /// Returns the template type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AgentCommanderBootstrap => "Custom::AgentCommanderBootstrap",
            Self::AgentFactoryBootstrap => "Custom::AgentFactoryBootstrap",
            Self::PipelineRunnerBootstrap => "Custom::PipelineRunnerBootstrap",
            Self::UsEast1Certificate => "Custom::UsEast1SSLCertificate",
            Self::StacksDomain => "Custom::StacksDomain",
            Self::EdgeFunction => "Custom::EdgeFunction",
            Self::ExistingResource => "Custom::ExistingResource",
            Self::WebsiteBuildTrigger => "Custom::WebsiteBuildTrigger",
            Self::DockerImageBuildTrigger => "Custom::DockerImageBuildTrigger",
        }
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
