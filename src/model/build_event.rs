//! Completion of a triggered build, projected from the build state change
//! event the build service emits.

use std::collections::HashMap;

use aws_lambda_events::codebuild::CodeBuildEventDetail;

use super::request::Correlation;

/// Event source of build state changes.
pub const BUILD_EVENT_SOURCE: &str = "aws.codebuild";

/// Environment variable names carrying correlation into a build.
pub mod env {
    /// Orchestrator response URL.
    pub const RESPONSE_URL: &str = "CFN_RESPONSE_URL";
    /// Stack id.
    pub const STACK_ID: &str = "CFN_STACK_ID";
    /// Logical resource id.
    pub const LOGICAL_ID: &str = "CFN_LOGICAL_ID";
    /// Request id.
    pub const REQUEST_ID: &str = "CFN_REQUEST_ID";
    /// Source version, used as the physical id.
    pub const SOURCE_VERSION: &str = "SOURCE_VERSION";
}

/// The parts of a finished build the agent reports on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildCompletion {
    /// Project that ran the build.
    pub project_name: String,
    /// Build ARN-style id, `project:uuid` prefixed by the project path.
    pub build_id: String,
    /// Final build status.
    pub build_status: String,
    /// Environment variables the build ran with.
    pub variables: HashMap<String, String>,
}

impl From<CodeBuildEventDetail> for BuildCompletion {
    fn from(detail: CodeBuildEventDetail) -> Self {
        let variables = detail
            .additional_information
            .environment
            .environment_variables
            .into_iter()
            .filter_map(|variable| Some((variable.name?, variable.value.unwrap_or_default())))
            .collect();

        Self {
            project_name: detail.project_name.unwrap_or_default(),
            build_id: detail.build_id.unwrap_or_default(),
            build_status: detail.build_status.unwrap_or_default(),
            variables,
        }
    }
}

impl BuildCompletion {
    fn variable(&self, name: &str) -> Option<&str> {
        self.variables
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Returns the build id without its project path prefix.
    #[must_use]
    pub fn short_build_id(&self) -> &str {
        self.build_id
            .split('/')
            .nth(1)
            .unwrap_or(self.build_id.as_str())
    }

    /// Returns the console link to the build log.
    #[must_use]
    pub fn console_link(&self, region: &str) -> String {
        format!(
            "https://{region}.console.aws.amazon.com/codesuite/codebuild/projects/{}/build/{}/log?region={region}",
            self.project_name,
            self.short_build_id()
        )
    }

    /// Rebuilds the correlation fields from the build environment.
    ///
    /// # Errors
    ///
    /// Returns the names of the missing variables if any are absent or empty.
    pub fn correlation(&self) -> Result<Correlation, Vec<&'static str>> {
        let mut missing = Vec::new();
        let mut lookup = |name: &'static str| {
            self.variable(name).map_or_else(
                || {
                    missing.push(name);
                    String::new()
                },
                str::to_string,
            )
        };

        let correlation = Correlation {
            response_url: lookup(env::RESPONSE_URL),
            stack_id: lookup(env::STACK_ID),
            request_id: lookup(env::REQUEST_ID),
            logical_resource_id: lookup(env::LOGICAL_ID),
        };

        if missing.is_empty() {
            Ok(correlation)
        } else {
            Err(missing)
        }
    }

    /// Returns the source version the build ran for.
    #[must_use]
    pub fn source_version(&self) -> Option<String> {
        self.variable(env::SOURCE_VERSION).map(str::to_string)
    }
}

/// Build state change fixtures shaped like the events the build service emits.
#[cfg(test)]
pub(crate) mod testing {
    use serde_json::{json, Value};

    /// Returns a finished `WebsiteBuilder` build event.
    pub(crate) fn build_event(status: &str, variables: &[(&str, &str)]) -> Value {
        let build_id = "arn:aws:codebuild:us-west-2:123456789012:build/WebsiteBuilder:8a2c";
        let variables: Vec<_> = variables
            .iter()
            .map(|(name, value)| json!({ "name": name, "type": "PLAINTEXT", "value": value }))
            .collect();

        json!({
            "version": "0",
            "id": "bfdc1220-60ff-44da-ad3d-5b7f0f6a2d2e",
            "detail-type": "CodeBuild Build State Change",
            "source": "aws.codebuild",
            "account": "123456789012",
            "time": "2024-01-01T00:20:00Z",
            "region": "us-west-2",
            "resources": [build_id],
            "detail": {
                "build-status": status,
                "project-name": "WebsiteBuilder",
                "build-id": build_id,
                "additional-information": {
                    "artifact": {
                        "md5sum": "da9c44c8a9a3cd4b443126e823168fab",
                        "sha256sum": "6ccc2ae1df9d155ba83c597051611c42d60e09c6329dcb14a312cecc0a8e3901",
                        "location": "arn:aws:s3:::agent-artifacts/site.zip"
                    },
                    "environment": {
                        "image": "aws/codebuild/standard:7.0",
                        "privileged-mode": false,
                        "compute-type": "BUILD_GENERAL1_SMALL",
                        "type": "LINUX_CONTAINER",
                        "environment-variables": variables
                    },
                    "timeout-in-minutes": 60,
                    "build-complete": true,
                    "initiator": "provision-agent",
                    "build-start-time": "Jan 1, 2024 12:10:00 AM",
                    "source": {
                        "location": "agent-sources/site.zip",
                        "type": "S3"
                    },
                    "logs": {
                        "group-name": "/aws/codebuild/WebsiteBuilder",
                        "stream-name": "8a2c",
                        "deep-link": "https://console.aws.amazon.com/cloudwatch/home?region=us-west-2#logEvent:group=/aws/codebuild/WebsiteBuilder;stream=8a2c"
                    },
                    "phases": [
                        {
                            "phase-context": [],
                            "start-time": "Jan 1, 2024 12:10:00 AM",
                            "end-time": "Jan 1, 2024 12:10:00 AM",
                            "duration-in-seconds": 0,
                            "phase-type": "SUBMITTED",
                            "phase-status": "SUCCEEDED"
                        },
                        {
                            "start-time": "Jan 1, 2024 12:19:58 AM",
                            "phase-type": "COMPLETED"
                        }
                    ]
                },
                "current-phase": "COMPLETED",
                "current-phase-context": "[]",
                "version": "1"
            }
        })
    }
}
