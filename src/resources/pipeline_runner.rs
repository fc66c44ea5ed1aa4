//! `Custom::PipelineRunnerBootstrap`: the `PipelineRunner` build project in
//! every declared region other than home, with an event rule forwarding its
//! build state changes to the central account's default event bus.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{build_project, ProvisionContext};
use crate::cloud::{ProjectSpec, RuleSpec, RuleTarget, TagTarget, Tags};
use crate::error::{ProvisionError, RemoteError};
use crate::model::{Outcome, ProvisionRequest, ResourceType, BUILD_EVENT_SOURCE};
use crate::provisioner::fanout::{aggregate, diff_regions, fan_out, target_regions, teardown};
use crate::provisioner::{Provisioned, Provisioner, RegionResult};

const PROJECT_NAME: &str = "PipelineRunner";
const RULE_NAME: &str = "ForwardPipelineEvents";
const TARGET_ID: &str = "PipelineRunnerEventNotification";
const EVENT_BUS: &str = "default";
const PHYSICAL_ID: &str = "agent-pipeline-runners";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RunnerProperties {
    service_role: String,
    aws_account_id: String,
    pipeline_runner_events_rule: String,
    #[serde(default)]
    regions: Vec<String>,
}

fn event_pattern() -> String {
    json!({
        "source": [BUILD_EVENT_SOURCE],
        "detail-type": ["CodeBuild Build State Change"],
        "detail": {
            "build-status": ["FAILED", "SUCCEEDED"],
            "project-name": [PROJECT_NAME]
        }
    })
    .to_string()
}

/// Pipeline runner bootstrap provisioner.
#[derive(Debug, Clone)]
pub struct PipelineRunnerBootstrap {
    ctx: ProvisionContext,
}

impl PipelineRunnerBootstrap {
    /// Creates the provisioner.
    #[must_use]
    pub const fn new(ctx: ProvisionContext) -> Self {
        Self { ctx }
    }

    async fn home_tags(&self, target: TagTarget) -> Result<Tags, ProvisionError> {
        self.ctx
            .tags
            .get(&target)
            .await
            .map_err(|e| ProvisionError::remote(format!("Failed to read tags of {target}"), e))
    }

    async fn project_spec(&self, props: &RunnerProperties) -> Result<ProjectSpec, ProvisionError> {
        let tags = self
            .home_tags(TagTarget::BuildProject {
                region: self.ctx.home_region().to_string(),
                name: PROJECT_NAME.to_string(),
            })
            .await?;
        Ok(build_project::project_spec(
            PROJECT_NAME,
            props.service_role.clone(),
            tags,
        ))
    }

    async fn rule_tags(&self, props: &RunnerProperties) -> Result<Tags, ProvisionError> {
        self.home_tags(TagTarget::EventRule {
            region: self.ctx.home_region().to_string(),
            arn: props.pipeline_runner_events_rule.clone(),
        })
        .await
    }

    async fn create_runner(
        &self,
        region: String,
        props: &RunnerProperties,
        spec: &ProjectSpec,
        rule_tags: &Tags,
    ) -> RegionResult {
        match build_project::recreate(self.ctx.cloud.builds.as_ref(), &region, spec).await {
            RegionResult::Succeeded => {}
            other => return other,
        }

        match self.forward_events(&region, props, rule_tags).await {
            Ok(()) => {
                info!("Created event rule {RULE_NAME} in {region}");
                RegionResult::Succeeded
            }
            Err(e) => RegionResult::Failed(ProvisionError::remote(
                format!("Error while creating event rule {RULE_NAME} in region {region}"),
                e,
            )),
        }
    }

    async fn forward_events(
        &self,
        region: &str,
        props: &RunnerProperties,
        tags: &Tags,
    ) -> Result<(), RemoteError> {
        let events = self.ctx.cloud.events.as_ref();

        let rule = RuleSpec {
            name: RULE_NAME.to_string(),
            description: format!("Forward {PROJECT_NAME} events to the central account in this region"),
            event_bus: EVENT_BUS.to_string(),
            event_pattern: event_pattern(),
            tags: tags.clone(),
        };
        events.put_rule(region, &rule).await?;

        let target = RuleTarget {
            id: TARGET_ID.to_string(),
            arn: format!(
                "arn:aws:events:{region}:{}:event-bus/{EVENT_BUS}",
                props.aws_account_id
            ),
        };
        events.put_targets(region, RULE_NAME, &[target]).await
    }

    async fn update_runner(&self, region: String, spec: &ProjectSpec) -> RegionResult {
        match self.ctx.cloud.builds.update_project(&region, spec).await {
            Ok(()) => {
                info!("Updated {PROJECT_NAME} in region {region}");
                RegionResult::Succeeded
            }
            Err(e) => RegionResult::Failed(ProvisionError::remote(
                format!("Error while attempting to update the {PROJECT_NAME} project in region {region}"),
                e,
            )),
        }
    }
}

#[async_trait]
impl Provisioner for PipelineRunnerBootstrap {
    fn resource_type(&self) -> ResourceType {
        ResourceType::PipelineRunnerBootstrap
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: RunnerProperties = request.properties()?;
        let regions = target_regions(&props.regions, self.ctx.home_region());
        let spec = self.project_spec(&props).await?;
        let rule_tags = self.rule_tags(&props).await?;

        let results = fan_out(&regions, |region| {
            self.create_runner(region, &props, &spec, &rule_tags)
        })
        .await;
        aggregate("Create pipeline runner", results)?;

        Ok(Provisioned::Complete(Outcome::success(PHYSICAL_ID)))
    }

    async fn update(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: RunnerProperties = request.properties()?;
        let old: RunnerProperties = request.old_properties()?;
        let diff = diff_regions(&old.regions, &props.regions, self.ctx.home_region());
        let spec = self.project_spec(&props).await?;
        let rule_tags = self.rule_tags(&props).await?;

        let (created, updated) = tokio::join!(
            fan_out(&diff.new_regions, |region| {
                self.create_runner(region, &props, &spec, &rule_tags)
            }),
            fan_out(&diff.retained_regions, |region| self.update_runner(region, &spec)),
        );
        aggregate("Update pipeline runner", created.into_iter().chain(updated))?;

        Ok(Provisioned::Complete(Outcome::success(
            request.physical_id_or_sentinel(),
        )))
    }

    async fn delete(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: RunnerProperties = request.properties()?;
        let regions = target_regions(&props.regions, self.ctx.home_region());
        let builds = self.ctx.cloud.builds.as_ref();
        let events = self.ctx.cloud.events.as_ref();
        let project_action = format!("delete {PROJECT_NAME}");
        let rule_action = format!("delete {RULE_NAME}");

        tokio::join!(
            teardown(&project_action, &regions, |region| async move {
                builds.delete_project(&region, PROJECT_NAME).await
            }),
            teardown(&rule_action, &regions, |region| async move {
                events
                    .remove_targets(&region, RULE_NAME, &[TARGET_ID.to_string()])
                    .await?;
                events.delete_rule(&region, RULE_NAME).await
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
    use crate::resources::testing::{context, delete, request, update, HOME};
    use serde_json::Value;

    const RUNNER: &str = "Custom::PipelineRunnerBootstrap";
    const RULE_ARN: &str = "arn:aws:events:us-west-2:123456789012:rule/PipelineRunnerEvents";

    fn properties(regions: &[&str]) -> Value {
        json!({
            "ServiceRole": "arn:aws:iam::123456789012:role/runner",
            "AwsAccountId": "999999999999",
            "PipelineRunnerEventsRule": RULE_ARN,
            "Regions": regions
        })
    }

    fn home_tags(cloud: &mut MockCloud) {
        cloud
            .tags
            .expect_list_tags()
            .withf(|target| matches!(target, TagTarget::BuildProject { .. }))
            .times(1)
            .returning(|_| Ok(Tags::from([(String::from("team"), String::from("ci"))])));
        cloud
            .tags
            .expect_list_tags()
            .withf(|target| matches!(target, TagTarget::EventRule { arn, .. } if arn == RULE_ARN))
            .times(1)
            .returning(|_| Ok(Tags::from([(String::from("rule"), String::from("yes"))])));
    }

    #[test]
    fn test_event_pattern() {
        let pattern: Value = serde_json::from_str(&event_pattern()).unwrap();
        assert_eq!(pattern["source"][0], "aws.codebuild");
        assert_eq!(pattern["detail"]["project-name"][0], "PipelineRunner");
        assert_eq!(pattern["detail"]["build-status"], json!(["FAILED", "SUCCEEDED"]));
    }

    #[tokio::test]
    async fn test_create_forwards_events() {
        let mut cloud = MockCloud::new();
        home_tags(&mut cloud);
        cloud.builds.expect_delete_project().returning(|_, _| Ok(()));
        cloud
            .builds
            .expect_create_project()
            .withf(|_, spec| spec.service_role == "arn:aws:iam::123456789012:role/runner")
            .times(1)
            .returning(|_, _| Ok(()));
        cloud
            .events
            .expect_put_rule()
            .withf(|region, rule| {
                region == "eu-west-1" && rule.name == "ForwardPipelineEvents" && rule.tags.contains_key("rule")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        cloud
            .events
            .expect_put_targets()
            .withf(|_, rule, targets| {
                rule == "ForwardPipelineEvents"
                    && targets[0].arn == "arn:aws:events:eu-west-1:999999999999:event-bus/default"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let provisioner = PipelineRunnerBootstrap::new(context(cloud));
        let result = provisioner
            .create(&request("Create", RUNNER, properties(&[HOME, "eu-west-1"])))
            .await
            .unwrap();

        assert_eq!(result, Provisioned::Complete(Outcome::success("agent-pipeline-runners")));
    }

    #[tokio::test]
    async fn test_skipped_region_creates_no_rule() {
        let mut cloud = MockCloud::new();
        home_tags(&mut cloud);
        cloud.builds.expect_delete_project().returning(|_, _| Ok(()));
        cloud.builds.expect_create_project().returning(|_, _| {
            Err(RemoteError::new(
                "RegionDisabledException",
                "STS is not activated in this region",
            ))
        });

        let provisioner = PipelineRunnerBootstrap::new(context(cloud));
        let result = provisioner
            .create(&request("Create", RUNNER, properties(&["ap-east-1"])))
            .await
            .unwrap();

        assert!(matches!(result, Provisioned::Complete(outcome) if outcome.is_success()));
    }

    #[tokio::test]
    async fn test_update_retained_region_updates_project() {
        let mut cloud = MockCloud::new();
        home_tags(&mut cloud);
        cloud
            .builds
            .expect_update_project()
            .withf(|region, _| region == "eu-west-1")
            .times(1)
            .returning(|_, _| Ok(()));

        let provisioner = PipelineRunnerBootstrap::new(context(cloud));
        let result = provisioner
            .update(&update(
                RUNNER,
                "agent-pipeline-runners",
                properties(&[HOME, "eu-west-1"]),
                properties(&[HOME, "eu-west-1"]),
            ))
            .await
            .unwrap();

        assert_eq!(result, Provisioned::Complete(Outcome::success("agent-pipeline-runners")));
    }

    #[tokio::test]
    async fn test_delete_removes_rule_best_effort() {
        let mut cloud = MockCloud::new();
        cloud
            .builds
            .expect_delete_project()
            .times(1)
            .returning(|_, _| Err(RemoteError::new("ResourceNotFoundException", "gone")));
        cloud
            .events
            .expect_remove_targets()
            .withf(|_, rule, ids| rule == "ForwardPipelineEvents" && ids == [String::from("PipelineRunnerEventNotification")])
            .times(1)
            .returning(|_, _, _| Ok(()));
        cloud
            .events
            .expect_delete_rule()
            .times(1)
            .returning(|_, _| Err(RemoteError::new("ResourceNotFoundException", "gone")));

        let provisioner = PipelineRunnerBootstrap::new(context(cloud));
        let result = provisioner
            .delete(&delete(RUNNER, "agent-pipeline-runners", properties(&[HOME, "eu-west-1"])))
            .await
            .unwrap();

        assert_eq!(result, Provisioned::Complete(Outcome::success("agent-pipeline-runners")));
    }
}
