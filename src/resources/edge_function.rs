//! `Custom::EdgeFunction`: a published function in the edge region.
//!
//! Replicated functions cannot be deleted until the CDN has removed their
//! replicas, so deletion may continue through a bounded number of deferred
//! retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::ProvisionContext;
use crate::cloud::{CodeLocation, FunctionApi, FunctionConfig, FunctionSpec, EDGE_REGION};
use crate::config::REPLICATED_DELETE_RETRY_CYCLES;
use crate::error::{ProvisionError, RemoteError};
use crate::model::{lenient, Outcome, PendingCheck, ProvisionRequest, RecordType, ResourceType, RetryRecord};
use crate::provisioner::deferred::expired;
use crate::provisioner::{CheckOutcome, Provisioned, Provisioner};

const DEFAULT_MEMORY_SIZE: i32 = 128;
const DEFAULT_TIMEOUT: i32 = 3;
const DEFAULT_TRACING: &str = "PassThrough";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EdgeFunctionProperties {
    function_name: String,
    handler: String,
    role: String,
    runtime: String,
    code_uri: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_i32")]
    memory_size: Option<i32>,
    #[serde(default, deserialize_with = "lenient::optional_i32")]
    timeout: Option<i32>,
    #[serde(default)]
    tracing: Option<String>,
}

impl EdgeFunctionProperties {
    fn code(&self) -> Result<CodeLocation, ProvisionError> {
        CodeLocation::parse_uri(&self.code_uri)
            .ok_or_else(|| ProvisionError::invalid(format!("Invalid CodeUri '{}'", self.code_uri)))
    }

    fn description(&self) -> String {
        self.description.clone().unwrap_or_default()
    }

    fn memory_size(&self) -> i32 {
        self.memory_size.unwrap_or(DEFAULT_MEMORY_SIZE)
    }

    fn timeout(&self) -> i32 {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    fn tracing_mode(&self) -> String {
        self.tracing
            .clone()
            .filter(|mode| !mode.is_empty())
            .unwrap_or_else(|| DEFAULT_TRACING.to_string())
    }

    fn to_spec(&self) -> Result<FunctionSpec, ProvisionError> {
        Ok(FunctionSpec {
            name: self.function_name.clone(),
            runtime: self.runtime.clone(),
            role: self.role.clone(),
            handler: self.handler.clone(),
            code: self.code()?,
            description: self.description(),
            timeout: self.timeout(),
            memory_size: self.memory_size(),
            publish: true,
            tracing_mode: Some(self.tracing_mode()),
            environment: std::collections::BTreeMap::new(),
            tags: crate::cloud::Tags::new(),
        })
    }

    fn to_config(&self) -> FunctionConfig {
        FunctionConfig {
            name: self.function_name.clone(),
            runtime: Some(self.runtime.clone()),
            role: Some(self.role.clone()),
            handler: Some(self.handler.clone()),
            description: Some(self.description()),
            timeout: Some(self.timeout()),
            memory_size: Some(self.memory_size()),
            tracing_mode: Some(self.tracing_mode()),
            environment: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DeletePayload {
    #[serde(default)]
    cycle: u32,
}

fn still_replicating(err: &RemoteError) -> bool {
    err.has_code("InvalidParameterValueException") && err.message_contains("replicated function")
}

/// Strips a trailing `:{version}` qualifier from a function ARN.
fn unqualified_arn(arn: &str) -> &str {
    match arn.rsplit_once(':') {
        Some((base, version)) if !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()) => base,
        _ => arn,
    }
}

fn attributes(arn: &str, version: &str, version_arn: &str) -> Map<String, Value> {
    let mut attributes = Map::new();
    attributes.insert(String::from("Arn"), Value::from(arn));
    attributes.insert(String::from("Version"), Value::from(version));
    attributes.insert(String::from("VersionArn"), Value::from(version_arn));
    attributes
}

/// Edge function provisioner.
#[derive(Debug, Clone)]
pub struct EdgeFunctionProvisioner {
    ctx: ProvisionContext,
}

impl EdgeFunctionProvisioner {
    /// Creates the provisioner.
    #[must_use]
    pub const fn new(ctx: ProvisionContext) -> Self {
        Self { ctx }
    }

    fn api(&self) -> &dyn FunctionApi {
        self.ctx.cloud.functions.as_ref()
    }
}

#[async_trait]
impl Provisioner for EdgeFunctionProvisioner {
    fn resource_type(&self) -> ResourceType {
        ResourceType::EdgeFunction
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: EdgeFunctionProperties = request.properties()?;

        let created = self
            .api()
            .create_function(EDGE_REGION, &props.to_spec()?)
            .await
            .map_err(|e| ProvisionError::failed(format!("Failed to create CDN Function: {}", e.message)))?;
        info!("Created edge function {} version {}", created.name, created.version);

        let version_arn = format!("{}:{}", created.arn, created.version);
        Ok(Provisioned::Complete(
            Outcome::success(created.name)
                .with_attributes(attributes(&created.arn, &created.version, &version_arn)),
        ))
    }

    async fn update(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: EdgeFunctionProperties = request.properties()?;

        if request.physical_resource_id.as_deref() != Some(props.function_name.as_str()) {
            info!("Edge function name changed, creating {}", props.function_name);
            return self.create(request).await;
        }

        let old: EdgeFunctionProperties = request.old_properties()?;
        let code = props.code()?;

        self.api()
            .update_configuration(EDGE_REGION, &props.to_config())
            .await
            .map_err(|e| {
                ProvisionError::failed(format!(
                    "Failed to update CDN Function configuration: {}",
                    e.message
                ))
            })?;

        let updated = match self
            .api()
            .update_code(EDGE_REGION, &old.function_name, &code, true)
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                if let Err(rollback) = self.api().update_configuration(EDGE_REGION, &old.to_config()).await {
                    warn!("Failed to roll back CDN Function configuration: {}", rollback.message);
                }
                return Err(ProvisionError::failed(format!(
                    "Failed to update CDN Function code: {}",
                    e.message
                )));
            }
        };
        info!("Updated edge function {} to version {}", updated.name, updated.version);

        // Code updates return the version-qualified ARN.
        let arn = unqualified_arn(&updated.arn);
        Ok(Provisioned::Complete(
            Outcome::success(updated.name.clone())
                .with_attributes(attributes(arn, &updated.version, &updated.arn)),
        ))
    }

    async fn delete(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let name = request.physical_id_or_sentinel();

        match self.api().delete_function(EDGE_REGION, name).await {
            Ok(()) => Ok(Provisioned::Complete(Outcome::success(name))),
            Err(e) if still_replicating(&e) => {
                info!("Edge function {name} is still replicated, will retry deletion");
                let check = PendingCheck::new(RecordType::EdgeFunctionDelete, &DeletePayload { cycle: 1 })?;
                Ok(Provisioned::Deferred(check))
            }
            Err(e) if e.is_not_found() => Ok(Provisioned::Complete(Outcome::success(name))),
            Err(e) => Err(ProvisionError::failed(format!(
                "Failed to delete CDN Function: {}",
                e.message
            ))),
        }
    }

    async fn check(
        &self,
        record: &RetryRecord,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, ProvisionError> {
        if record.record_type != RecordType::EdgeFunctionDelete {
            return Err(ProvisionError::failed(format!(
                "Unexpected check type {:?}",
                record.record_type
            )));
        }

        let DeletePayload { cycle } = record.payload()?;
        let name = record.physical_id_or_sentinel();

        if expired(record, now) {
            return Ok(CheckOutcome::Abandoned(format!(
                "Waited over one hour to delete edge function {name}, stopping attempts"
            )));
        }

        match self.api().delete_function(EDGE_REGION, name).await {
            Ok(()) => {
                info!("Deleted edge function {name}");
                Ok(CheckOutcome::Complete(Outcome::success(name)))
            }
            Err(e) if e.is_not_found() => Ok(CheckOutcome::Complete(Outcome::success(name))),
            Err(e) if still_replicating(&e) => {
                if cycle >= REPLICATED_DELETE_RETRY_CYCLES {
                    return Err(ProvisionError::failed(format!(
                        "Failed to delete edge function {name} due to replication: {}",
                        e.message
                    )));
                }
                let next = PendingCheck::new(
                    RecordType::EdgeFunctionDelete,
                    &DeletePayload { cycle: cycle + 1 },
                )?;
                Ok(CheckOutcome::Requeue(next))
            }
            Err(e) => Ok(CheckOutcome::Complete(Outcome::failed(name, e.message))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::testing::MockCloud;
    use crate::cloud::FunctionVersion;
    use crate::model::OutcomeStatus;
    use crate::resources::testing::{context, delete, request, update};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    const EDGE: &str = "Custom::EdgeFunction";
    const ARN: &str = "arn:aws:lambda:us-east-1:123456789012:function:edge";

    fn properties() -> Value {
        json!({
            "FunctionName": "edge",
            "Handler": "index.handler",
            "Role": "arn:aws:iam::123456789012:role/edge",
            "Runtime": "nodejs20.x",
            "CodeUri": "s3://bucket/path/code.zip",
            "MemorySize": "256"
        })
    }

    fn replicated() -> RemoteError {
        RemoteError::new(
            "InvalidParameterValueException",
            "Lambda was unable to delete edge because it is a replicated function.",
        )
    }

    fn record(cycle: u32) -> RetryRecord {
        serde_json::from_value(json!({
            "type": "LAMBDA_EDGE_FUNCTION_DELETE",
            "payload": { "cycle": cycle },
            "PhysicalResourceId": "edge",
            "StackId": "stack",
            "RequestId": "req",
            "LogicalResourceId": "Edge",
            "ResponseURL": "https://example.com/reply",
            "EnqueuedAt": "2024-03-01T12:00:00Z"
        }))
        .unwrap()
    }

    fn enqueued_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_unqualified_arn() {
        assert_eq!(unqualified_arn(&format!("{ARN}:7")), ARN);
        assert_eq!(unqualified_arn(ARN), ARN);
    }

    #[tokio::test]
    async fn test_create_applies_defaults() {
        let mut cloud = MockCloud::new();
        cloud
            .functions
            .expect_create_function()
            .withf(|region, spec| {
                region == EDGE_REGION
                    && spec.memory_size == 256
                    && spec.timeout == 3
                    && spec.description.is_empty()
                    && spec.tracing_mode.as_deref() == Some("PassThrough")
                    && spec.publish
                    && spec.code.bucket == "bucket"
                    && spec.code.key == "path/code.zip"
            })
            .times(1)
            .returning(|_, _| {
                Ok(FunctionVersion {
                    name: String::from("edge"),
                    arn: ARN.to_string(),
                    version: String::from("1"),
                })
            });

        let provisioner = EdgeFunctionProvisioner::new(context(cloud));
        let Provisioned::Complete(outcome) = provisioner
            .create(&request("Create", EDGE, properties()))
            .await
            .unwrap()
        else {
            panic!("expected complete outcome");
        };

        assert_eq!(outcome.physical_resource_id, "edge");
        let attributes = outcome.attributes.unwrap();
        assert_eq!(attributes["Arn"], ARN);
        assert_eq!(attributes["Version"], "1");
        assert_eq!(attributes["VersionArn"], format!("{ARN}:1"));
    }

    #[tokio::test]
    async fn test_update_rolls_back_configuration_on_code_failure() {
        let mut cloud = MockCloud::new();
        let mut seq = mockall::Sequence::new();
        cloud
            .functions
            .expect_update_configuration()
            .withf(|_, config| config.memory_size == Some(256))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        cloud
            .functions
            .expect_update_code()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Err(RemoteError::new("CodeStorageExceededException", "too big")));
        cloud
            .functions
            .expect_update_configuration()
            .withf(|_, config| config.memory_size == Some(128))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut old = properties();
        old["MemorySize"] = json!(128);

        let provisioner = EdgeFunctionProvisioner::new(context(cloud));
        let err = provisioner
            .update(&update(EDGE, "edge", old, properties()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to update CDN Function code: too big");
    }

    #[tokio::test]
    async fn test_update_reports_versioned_arn() {
        let mut cloud = MockCloud::new();
        cloud.functions.expect_update_configuration().returning(|_, _| Ok(()));
        cloud
            .functions
            .expect_update_code()
            .withf(|_, name, _, publish| name == "edge" && *publish)
            .returning(|_, _, _, _| {
                Ok(FunctionVersion {
                    name: String::from("edge"),
                    arn: format!("{ARN}:4"),
                    version: String::from("4"),
                })
            });

        let provisioner = EdgeFunctionProvisioner::new(context(cloud));
        let Provisioned::Complete(outcome) = provisioner
            .update(&update(EDGE, "edge", properties(), properties()))
            .await
            .unwrap()
        else {
            panic!("expected complete outcome");
        };

        let attributes = outcome.attributes.unwrap();
        assert_eq!(attributes["Arn"], ARN);
        assert_eq!(attributes["VersionArn"], format!("{ARN}:4"));
    }

    #[tokio::test]
    async fn test_delete_replicated_defers() {
        let mut cloud = MockCloud::new();
        cloud
            .functions
            .expect_delete_function()
            .returning(|_, _| Err(replicated()));

        let provisioner = EdgeFunctionProvisioner::new(context(cloud));
        let result = provisioner.delete(&delete(EDGE, "edge", properties())).await.unwrap();

        let Provisioned::Deferred(check) = result else {
            panic!("expected deferred check");
        };
        assert_eq!(check.record_type, RecordType::EdgeFunctionDelete);
        assert_eq!(check.payload["cycle"], 1);
    }

    #[tokio::test]
    async fn test_delete_missing_succeeds() {
        let mut cloud = MockCloud::new();
        cloud
            .functions
            .expect_delete_function()
            .returning(|_, _| Err(RemoteError::new("ResourceNotFoundException", "gone")));

        let provisioner = EdgeFunctionProvisioner::new(context(cloud));
        let result = provisioner.delete(&delete(EDGE, "edge", properties())).await.unwrap();
        assert_eq!(result, Provisioned::Complete(Outcome::success("edge")));
    }

    #[tokio::test]
    async fn test_retry_still_replicating_is_hard_failure() {
        let mut cloud = MockCloud::new();
        cloud
            .functions
            .expect_delete_function()
            .times(1)
            .returning(|_, _| Err(replicated()));

        let provisioner = EdgeFunctionProvisioner::new(context(cloud));
        assert!(provisioner.check(&record(1), enqueued_at()).await.is_err());
    }

    #[tokio::test]
    async fn test_retry_other_error_reports_failure() {
        let mut cloud = MockCloud::new();
        cloud
            .functions
            .expect_delete_function()
            .returning(|_, _| Err(RemoteError::new("AccessDeniedException", "denied")));

        let provisioner = EdgeFunctionProvisioner::new(context(cloud));
        let outcome = provisioner.check(&record(1), enqueued_at()).await.unwrap();

        let CheckOutcome::Complete(outcome) = outcome else {
            panic!("expected complete outcome");
        };
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.reason.as_deref(), Some("denied"));
    }

    #[tokio::test]
    async fn test_retry_past_wait_window_is_abandoned() {
        let provisioner = EdgeFunctionProvisioner::new(context(MockCloud::new()));
        let outcome = provisioner
            .check(&record(1), enqueued_at() + Duration::minutes(61))
            .await
            .unwrap();
        assert!(matches!(outcome, CheckOutcome::Abandoned(_)));
    }

    #[tokio::test]
    async fn test_retry_deleted_succeeds() {
        let mut cloud = MockCloud::new();
        cloud.functions.expect_delete_function().returning(|_, _| Ok(()));

        let provisioner = EdgeFunctionProvisioner::new(context(cloud));
        let outcome = provisioner.check(&record(1), enqueued_at()).await.unwrap();
        assert_eq!(outcome, CheckOutcome::Complete(Outcome::success("edge")));
    }
}
