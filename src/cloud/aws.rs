//! AWS SDK implementation of the capability traits.
//!
//! One shared SDK configuration is loaded at startup; regional clients are
//! derived from it per call. Service errors are mapped to [`RemoteError`]
//! through their error metadata so provisioners can match on codes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_lambda::error::{DisplayErrorContext, ProvideErrorMetadata};
use tracing::debug;

use super::{
    BuildApi, CertificateApi, CertificateRequest, Cloud, CodeLocation, DatabaseEndpoint, EventApi,
    FunctionApi, FunctionConfig, FunctionSpec, FunctionVersion, GraphCluster, LookupApi,
    PlatformApi, ProjectSpec, RemoteResult, RuleSpec, RuleTarget, TagApi, TagTarget, Tags,
    EDGE_REGION,
};
use crate::error::RemoteError;

/// Maps an SDK error to its service code and message.
fn remote<E>(error: E) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let code = error.code().unwrap_or("Unknown").to_string();
    let message = error
        .message()
        .map_or_else(|| DisplayErrorContext(&error).to_string(), str::to_string);
    RemoteError::new(code, message)
}

/// Maps a request builder error.
fn invalid_request(error: impl std::fmt::Display) -> RemoteError {
    RemoteError::new("InvalidRequest", error.to_string())
}

fn not_found(what: &str, id: &str) -> RemoteError {
    RemoteError::new("ResourceNotFoundException", format!("{what} {id} not found"))
}

fn hash_map(map: &BTreeMap<String, String>) -> HashMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// SDK-backed capabilities for every region of one account.
#[derive(Clone)]
pub struct AwsCloud {
    config: SdkConfig,
    home_region: String,
}

impl std::fmt::Debug for AwsCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCloud")
            .field("home_region", &self.home_region)
            .finish_non_exhaustive()
    }
}

impl AwsCloud {
    /// Loads the SDK configuration for the home region.
    pub async fn load(home_region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(home_region.to_string()))
            .load()
            .await;
        Self::from_config(config, home_region)
    }

    /// Wraps an already loaded SDK configuration.
    #[must_use]
    pub fn from_config(config: SdkConfig, home_region: impl Into<String>) -> Self {
        Self {
            config,
            home_region: home_region.into(),
        }
    }

    /// Returns the shared SDK configuration.
    #[must_use]
    pub const fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    /// Exposes every capability through one shared instance.
    #[must_use]
    pub fn into_cloud(self) -> Cloud {
        let shared = Arc::new(self);
        Cloud {
            certificates: shared.clone(),
            functions: shared.clone(),
            builds: shared.clone(),
            platform: shared.clone(),
            events: shared.clone(),
            lookup: shared.clone(),
            tags: shared,
        }
    }

    fn region(region: &str) -> Region {
        Region::new(region.to_string())
    }

    fn acm(&self) -> aws_sdk_acm::Client {
        let config = aws_sdk_acm::config::Builder::from(&self.config)
            .region(Self::region(EDGE_REGION))
            .build();
        aws_sdk_acm::Client::from_conf(config)
    }

    fn lambda(&self, region: &str) -> aws_sdk_lambda::Client {
        let config = aws_sdk_lambda::config::Builder::from(&self.config)
            .region(Self::region(region))
            .build();
        aws_sdk_lambda::Client::from_conf(config)
    }

    fn codebuild(&self, region: &str) -> aws_sdk_codebuild::Client {
        let config = aws_sdk_codebuild::config::Builder::from(&self.config)
            .region(Self::region(region))
            .build();
        aws_sdk_codebuild::Client::from_conf(config)
    }

    fn ecs(&self, region: &str) -> aws_sdk_ecs::Client {
        let config = aws_sdk_ecs::config::Builder::from(&self.config)
            .region(Self::region(region))
            .build();
        aws_sdk_ecs::Client::from_conf(config)
    }

    fn ec2(&self, region: &str) -> aws_sdk_ec2::Client {
        let config = aws_sdk_ec2::config::Builder::from(&self.config)
            .region(Self::region(region))
            .build();
        aws_sdk_ec2::Client::from_conf(config)
    }

    fn iam(&self) -> aws_sdk_iam::Client {
        aws_sdk_iam::Client::new(&self.config)
    }

    fn eventbridge(&self, region: &str) -> aws_sdk_eventbridge::Client {
        let config = aws_sdk_eventbridge::config::Builder::from(&self.config)
            .region(Self::region(region))
            .build();
        aws_sdk_eventbridge::Client::from_conf(config)
    }

    fn sns(&self, region: &str) -> aws_sdk_sns::Client {
        let config = aws_sdk_sns::config::Builder::from(&self.config)
            .region(Self::region(region))
            .build();
        aws_sdk_sns::Client::from_conf(config)
    }

    fn sqs(&self, region: &str) -> aws_sdk_sqs::Client {
        let config = aws_sdk_sqs::config::Builder::from(&self.config)
            .region(Self::region(region))
            .build();
        aws_sdk_sqs::Client::from_conf(config)
    }

    fn dynamodb(&self, region: &str) -> aws_sdk_dynamodb::Client {
        let config = aws_sdk_dynamodb::config::Builder::from(&self.config)
            .region(Self::region(region))
            .build();
        aws_sdk_dynamodb::Client::from_conf(config)
    }

    fn rds(&self, region: &str) -> aws_sdk_rds::Client {
        let config = aws_sdk_rds::config::Builder::from(&self.config)
            .region(Self::region(region))
            .build();
        aws_sdk_rds::Client::from_conf(config)
    }

    fn neptune(&self, region: &str) -> aws_sdk_neptune::Client {
        let config = aws_sdk_neptune::config::Builder::from(&self.config)
            .region(Self::region(region))
            .build();
        aws_sdk_neptune::Client::from_conf(config)
    }

    fn acm_tags(tags: &Tags) -> RemoteResult<Vec<aws_sdk_acm::types::Tag>> {
        tags.iter()
            .map(|(key, value)| {
                aws_sdk_acm::types::Tag::builder()
                    .key(key)
                    .value(value)
                    .build()
                    .map_err(invalid_request)
            })
            .collect()
    }

    fn project_parts(
        spec: &ProjectSpec,
    ) -> RemoteResult<(
        aws_sdk_codebuild::types::ProjectSource,
        aws_sdk_codebuild::types::ProjectArtifacts,
        aws_sdk_codebuild::types::ProjectEnvironment,
        Vec<aws_sdk_codebuild::types::Tag>,
    )> {
        use aws_sdk_codebuild::types::{
            ArtifactsType, ComputeType, EnvironmentType, ProjectArtifacts, ProjectEnvironment,
            ProjectSource, SourceType, Tag,
        };

        let source = ProjectSource::builder()
            .r#type(SourceType::NoSource)
            .buildspec(&spec.buildspec)
            .build()
            .map_err(invalid_request)?;
        let artifacts = ProjectArtifacts::builder()
            .r#type(ArtifactsType::NoArtifacts)
            .build()
            .map_err(invalid_request)?;
        let environment = ProjectEnvironment::builder()
            .r#type(EnvironmentType::from(spec.environment_type.as_str()))
            .image(&spec.image)
            .compute_type(ComputeType::from(spec.compute_type.as_str()))
            .build()
            .map_err(invalid_request)?;
        let tags = spec
            .tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect();

        Ok((source, artifacts, environment, tags))
    }
}

#[async_trait]
impl CertificateApi for AwsCloud {
    async fn request_certificate(&self, request: &CertificateRequest) -> RemoteResult<String> {
        use aws_sdk_acm::types::DomainValidationOption;

        let options = request
            .validation
            .iter()
            .map(|v| {
                DomainValidationOption::builder()
                    .domain_name(&v.domain_name)
                    .validation_domain(&v.validation_domain)
                    .build()
                    .map_err(invalid_request)
            })
            .collect::<RemoteResult<Vec<_>>>()?;

        let output = self
            .acm()
            .request_certificate()
            .domain_name(&request.domain_name)
            .set_domain_validation_options((!options.is_empty()).then_some(options))
            .send()
            .await
            .map_err(remote)?;

        output
            .certificate_arn()
            .map(str::to_string)
            .ok_or_else(|| RemoteError::new("InvalidResponse", "No certificate ARN returned"))
    }

    async fn add_tags(&self, arn: &str, tags: &Tags) -> RemoteResult<()> {
        self.acm()
            .add_tags_to_certificate()
            .certificate_arn(arn)
            .set_tags(Some(Self::acm_tags(tags)?))
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn remove_tags(&self, arn: &str, tags: &Tags) -> RemoteResult<()> {
        self.acm()
            .remove_tags_from_certificate()
            .certificate_arn(arn)
            .set_tags(Some(Self::acm_tags(tags)?))
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn delete_certificate(&self, arn: &str) -> RemoteResult<()> {
        self.acm()
            .delete_certificate()
            .certificate_arn(arn)
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn certificate_status(&self, arn: &str) -> RemoteResult<String> {
        let output = self
            .acm()
            .describe_certificate()
            .certificate_arn(arn)
            .send()
            .await
            .map_err(remote)?;

        output
            .certificate()
            .and_then(|c| c.status())
            .map(|status| status.as_str().to_string())
            .ok_or_else(|| not_found("Certificate", arn))
    }
}

#[async_trait]
impl FunctionApi for AwsCloud {
    async fn create_function(&self, region: &str, spec: &FunctionSpec) -> RemoteResult<FunctionVersion> {
        use aws_sdk_lambda::types::{Environment, FunctionCode, Runtime, TracingConfig, TracingMode};

        let code = FunctionCode::builder()
            .s3_bucket(&spec.code.bucket)
            .s3_key(&spec.code.key)
            .build();
        let tracing_config = spec
            .tracing_mode
            .as_deref()
            .map(|mode| TracingConfig::builder().mode(TracingMode::from(mode)).build());
        let environment = (!spec.environment.is_empty()).then(|| {
            Environment::builder()
                .set_variables(Some(hash_map(&spec.environment)))
                .build()
        });

        let output = self
            .lambda(region)
            .create_function()
            .function_name(&spec.name)
            .runtime(Runtime::from(spec.runtime.as_str()))
            .role(&spec.role)
            .handler(&spec.handler)
            .code(code)
            .description(&spec.description)
            .timeout(spec.timeout)
            .memory_size(spec.memory_size)
            .publish(spec.publish)
            .set_tracing_config(tracing_config)
            .set_environment(environment)
            .set_tags((!spec.tags.is_empty()).then(|| hash_map(&spec.tags)))
            .send()
            .await
            .map_err(remote)?;

        debug!("Created function {} in {region}", spec.name);
        Ok(FunctionVersion {
            name: output.function_name().unwrap_or(&spec.name).to_string(),
            arn: output.function_arn().unwrap_or_default().to_string(),
            version: output.version().unwrap_or_default().to_string(),
        })
    }

    async fn update_configuration(&self, region: &str, config: &FunctionConfig) -> RemoteResult<()> {
        use aws_sdk_lambda::types::{Environment, Runtime, TracingConfig, TracingMode};

        self.lambda(region)
            .update_function_configuration()
            .function_name(&config.name)
            .set_runtime(config.runtime.as_deref().map(Runtime::from))
            .set_role(config.role.clone())
            .set_handler(config.handler.clone())
            .set_description(config.description.clone())
            .set_timeout(config.timeout)
            .set_memory_size(config.memory_size)
            .set_tracing_config(
                config
                    .tracing_mode
                    .as_deref()
                    .map(|mode| TracingConfig::builder().mode(TracingMode::from(mode)).build()),
            )
            .set_environment(config.environment.as_ref().map(|vars| {
                Environment::builder()
                    .set_variables(Some(hash_map(vars)))
                    .build()
            }))
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn update_code(
        &self,
        region: &str,
        name: &str,
        code: &CodeLocation,
        publish: bool,
    ) -> RemoteResult<FunctionVersion> {
        let output = self
            .lambda(region)
            .update_function_code()
            .function_name(name)
            .s3_bucket(&code.bucket)
            .s3_key(&code.key)
            .publish(publish)
            .send()
            .await
            .map_err(remote)?;

        Ok(FunctionVersion {
            name: output.function_name().unwrap_or(name).to_string(),
            arn: output.function_arn().unwrap_or_default().to_string(),
            version: output.version().unwrap_or_default().to_string(),
        })
    }

    async fn delete_function(&self, region: &str, name: &str) -> RemoteResult<()> {
        self.lambda(region)
            .delete_function()
            .function_name(name)
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn tag_function(&self, region: &str, arn: &str, tags: &Tags) -> RemoteResult<()> {
        self.lambda(region)
            .tag_resource()
            .resource(arn)
            .set_tags(Some(hash_map(tags)))
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn untag_function(&self, region: &str, arn: &str, keys: &[String]) -> RemoteResult<()> {
        self.lambda(region)
            .untag_resource()
            .resource(arn)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }
}

#[async_trait]
impl BuildApi for AwsCloud {
    async fn create_project(&self, region: &str, spec: &ProjectSpec) -> RemoteResult<()> {
        let (source, artifacts, environment, tags) = Self::project_parts(spec)?;
        self.codebuild(region)
            .create_project()
            .name(&spec.name)
            .source(source)
            .artifacts(artifacts)
            .environment(environment)
            .service_role(&spec.service_role)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn update_project(&self, region: &str, spec: &ProjectSpec) -> RemoteResult<()> {
        let (source, artifacts, environment, tags) = Self::project_parts(spec)?;
        self.codebuild(region)
            .update_project()
            .name(&spec.name)
            .source(source)
            .artifacts(artifacts)
            .environment(environment)
            .service_role(&spec.service_role)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn delete_project(&self, region: &str, name: &str) -> RemoteResult<()> {
        self.codebuild(region)
            .delete_project()
            .name(name)
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn start_build(&self, project: &str, environment: &[(String, String)]) -> RemoteResult<()> {
        use aws_sdk_codebuild::types::{EnvironmentVariable, EnvironmentVariableType};

        let overrides = environment
            .iter()
            .map(|(name, value)| {
                EnvironmentVariable::builder()
                    .name(name)
                    .value(value)
                    .r#type(EnvironmentVariableType::Plaintext)
                    .build()
                    .map_err(invalid_request)
            })
            .collect::<RemoteResult<Vec<_>>>()?;

        self.codebuild(&self.home_region)
            .start_build()
            .project_name(project)
            .set_environment_variables_override(Some(overrides))
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }
}

#[async_trait]
impl PlatformApi for AwsCloud {
    async fn cluster_status(&self, region: &str, name: &str) -> RemoteResult<Option<String>> {
        let output = self
            .ecs(region)
            .describe_clusters()
            .clusters(name)
            .send()
            .await
            .map_err(remote)?;

        Ok(output
            .clusters()
            .first()
            .and_then(|cluster| cluster.status())
            .map(str::to_string))
    }

    async fn create_cluster(&self, region: &str, name: &str) -> RemoteResult<()> {
        self.ecs(region)
            .create_cluster()
            .cluster_name(name)
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn create_default_vpc(&self, region: &str) -> RemoteResult<()> {
        self.ec2(region)
            .create_default_vpc()
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn create_service_linked_role(&self, service: &str) -> RemoteResult<()> {
        self.iam()
            .create_service_linked_role()
            .aws_service_name(service)
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }
}

#[async_trait]
impl EventApi for AwsCloud {
    async fn put_rule(&self, region: &str, rule: &RuleSpec) -> RemoteResult<()> {
        use aws_sdk_eventbridge::types::Tag;

        let tags = rule
            .tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build().map_err(invalid_request))
            .collect::<RemoteResult<Vec<_>>>()?;

        self.eventbridge(region)
            .put_rule()
            .name(&rule.name)
            .description(&rule.description)
            .event_bus_name(&rule.event_bus)
            .event_pattern(&rule.event_pattern)
            .set_tags((!tags.is_empty()).then_some(tags))
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn put_targets(&self, region: &str, rule: &str, targets: &[RuleTarget]) -> RemoteResult<()> {
        use aws_sdk_eventbridge::types::Target;

        let targets = targets
            .iter()
            .map(|t| Target::builder().id(&t.id).arn(&t.arn).build().map_err(invalid_request))
            .collect::<RemoteResult<Vec<_>>>()?;

        let output = self
            .eventbridge(region)
            .put_targets()
            .rule(rule)
            .set_targets(Some(targets))
            .send()
            .await
            .map_err(remote)?;

        if output.failed_entry_count() > 0 {
            let message = output
                .failed_entries()
                .iter()
                .filter_map(|entry| entry.error_message())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RemoteError::new("FailedEntries", message));
        }
        Ok(())
    }

    async fn remove_targets(&self, region: &str, rule: &str, ids: &[String]) -> RemoteResult<()> {
        self.eventbridge(region)
            .remove_targets()
            .rule(rule)
            .set_ids(Some(ids.to_vec()))
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn delete_rule(&self, region: &str, name: &str) -> RemoteResult<()> {
        self.eventbridge(region)
            .delete_rule()
            .name(name)
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn delete_topic(&self, region: &str, arn: &str) -> RemoteResult<()> {
        self.sns(region)
            .delete_topic()
            .topic_arn(arn)
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }
}

#[async_trait]
impl LookupApi for AwsCloud {
    async fn queue_url(&self, region: &str, name: &str, owner: &str) -> RemoteResult<String> {
        let output = self
            .sqs(region)
            .get_queue_url()
            .queue_name(name)
            .queue_owner_aws_account_id(owner)
            .send()
            .await
            .map_err(remote)?;

        output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| not_found("Queue", name))
    }

    async fn table_stream(&self, region: &str, table: &str) -> RemoteResult<Option<String>> {
        let output = self
            .dynamodb(region)
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(remote)?;

        let description = output.table().ok_or_else(|| not_found("Table", table))?;
        let enabled = description
            .stream_specification()
            .is_some_and(|spec| spec.stream_enabled());
        Ok(enabled
            .then(|| description.latest_stream_arn().map(str::to_string))
            .flatten())
    }

    async fn database_instance(&self, region: &str, id: &str) -> RemoteResult<DatabaseEndpoint> {
        let output = self
            .rds(region)
            .describe_db_instances()
            .db_instance_identifier(id)
            .send()
            .await
            .map_err(remote)?;

        let instance = output
            .db_instances()
            .first()
            .ok_or_else(|| not_found("Database instance", id))?;
        let endpoint = instance.endpoint();
        Ok(DatabaseEndpoint {
            address: endpoint.and_then(|e| e.address()).map(str::to_string),
            port: endpoint.and_then(|e| e.port()),
            read_address: None,
        })
    }

    async fn database_cluster(&self, region: &str, id: &str) -> RemoteResult<DatabaseEndpoint> {
        let output = self
            .rds(region)
            .describe_db_clusters()
            .db_cluster_identifier(id)
            .send()
            .await
            .map_err(remote)?;

        let cluster = output
            .db_clusters()
            .first()
            .ok_or_else(|| not_found("Database cluster", id))?;
        Ok(DatabaseEndpoint {
            address: cluster.endpoint().map(str::to_string),
            port: cluster.port(),
            read_address: cluster.reader_endpoint().map(str::to_string),
        })
    }

    async fn graph_cluster(&self, region: &str, id: &str) -> RemoteResult<GraphCluster> {
        let output = self
            .neptune(region)
            .describe_db_clusters()
            .db_cluster_identifier(id)
            .send()
            .await
            .map_err(remote)?;

        let cluster = output
            .db_clusters()
            .first()
            .ok_or_else(|| not_found("Neptune cluster", id))?;
        Ok(GraphCluster {
            resource_id: cluster.db_cluster_resource_id().map(str::to_string),
            endpoint: cluster.endpoint().map(str::to_string),
            port: cluster.port(),
            read_endpoint: cluster.reader_endpoint().map(str::to_string),
        })
    }

    async fn default_security_group(&self, region: &str, vpc_id: &str) -> RemoteResult<Option<String>> {
        use aws_sdk_ec2::types::Filter;

        let output = self
            .ec2(region)
            .describe_security_groups()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .filters(Filter::builder().name("group-name").values("default").build())
            .send()
            .await
            .map_err(remote)?;

        Ok(output
            .security_groups()
            .first()
            .and_then(|group| group.group_id())
            .map(str::to_string))
    }
}

#[async_trait]
impl TagApi for AwsCloud {
    async fn list_tags(&self, target: &TagTarget) -> RemoteResult<Tags> {
        match target {
            TagTarget::Function { region, arn } => {
                let output = self
                    .lambda(region)
                    .list_tags()
                    .resource(arn)
                    .send()
                    .await
                    .map_err(remote)?;
                Ok(output
                    .tags()
                    .map(|tags| tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default())
            }
            TagTarget::BuildProject { region, name } => {
                let output = self
                    .codebuild(region)
                    .batch_get_projects()
                    .names(name)
                    .send()
                    .await
                    .map_err(remote)?;
                let project = output
                    .projects()
                    .first()
                    .ok_or_else(|| not_found("Build project", name))?;
                Ok(project
                    .tags()
                    .iter()
                    .filter_map(|tag| Some((tag.key()?.to_string(), tag.value().unwrap_or_default().to_string())))
                    .collect())
            }
            TagTarget::EventRule { region, arn } => {
                let output = self
                    .eventbridge(region)
                    .list_tags_for_resource()
                    .resource_arn(arn)
                    .send()
                    .await
                    .map_err(remote)?;
                Ok(output
                    .tags()
                    .iter()
                    .map(|tag| (tag.key().to_string(), tag.value().to_string()))
                    .collect())
            }
        }
    }
}
