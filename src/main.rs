//! Provision agent entrypoint.
//!
//! Serves lifecycle requests, retry record batches and build completion
//! events from the function runtime through one [`Dispatcher`].

use std::sync::Arc;

use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use provision_agent::cloud::aws::AwsCloud;
use provision_agent::config::AgentConfig;
use provision_agent::domain::DEFAULT_API_HOST;
use provision_agent::error::Result;
use provision_agent::queue::SqsRetryQueue;
use provision_agent::{
    registry, AgentError, DeferredCompletion, Dispatcher, HttpDomainApi, HttpOutcomeReporter,
    OutcomeReporter, ProvisionContext, TagCache,
};

/// Main entrypoint.
#[tokio::main]
async fn main() -> std::result::Result<(), Error> {
    init_logging();

    let dispatcher = Arc::new(build_dispatcher().await.map_err(|e| {
        error!("Failed to start agent: {e}");
        e
    })?);

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { handle(&dispatcher, event).await }
    }))
    .await
}

/// Initializes JSON logging, defaulting to `info` unless `RUST_LOG` is set.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

/// Handles one invocation.
async fn handle(dispatcher: &Dispatcher, event: LambdaEvent<Value>) -> std::result::Result<Value, Error> {
    let (payload, context) = event.into_parts();
    info!("Event {}: {payload}", context.request_id);

    let report = dispatcher.handle(payload).await?;
    Ok(serde_json::to_value(report)?)
}

/// Wires the settings, remote clients and provisioners together.
async fn build_dispatcher() -> Result<Dispatcher> {
    let config = Arc::new(AgentConfig::from_env()?);
    info!(
        "Starting agent {} in {} for account {}",
        config.function_name, config.region, config.account_id
    );

    let aws = AwsCloud::load(&config.region).await;
    let sqs = aws_sdk_sqs::Client::new(aws.sdk_config());
    let cloud = aws.into_cloud();

    let tags = TagCache::new(Arc::clone(&cloud.tags));

    let host = config.provision_api_host.as_deref().unwrap_or(DEFAULT_API_HOST);
    let external_id = config.external_id.clone().unwrap_or_else(|| {
        warn!("No external id configured; domain requests will be rejected");
        String::new()
    });
    let domains = HttpDomainApi::new(host, external_id)
        .map_err(|e| AgentError::internal(e.describe()))?;

    let reporter: Arc<dyn OutcomeReporter> = Arc::new(HttpOutcomeReporter::new()?);
    let queue = SqsRetryQueue::new(sqs, config.require_check_queue_url()?);
    let deferred = DeferredCompletion::new(Arc::new(queue), Arc::clone(&reporter));

    let ctx = ProvisionContext::new(Arc::clone(&config), cloud, tags, Arc::new(domains));
    let registry = registry(&ctx);
    info!("Registered {} resource types", registry.len());

    Ok(Dispatcher::new(registry, deferred, reporter, config.region.clone()))
}
