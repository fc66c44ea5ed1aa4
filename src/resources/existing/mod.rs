//! `Custom::ExistingResource`: adopts a resource created outside the stack.
//!
//! Adapters validate the supplied identifier, optionally describe the
//! resource, and report its attributes. Nothing is ever mutated, and Delete
//! leaves the adopted resource in place.

mod adapters;

use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use super::ProvisionContext;
use crate::error::ProvisionError;
use crate::model::{Outcome, ProvisionRequest, ResourceType};
use crate::provisioner::{Provisioned, Provisioner};

/// Kinds of resource that can be adopted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExistingKind {
    Function,
    Queue,
    Topic,
    Stream,
    Table,
    Database,
    GraphDb,
    VirtualNetwork,
}

impl FromStr for ExistingKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(Self::Function),
            "queue" => Ok(Self::Queue),
            "topic" => Ok(Self::Topic),
            "stream" => Ok(Self::Stream),
            "table" => Ok(Self::Table),
            "database" => Ok(Self::Database),
            "graphdb" => Ok(Self::GraphDb),
            "virtualNetwork" => Ok(Self::VirtualNetwork),
            _ => Err(()),
        }
    }
}

/// An adopted resource: its physical id and reported attributes.
#[derive(Debug, Clone, PartialEq)]
struct Adopted {
    physical_id: String,
    attributes: Map<String, Value>,
}

impl Adopted {
    fn new(physical_id: impl Into<String>) -> Self {
        Self {
            physical_id: physical_id.into(),
            attributes: Map::new(),
        }
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Adds the attribute only when a value is present.
    fn with_some(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExistingProperties {
    #[serde(default, rename = "Type")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Returns the stack name when `stack_id` is a well-formed stack ARN
/// (`arn:aws:cloudformation:{region}:{account}:stack/{name}/{id}`).
fn stack_name(stack_id: &str) -> Option<&str> {
    let rest = stack_id.strip_prefix("arn:aws:cloudformation:")?;
    let (region, rest) = rest.split_once(':')?;
    let (account, rest) = rest.split_once(':')?;
    let (name, id) = rest.strip_prefix("stack/")?.split_once('/')?;

    let valid = !region.is_empty()
        && !account.is_empty()
        && account.bytes().all(|b| b.is_ascii_digit())
        && !name.is_empty()
        && !id.is_empty();
    valid.then_some(name)
}

/// Existing resource provisioner.
#[derive(Debug, Clone)]
pub struct ExistingResourceProvisioner {
    ctx: ProvisionContext,
}

impl ExistingResourceProvisioner {
    /// Creates the provisioner.
    #[must_use]
    pub const fn new(ctx: ProvisionContext) -> Self {
        Self { ctx }
    }

    async fn adopt(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let stack_id = &request.correlation.stack_id;
        let stack = stack_name(stack_id).ok_or_else(|| {
            ProvisionError::failed(format!(
                "Agent internal error: failed to parse CloudFormation stack ID ({stack_id})"
            ))
        })?;

        let props: ExistingProperties = request.properties()?;
        let type_name = props
            .kind
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProvisionError::invalid("Missing existing resource type"))?;
        let kind = type_name.parse::<ExistingKind>().map_err(|()| {
            ProvisionError::failed(format!(
                "Using existing resources for {type_name} types is not supported in this agent version. \
                 Please update the agent in this account to the latest version and try again."
            ))
        })?;

        let lookup = self.ctx.cloud.lookup.as_ref();
        let data = &props.data;
        let adopted = match kind {
            ExistingKind::Function => adapters::function(data)?,
            ExistingKind::Queue => adapters::queue(lookup, data).await?,
            ExistingKind::Topic => adapters::topic(data)?,
            ExistingKind::Stream => adapters::stream(data)?,
            ExistingKind::Table => adapters::table(lookup, data).await?,
            ExistingKind::Database => adapters::database(lookup, data).await?,
            ExistingKind::GraphDb => adapters::graph_db(lookup, data).await?,
            ExistingKind::VirtualNetwork => {
                adapters::virtual_network(lookup, self.ctx.home_region(), data).await?
            }
        };
        info!("Adopted existing {type_name} {} into stack {stack}", adopted.physical_id);

        Ok(Provisioned::Complete(
            Outcome::success(adopted.physical_id).with_attributes(adopted.attributes),
        ))
    }
}

#[async_trait]
impl Provisioner for ExistingResourceProvisioner {
    fn resource_type(&self) -> ResourceType {
        ResourceType::ExistingResource
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        self.adopt(request).await
    }

    async fn update(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        self.adopt(request).await
    }

    async fn delete(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        Ok(Provisioned::Complete(Outcome::success(
            request.physical_id_or_sentinel(),
        )))
    }
}
