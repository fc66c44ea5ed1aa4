use serde_json::Value;

use super::Adopted;
use crate::cloud::LookupApi;
use crate::error::ProvisionError;

/// Placeholder secret reported for adopted databases, whose root user secret
/// cannot be determined.
const INVALID_SECRET_ARN: &str = "arn:aws:secretsmanager:us-east-1:000000000000:secret:invalid";

/// The colon-separated fields of a resource ARN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Arn<'a> {
    partition: &'a str,
    service: &'a str,
    region: &'a str,
    account: &'a str,
    resource: &'a str,
}

impl<'a> Arn<'a> {
    fn parse(value: &'a str) -> Option<Self> {
        let mut parts = value.splitn(6, ':');
        if parts.next()? != "arn" {
            return None;
        }
        let arn = Self {
            partition: parts.next()?,
            service: parts.next()?,
            region: parts.next()?,
            account: parts.next()?,
            resource: parts.next()?,
        };
        (!arn.partition.is_empty() && !arn.region.is_empty() && !arn.account.is_empty())
            .then_some(arn)
    }

    /// Parses an ARN of `service` owned by a numeric account id.
    fn of_service(value: &'a str, service: &str) -> Option<Self> {
        Self::parse(value).filter(|arn| {
            arn.service == service && arn.account.bytes().all(|b| b.is_ascii_digit())
        })
    }

    /// Parses a database ARN, returning the region, the kind (`db` or
    /// `cluster`) and the identifier.
    fn database(value: &'a str) -> Option<(&'a str, &'a str, &'a str)> {
        let arn = Self::parse(value).filter(|arn| arn.partition == "aws" && arn.service == "rds")?;
        let (kind, id) = arn.resource.split_once(':')?;
        matches!(kind, "db" | "cluster").then_some((arn.region, kind, id))
    }
}

fn arn_string<'a>(data: &'a Value, label: &str) -> Result<&'a str, ProvisionError> {
    data.as_str().ok_or_else(|| {
        ProvisionError::invalid(format!(
            "Invalid existing {label} data: data must be an AWS ARN string"
        ))
    })
}

fn not_an_arn(label: &str, arn: &str) -> ProvisionError {
    ProvisionError::invalid(format!(
        "Invalid existing {label} data: data is not a valid {label} ARN ({arn})"
    ))
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

pub(super) fn function(data: &Value) -> Result<Adopted, ProvisionError> {
    const LABEL: &str = "Lambda Function";
    let arn = arn_string(data, LABEL)?;
    let name = Arn::of_service(arn, "lambda")
        .and_then(|parsed| parsed.resource.strip_prefix("function:"))
        .and_then(non_empty)
        .ok_or_else(|| not_an_arn(LABEL, arn))?;

    Ok(Adopted::new(name).with("Arn", arn))
}

pub(super) async fn queue(lookup: &dyn LookupApi, data: &Value) -> Result<Adopted, ProvisionError> {
    const LABEL: &str = "SQS Queue";
    let arn = arn_string(data, LABEL)?;
    let parsed = Arn::of_service(arn, "sqs")
        .filter(|parsed| !parsed.resource.is_empty())
        .ok_or_else(|| not_an_arn(LABEL, arn))?;
    let name = parsed.resource;

    let url = lookup
        .queue_url(parsed.region, name, parsed.account)
        .await
        .map_err(|e| {
            ProvisionError::failed(format!(
                "Error while fetching existing SQS Queue URL for queue {name} from account {}: {}",
                parsed.account, e.message
            ))
        })?;

    Ok(Adopted::new(url).with("Arn", arn).with("QueueName", name))
}

pub(super) fn topic(data: &Value) -> Result<Adopted, ProvisionError> {
    const LABEL: &str = "SNS Topic";
    let arn = arn_string(data, LABEL)?;
    let name = Arn::of_service(arn, "sns")
        .map(|parsed| parsed.resource)
        .and_then(non_empty)
        .ok_or_else(|| not_an_arn(LABEL, arn))?;

    Ok(Adopted::new(arn).with("TopicName", name))
}

pub(super) fn stream(data: &Value) -> Result<Adopted, ProvisionError> {
    const LABEL: &str = "Kinesis Stream";
    let arn = arn_string(data, LABEL)?;
    let name = Arn::of_service(arn, "kinesis")
        .and_then(|parsed| parsed.resource.strip_prefix("stream/"))
        .and_then(non_empty)
        .ok_or_else(|| not_an_arn(LABEL, arn))?;

    Ok(Adopted::new(name).with("Arn", arn))
}

pub(super) async fn table(lookup: &dyn LookupApi, data: &Value) -> Result<Adopted, ProvisionError> {
    const LABEL: &str = "DynamoDB Table";
    let arn = arn_string(data, LABEL)?;
    let (region, name) = Arn::of_service(arn, "dynamodb")
        .and_then(|parsed| {
            let name = parsed.resource.strip_prefix("table/").and_then(non_empty)?;
            Some((parsed.region, name))
        })
        .ok_or_else(|| not_an_arn(LABEL, arn))?;

    let stream_arn = lookup.table_stream(region, name).await.map_err(|e| {
        ProvisionError::failed(format!(
            "Error while fetching existing DynamoDB Table stream specification for table {name}: {}",
            e.message
        ))
    })?;

    Ok(Adopted::new(name)
        .with("Arn", arn)
        .with_some("StreamArn", stream_arn))
}

/// Adopts a database given either its ARN or an `address:port` endpoint.
pub(super) async fn database(
    lookup: &dyn LookupApi,
    data: &Value,
) -> Result<Adopted, ProvisionError> {
    let data = data.as_str().ok_or_else(|| {
        ProvisionError::invalid("Invalid existing database data: value must be a string")
    })?;

    let adopted = match Arn::database(data) {
        Some((region, "cluster", id)) => {
            let cluster = lookup
                .database_cluster(region, id)
                .await
                .map_err(|e| ProvisionError::remote(format!("Failed to describe database cluster {id}"), e))?;
            Adopted::new(id)
                .with_some("Endpoint.Address", cluster.address)
                .with_some("Endpoint.Port", cluster.port)
                .with_some("ReadEndpoint.Address", cluster.read_address)
        }
        Some((region, _, id)) => {
            let instance = lookup
                .database_instance(region, id)
                .await
                .map_err(|e| ProvisionError::remote(format!("Failed to describe database instance {id}"), e))?;
            Adopted::new(id)
                .with_some("Endpoint.Address", instance.address)
                .with_some("Endpoint.Port", instance.port)
        }
        None => {
            let mut parts = data.split(':');
            let address = parts.next().unwrap_or(data);
            Adopted::new(data)
                .with("Endpoint.Address", address)
                .with_some("Endpoint.Port", parts.next())
        }
    };

    Ok(adopted.with("RootUserSecret", INVALID_SECRET_ARN))
}

pub(super) async fn graph_db(
    lookup: &dyn LookupApi,
    data: &Value,
) -> Result<Adopted, ProvisionError> {
    let arn = data.as_str().ok_or_else(|| {
        ProvisionError::invalid("Invalid existing database data: value must be an AWS ARN string")
    })?;
    let (region, id) = match Arn::database(arn) {
        Some((region, "cluster", id)) => (region, id),
        _ => {
            return Err(ProvisionError::invalid(format!(
                "Invalid existing Neptune data: not a valid Neptune ARN ({arn})"
            )));
        }
    };

    let cluster = lookup
        .graph_cluster(region, id)
        .await
        .map_err(|e| ProvisionError::remote(format!("Failed to describe Neptune cluster {id}"), e))?;

    Ok(Adopted::new(id)
        .with_some("ClusterId", cluster.resource_id)
        .with_some("Endpoint", cluster.endpoint)
        .with_some("Port", cluster.port)
        .with_some("ReadEndpoint", cluster.read_endpoint))
}

fn subnet_ids<'a>(network: &'a Value, field: &str) -> Result<Vec<&'a str>, ProvisionError> {
    let ids: Option<Vec<&str>> = network
        .get(field)
        .and_then(Value::as_array)
        .and_then(|ids| ids.iter().map(|id| id.as_str().and_then(non_empty)).collect());
    let ids = ids.ok_or_else(|| {
        ProvisionError::invalid(format!(
            "Invalid existing VPC data: data.{field} must be an array of subnet ID strings"
        ))
    })?;

    if ids.len() < 2 {
        return Err(ProvisionError::invalid(format!(
            "Invalid existing VPC data: data.{field} must have at least two subnet IDs"
        )));
    }
    Ok(ids)
}

/// Adopts a virtual network described by an object, or by the same object
/// serialized as a JSON string (as environment configs supply it).
pub(super) async fn virtual_network(
    lookup: &dyn LookupApi,
    region: &str,
    data: &Value,
) -> Result<Adopted, ProvisionError> {
    let parsed;
    let network = match data {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw).map_err(|_| {
                ProvisionError::invalid(
                    "Invalid existing VPC data: data from environment config is not valid JSON",
                )
            })?;
            &parsed
        }
        other => other,
    };

    if !network.is_object() {
        return Err(ProvisionError::invalid(
            "Invalid existing VPC data: data must be an object/dictionary",
        ));
    }
    let vpc_id = network.get("VpcId").and_then(Value::as_str).ok_or_else(|| {
        ProvisionError::invalid("Invalid existing VPC data: data.VpcId must be a string")
    })?;
    let public = subnet_ids(network, "DefaultPublicSubnetIds")?;
    let private = subnet_ids(network, "DefaultPrivateSubnetIds")?;

    let security_group = lookup
        .default_security_group(region, vpc_id)
        .await
        .map_err(|e| e.message)
        .and_then(|group| {
            group.ok_or_else(|| format!("Failed to find default security group for VPC {vpc_id}"))
        })
        .map_err(|message| {
            ProvisionError::failed(format!(
                "Error while fetching existing VPC default security group for VPC {vpc_id}: {message}"
            ))
        })?;

    Ok(Adopted::new(vpc_id)
        .with("DefaultSecurityGroup", security_group)
        .with("PrivateSubnet1", private[0])
        .with("PrivateSubnet2", private[1])
        .with("PublicSubnet1", public[0])
        .with("PublicSubnet2", public[1]))
}
