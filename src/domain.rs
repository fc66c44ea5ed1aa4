//! Client for the account API that manages stacks subdomains.
//!
//! Requests are signed with HMAC-SHA256 over the serialized request, keyed
//! by `"{external_id}:{timestamp}"`, and carry the base64 digest next to the
//! request they sign.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use tracing::{debug, info};

use crate::error::RemoteError;

/// Default host of the account API.
pub const DEFAULT_API_HOST: &str = "api.agent-stacks.io";

/// Parent domain of stacks subdomains.
pub const STACKS_DOMAIN: &str = "agent-stacks.io";

/// Path of the provisioning endpoint.
const PROVISION_PATH: &str = "/account/awsprovision";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

type HmacSha256 = Hmac<Sha256>;

/// Requested domain action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DomainAction {
    /// Register a subdomain.
    Create,
    /// Change a subdomain.
    Update,
    /// Release a subdomain.
    Delete,
}

/// Signed part of a provisioning call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainRequest {
    /// Account requesting the domain.
    pub aws_account_id: String,
    /// Requested action.
    pub action: DomainAction,
    /// Resource type of the originating request.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Previous properties (updates only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_properties: Option<Map<String, Value>>,
    /// Desired properties.
    pub properties: Map<String, Value>,
    /// Milliseconds since the epoch; part of the signing key.
    pub timestamp: i64,
}

/// Subdomain management.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DomainApi: Send + Sync {
    /// Submits a signed provisioning request.
    async fn submit(&self, request: &DomainRequest) -> Result<(), RemoteError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// HTTP client for the account API.
#[derive(Debug, Clone)]
pub struct HttpDomainApi {
    client: Client,
    base_url: String,
    external_id: String,
}

impl HttpDomainApi {
    /// Creates a client for `https://{host}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(host: &str, external_id: impl Into<String>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| RemoteError::new("ClientError", format!("Failed to create HTTP client: {e}")))?;

        Ok(Self::with_base_url(client, format!("https://{host}"), external_id))
    }

    /// Creates a client for an explicit base URL.
    #[must_use]
    pub fn with_base_url(
        client: Client,
        base_url: impl Into<String>,
        external_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            external_id: external_id.into(),
        }
    }

    /// Computes the base64 HMAC-SHA256 digest of a serialized request.
    ///
    /// # Errors
    ///
    /// Returns an error if the signing key is rejected.
    pub fn digest(&self, payload: &str, timestamp: i64) -> Result<String, RemoteError> {
        let key = format!("{}:{timestamp}", self.external_id);
        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|e| RemoteError::new("SigningError", e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl DomainApi for HttpDomainApi {
    async fn submit(&self, request: &DomainRequest) -> Result<(), RemoteError> {
        let signed = serde_json::to_string(request)
            .map_err(|e| RemoteError::new("SerializationError", e.to_string()))?;
        let digest = serde_json::to_string(&self.digest(&signed, request.timestamp)?)
            .map_err(|e| RemoteError::new("SerializationError", e.to_string()))?;
        let body = format!(r#"{{"request":{signed},"digest":{digest}}}"#);

        let url = format!("{}{PROVISION_PATH}", self.base_url);
        debug!("Sending POST request to {url} with payload {body}");

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                RemoteError::new("NetworkError", format!("Error while sending request: {e}"))
            })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            info!("{:?} accepted for {}", request.action, request.resource_type);
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.message)
            .map_or_else(
                || format!("Bad response status ({}), failed to parse error message.", status.as_u16()),
                |message| format!("{message}."),
            );

        Err(RemoteError::new(status.as_u16().to_string(), message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn request() -> DomainRequest {
        let properties = json!({ "SubdomainName": "shop" });
        DomainRequest {
            aws_account_id: String::from("123456789012"),
            action: DomainAction::Create,
            resource_type: String::from("Custom::StacksDomain"),
            old_properties: None,
            properties: properties.as_object().cloned().unwrap(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(request()).unwrap();
        assert_eq!(body["awsAccountId"], "123456789012");
        assert_eq!(body["action"], "CREATE");
        assert_eq!(body["type"], "Custom::StacksDomain");
        assert!(body.get("oldProperties").is_none());
    }

    #[test]
    fn test_digest_depends_on_timestamp() {
        let api = HttpDomainApi::with_base_url(Client::new(), "http://localhost", "secret");
        let first = api.digest("payload", 1).unwrap();
        let second = api.digest("payload", 2).unwrap();

        assert_ne!(first, second);
        assert_eq!(BASE64.decode(&first).unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_submit_signs_request() {
        let server = MockServer::start().await;
        let api = HttpDomainApi::with_base_url(Client::new(), server.uri(), "secret");
        let signed = serde_json::to_string(&request()).unwrap();
        let expected = api.digest(&signed, request().timestamp).unwrap();

        Mock::given(method("POST"))
            .and(path("/account/awsprovision"))
            .and(move |req: &Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap_or_default();
                body["digest"] == expected.as_str() && body["request"]["action"] == "CREATE"
            })
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        api.submit(&request()).await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_surfaces_api_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "message": "Subdomain taken" })))
            .mount(&server)
            .await;

        let api = HttpDomainApi::with_base_url(Client::new(), server.uri(), "secret");
        let err = api.submit(&request()).await.unwrap_err();

        assert_eq!(err.message, "Subdomain taken.");
        assert_eq!(err.code, "409");
    }

    #[tokio::test]
    async fn test_submit_unparseable_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("<html>"))
            .mount(&server)
            .await;

        let api = HttpDomainApi::with_base_url(Client::new(), server.uri(), "secret");
        let err = api.submit(&request()).await.unwrap_err();

        assert!(err.message.starts_with("Bad response status (500)"));
    }
}
