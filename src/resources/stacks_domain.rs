//! `Custom::StacksDomain`: a subdomain of the stacks domain, registered
//! through the account API.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use super::ProvisionContext;
use crate::domain::{DomainAction, DomainRequest, STACKS_DOMAIN};
use crate::error::ProvisionError;
use crate::model::{Outcome, ProvisionRequest, ResourceType};
use crate::provisioner::{Provisioned, Provisioner};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainProperties {
    subdomain_name: String,
}

/// Stacks domain provisioner.
#[derive(Debug, Clone)]
pub struct StacksDomainProvisioner {
    ctx: ProvisionContext,
}

impl StacksDomainProvisioner {
    /// Creates the provisioner.
    #[must_use]
    pub const fn new(ctx: ProvisionContext) -> Self {
        Self { ctx }
    }

    /// Submits a signed request. `subdomain` names the domain in errors.
    async fn submit(
        &self,
        request: &ProvisionRequest,
        action: DomainAction,
        subdomain: &str,
    ) -> Result<(), ProvisionError> {
        let old_properties = match action {
            DomainAction::Update => request.old_resource_properties.clone(),
            DomainAction::Create | DomainAction::Delete => None,
        };

        let domain_request = DomainRequest {
            aws_account_id: self.ctx.account_id().to_string(),
            action,
            resource_type: request.resource_type.clone(),
            old_properties,
            properties: request.resource_properties.clone(),
            timestamp: Utc::now().timestamp_millis(),
        };

        self.ctx.domains.submit(&domain_request).await.map_err(|e| {
            let verb = match action {
                DomainAction::Create => "create",
                DomainAction::Update => "update",
                DomainAction::Delete => "delete",
            };
            ProvisionError::failed(format!(
                "Failed to {verb} {subdomain}.{STACKS_DOMAIN} domain: {}",
                e.message
            ))
        })?;

        info!("{action:?} of {subdomain}.{STACKS_DOMAIN} accepted");
        Ok(())
    }
}

#[async_trait]
impl Provisioner for StacksDomainProvisioner {
    fn resource_type(&self) -> ResourceType {
        ResourceType::StacksDomain
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: DomainProperties = request.properties()?;
        self.submit(request, DomainAction::Create, &props.subdomain_name).await?;
        Ok(Provisioned::Complete(Outcome::success(props.subdomain_name)))
    }

    async fn update(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: DomainProperties = request.properties()?;
        let old: DomainProperties = request.old_properties()?;
        self.submit(request, DomainAction::Update, &old.subdomain_name).await?;
        Ok(Provisioned::Complete(Outcome::success(props.subdomain_name)))
    }

    async fn delete(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: DomainProperties = request.properties()?;
        self.submit(request, DomainAction::Delete, &props.subdomain_name).await?;
        Ok(Provisioned::Complete(Outcome::success(props.subdomain_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::testing::MockCloud;
    use crate::domain::MockDomainApi;
    use crate::error::RemoteError;
    use crate::resources::testing::{context_with_domains, delete, request, update, ACCOUNT};
    use serde_json::json;

    const DOMAIN: &str = "Custom::StacksDomain";

    #[tokio::test]
    async fn test_create_submits_signed_request() {
        let mut domains = MockDomainApi::new();
        domains
            .expect_submit()
            .withf(|req| {
                req.action == DomainAction::Create
                    && req.aws_account_id == ACCOUNT
                    && req.resource_type == DOMAIN
                    && req.old_properties.is_none()
                    && req.properties["SubdomainName"] == "shop"
            })
            .times(1)
            .returning(|_| Ok(()));

        let provisioner = StacksDomainProvisioner::new(context_with_domains(MockCloud::new(), domains));
        let result = provisioner
            .provision(&request("Create", DOMAIN, json!({ "SubdomainName": "shop" })))
            .await
            .unwrap();

        assert_eq!(result, Provisioned::Complete(Outcome::success("shop")));
    }

    #[tokio::test]
    async fn test_update_sends_old_properties() {
        let mut domains = MockDomainApi::new();
        domains
            .expect_submit()
            .withf(|req| {
                req.action == DomainAction::Update
                    && req.old_properties.as_ref().is_some_and(|old| old["SubdomainName"] == "old")
            })
            .times(1)
            .returning(|_| Err(RemoteError::new("409", "Subdomain taken.")));

        let provisioner = StacksDomainProvisioner::new(context_with_domains(MockCloud::new(), domains));
        let err = provisioner
            .update(&update(
                DOMAIN,
                "old",
                json!({ "SubdomainName": "old" }),
                json!({ "SubdomainName": "new" }),
            ))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Failed to update old.agent-stacks.io domain: Subdomain taken."
        );
    }

    #[tokio::test]
    async fn test_delete_reports_subdomain() {
        let mut domains = MockDomainApi::new();
        domains
            .expect_submit()
            .withf(|req| req.action == DomainAction::Delete)
            .times(1)
            .returning(|_| Ok(()));

        let provisioner = StacksDomainProvisioner::new(context_with_domains(MockCloud::new(), domains));
        let result = provisioner
            .delete(&delete(DOMAIN, "shop", json!({ "SubdomainName": "shop" })))
            .await
            .unwrap();

        assert_eq!(result, Provisioned::Complete(Outcome::success("shop")));
    }
}
