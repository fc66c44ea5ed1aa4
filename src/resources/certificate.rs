//! `Custom::UsEast1SSLCertificate`: a certificate in the edge region.
//!
//! Issuance waits for out-of-band domain validation and deletion waits for
//! the certificate to be released by its CDN distribution, so both steps
//! finish through deferred checks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{tag_list, ProvisionContext};
use crate::cloud::{CertificateApi, CertificateRequest, DomainValidation, Tags};
use crate::error::ProvisionError;
use crate::model::{Outcome, PendingCheck, ProvisionRequest, RecordType, ResourceType, RetryRecord};
use crate::provisioner::deferred::expired;
use crate::provisioner::{CheckOutcome, Provisioned, Provisioner};

const STATUS_ISSUED: &str = "ISSUED";
const STATUS_PENDING_VALIDATION: &str = "PENDING_VALIDATION";
const STATUS_VALIDATION_TIMED_OUT: &str = "VALIDATION_TIMED_OUT";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CertificateProperties {
    domain_name: String,
    #[serde(default)]
    domain_validation_options: Vec<ValidationOption>,
    #[serde(default, deserialize_with = "tag_list")]
    tags: Tags,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ValidationOption {
    domain_name: String,
    validation_domain: String,
}

impl CertificateProperties {
    fn validation_domain(&self) -> Option<&str> {
        self.domain_validation_options
            .first()
            .map(|option| option.validation_domain.as_str())
    }

    fn to_request(&self) -> CertificateRequest {
        CertificateRequest {
            domain_name: self.domain_name.clone(),
            validation: self
                .domain_validation_options
                .iter()
                .map(|option| DomainValidation {
                    domain_name: option.domain_name.clone(),
                    validation_domain: option.validation_domain.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CertificatePayload {
    cert_arn: String,
}

/// Certificate provisioner.
#[derive(Debug, Clone)]
pub struct CertificateProvisioner {
    ctx: ProvisionContext,
}

impl CertificateProvisioner {
    /// Creates the provisioner.
    #[must_use]
    pub const fn new(ctx: ProvisionContext) -> Self {
        Self { ctx }
    }

    fn api(&self) -> &dyn CertificateApi {
        self.ctx.cloud.certificates.as_ref()
    }

    async fn delete_quietly(&self, arn: &str) {
        if let Err(e) = self.api().delete_certificate(arn).await {
            warn!("Failed to clean up certificate {arn}: {}", e.describe());
        }
    }

    async fn check_creation(
        &self,
        record: &RetryRecord,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, ProvisionError> {
        let CertificatePayload { cert_arn } = record.payload()?;

        if expired(record, now) {
            self.delete_quietly(&cert_arn).await;
            return Ok(CheckOutcome::Abandoned(format!(
                "Waited over one hour for certificate {cert_arn} to validate, deleted it"
            )));
        }

        let status = match self.api().certificate_status(&cert_arn).await {
            Ok(status) => status,
            Err(e) => {
                error!("Failed to query status of new certificate {cert_arn}: {}", e.describe());
                return Ok(CheckOutcome::Complete(Outcome::failed(
                    cert_arn,
                    format!("Failed to query status of new certificate: {}", e.describe()),
                )));
            }
        };

        match status.as_str() {
            STATUS_ISSUED => {
                info!("Successfully provisioned certificate {cert_arn}");
                Ok(CheckOutcome::Complete(Outcome::success(cert_arn)))
            }
            STATUS_PENDING_VALIDATION => Ok(CheckOutcome::Pending(format!(
                "Still awaiting validation for certificate {cert_arn}"
            ))),
            STATUS_VALIDATION_TIMED_OUT => {
                warn!("Validation timed out for certificate {cert_arn}");
                Ok(CheckOutcome::Complete(Outcome::failed(
                    cert_arn,
                    "Certificate validation timed out",
                )))
            }
            other => {
                warn!("Certificate {cert_arn} is in invalid state {other}");
                self.delete_quietly(&cert_arn).await;
                Ok(CheckOutcome::Complete(Outcome::failed(
                    cert_arn,
                    format!("Certificate created in invalid state: {other}"),
                )))
            }
        }
    }

    async fn check_deletion(
        &self,
        record: &RetryRecord,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, ProvisionError> {
        let CertificatePayload { cert_arn } = record.payload()?;

        if expired(record, now) {
            return Ok(CheckOutcome::Abandoned(format!(
                "Waited over one hour to delete certificate {cert_arn}, stopping attempts"
            )));
        }

        match self.api().delete_certificate(&cert_arn).await {
            Ok(()) => {
                info!("Successfully deleted certificate {cert_arn}");
                Ok(CheckOutcome::Complete(Outcome::success(cert_arn)))
            }
            Err(e) if e.is_not_found() => {
                info!("Certificate {cert_arn} already deleted");
                Ok(CheckOutcome::Complete(Outcome::success(cert_arn)))
            }
            Err(e) if e.is_in_use() => Ok(CheckOutcome::Pending(format!(
                "Certificate {cert_arn} is still in use, will retry"
            ))),
            Err(e) => {
                error!("Failed to delete certificate {cert_arn}: {}", e.describe());
                Ok(CheckOutcome::Complete(Outcome::failed(
                    cert_arn,
                    format!("Failed to delete certificate: {}", e.describe()),
                )))
            }
        }
    }
}

#[async_trait]
impl Provisioner for CertificateProvisioner {
    fn resource_type(&self) -> ResourceType {
        ResourceType::UsEast1Certificate
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: CertificateProperties = request.properties()?;

        let arn = self
            .api()
            .request_certificate(&props.to_request())
            .await
            .map_err(|e| ProvisionError::remote("Failed to request certificate", e))?;
        info!("Requested certificate {arn} for {}", props.domain_name);

        if !props.tags.is_empty() {
            if let Err(e) = self.api().add_tags(&arn, &props.tags).await {
                error!("Failed to add tags to certificate {arn}: {}", e.describe());
                self.delete_quietly(&arn).await;
                return Err(ProvisionError::failed(format!(
                    "Failed to create certificate due to failure to add tags: {}",
                    e.describe()
                )));
            }
        }

        let check = PendingCheck::new(RecordType::CertificateCreate, &CertificatePayload { cert_arn: arn })?;
        Ok(Provisioned::Deferred(check))
    }

    async fn update(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let props: CertificateProperties = request.properties()?;
        let old: CertificateProperties = request.old_properties()?;

        if props.domain_name != old.domain_name || props.validation_domain() != old.validation_domain() {
            info!("Certificate domain or validation domain changed, requesting a new certificate");
            return self.create(request).await;
        }

        let arn = request.physical_id()?;

        if !old.tags.is_empty() {
            self.api()
                .remove_tags(arn, &old.tags)
                .await
                .map_err(|e| ProvisionError::remote("Failed to remove certificate tags", e))?;
        }

        if !props.tags.is_empty() {
            self.api()
                .add_tags(arn, &props.tags)
                .await
                .map_err(|e| ProvisionError::remote("Failed to add certificate tags", e))?;
        }

        Ok(Provisioned::Complete(Outcome::success(arn)))
    }

    async fn delete(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let arn = request.physical_id_or_sentinel();

        match self.api().delete_certificate(arn).await {
            Ok(()) => Ok(Provisioned::Complete(Outcome::success(arn))),
            Err(e) if e.is_not_found() => {
                info!("Certificate to be deleted not found ({arn}), ignoring error");
                Ok(Provisioned::Complete(Outcome::success(arn)))
            }
            Err(e) if e.has_code("ValidationException") => {
                info!("Failed to delete invalid certificate ({arn}), ignoring error");
                Ok(Provisioned::Complete(Outcome::success(arn)))
            }
            Err(e) if e.is_in_use() => {
                info!("Certificate {arn} is still in use, will wait to delete it");
                let payload = CertificatePayload {
                    cert_arn: arn.to_string(),
                };
                Ok(Provisioned::Deferred(PendingCheck::new(
                    RecordType::CertificateDelete,
                    &payload,
                )?))
            }
            Err(e) => Err(ProvisionError::failed(format!(
                "Failed to delete ACM certificate {arn}: {}",
                e.message
            ))),
        }
    }

    async fn check(
        &self,
        record: &RetryRecord,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, ProvisionError> {
        match record.record_type {
            RecordType::CertificateCreate => self.check_creation(record, now).await,
            RecordType::CertificateDelete => self.check_deletion(record, now).await,
            other => Err(ProvisionError::failed(format!(
                "Unexpected provision check record type {other:?} for {}",
                self.resource_type()
            ))),
        }
    }
}
