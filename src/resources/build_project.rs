//! Regional build projects shared by the factory and pipeline runner
//! bootstraps.

use tracing::{debug, info};

use crate::cloud::{BuildApi, ProjectSpec, Tags};
use crate::error::RemoteError;
use crate::provisioner::RegionResult;

/// Buildspec every bootstrap project runs.
pub(super) const BUILDSPEC: &str = include_str!("../../assets/buildspec.yaml");

const BUILD_IMAGE: &str = "aws/codebuild/standard:2.0";
const ENVIRONMENT_TYPE: &str = "LINUX_CONTAINER";
const COMPUTE_TYPE: &str = "BUILD_GENERAL1_SMALL";

/// Error codes used when the build service cannot run in a region.
const STS_CODES: &[&str] = &["InvalidInputException", "RegionDisabledException"];

/// Returns the definition of a bootstrap project.
pub(super) fn project_spec(name: &str, service_role: String, tags: Tags) -> ProjectSpec {
    ProjectSpec {
        name: name.to_string(),
        service_role,
        image: BUILD_IMAGE.to_string(),
        environment_type: ENVIRONMENT_TYPE.to_string(),
        compute_type: COMPUTE_TYPE.to_string(),
        buildspec: BUILDSPEC.to_string(),
        tags,
    }
}

/// Returns true if the region has not activated the token service builds need.
pub(super) fn sts_not_activated(err: &RemoteError) -> bool {
    STS_CODES.contains(&err.code.as_str()) && err.message_contains("STS is not activated in this region")
}

/// Replaces any stale project in a region with a fresh one.
pub(super) async fn recreate(builds: &dyn BuildApi, region: &str, spec: &ProjectSpec) -> RegionResult {
    if let Err(e) = builds.delete_project(region, &spec.name).await {
        debug!("No stale {} project to delete in {region}: {}", spec.name, e.describe());
    }

    match builds.create_project(region, spec).await {
        Ok(()) => {
            info!("Created {} in region {region}", spec.name);
            RegionResult::Succeeded
        }
        Err(e) => RegionResult::classify(
            e,
            sts_not_activated,
            format!("Error while attempting to create the {} project in region {region}", spec.name),
        ),
    }
}

/// Updates a project in place.
pub(super) async fn update(builds: &dyn BuildApi, region: &str, spec: &ProjectSpec) -> RegionResult {
    match builds.update_project(region, spec).await {
        Ok(()) => {
            info!("Updated {} in region {region}", spec.name);
            RegionResult::Succeeded
        }
        Err(e) => RegionResult::classify(
            e,
            sts_not_activated,
            format!("Error while attempting to update the {} project in region {region}", spec.name),
        ),
    }
}
