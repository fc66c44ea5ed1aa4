//! Region fan-out for provisioners that keep one companion entity per
//! declared region.
//!
//! Regional work runs concurrently and every region is awaited: one region
//! failing never cancels its siblings. Aggregation then decides the step:
//! any failed region fails it, skipped regions are only logged.

use std::future::Future;

use futures::future::join_all;
use tracing::{info, warn};

use crate::error::{ProvisionError, RemoteError};

/// Result of one region's operation.
#[derive(Debug)]
pub enum RegionResult {
    /// The operation succeeded.
    Succeeded,
    /// The region cannot host the operation; not fatal.
    Skipped(String),
    /// The operation failed; fatal to the step.
    Failed(ProvisionError),
}

impl RegionResult {
    /// Classifies a remote error as a soft skip or a hard failure.
    #[must_use]
    pub fn classify(err: RemoteError, is_soft: impl Fn(&RemoteError) -> bool, context: String) -> Self {
        if is_soft(&err) {
            Self::Skipped(format!("{context}: {err}"))
        } else {
            Self::Failed(ProvisionError::remote(context, err))
        }
    }
}

/// One region's result.
#[derive(Debug)]
pub struct RegionOperationResult {
    /// Region the operation ran in.
    pub region: String,
    /// What happened.
    pub result: RegionResult,
}

/// Regions to act on for a newly declared set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionDiff {
    /// Regions declared now but not before.
    pub new_regions: Vec<String>,
    /// Regions declared before and now.
    pub retained_regions: Vec<String>,
}

/// Returns the declared regions other than the home region, deduplicated in
/// declaration order.
#[must_use]
pub fn target_regions(declared: &[String], home: &str) -> Vec<String> {
    let mut regions: Vec<String> = Vec::with_capacity(declared.len());
    for region in declared {
        if region != home && !regions.contains(region) {
            regions.push(region.clone());
        }
    }
    regions
}

/// Splits the new declaration into created and retained regions, excluding
/// the home region. Regions only in the old declaration are dropped.
#[must_use]
pub fn diff_regions(old: &[String], new: &[String], home: &str) -> RegionDiff {
    let (retained_regions, new_regions) = target_regions(new, home)
        .into_iter()
        .partition(|region| old.contains(region));

    RegionDiff {
        new_regions,
        retained_regions,
    }
}

/// Runs `op` in every region concurrently and collects every result.
pub async fn fan_out<F, Fut>(regions: &[String], op: F) -> Vec<RegionOperationResult>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = RegionResult>,
{
    let tasks = regions.iter().map(|region| {
        let fut = op(region.clone());
        async move {
            RegionOperationResult {
                region: region.clone(),
                result: fut.await,
            }
        }
    });

    join_all(tasks).await
}

/// Turns regional results into the step's result.
///
/// # Errors
///
/// Returns an error naming every failed region if any region failed.
pub fn aggregate(
    action: &str,
    results: impl IntoIterator<Item = RegionOperationResult>,
) -> Result<(), ProvisionError> {
    let mut failures = Vec::new();

    for RegionOperationResult { region, result } in results {
        match result {
            RegionResult::Succeeded => info!("{action} succeeded in region {region}"),
            RegionResult::Skipped(reason) => {
                warn!("{action} skipped in region {region}: {reason}");
            }
            RegionResult::Failed(err) => failures.push(err.to_string()),
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ProvisionError::failed(failures.join("; ")))
    }
}

/// Best-effort teardown in every region. Failures are logged and never
/// fail the step.
pub async fn teardown<F, Fut>(action: &str, regions: &[String], op: F)
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<(), RemoteError>>,
{
    let tasks = regions.iter().map(|region| {
        let fut = op(region.clone());
        async move { (region, fut.await) }
    });

    for (region, result) in join_all(tasks).await {
        match result {
            Ok(()) => info!("{action} in region {region}"),
            Err(e) => warn!("Failed to {action} in region {region}: {}", e.describe()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn regions(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_target_regions_excludes_home() {
        assert_eq!(
            target_regions(&regions(&["A", "B", "C", "A"]), "B"),
            regions(&["A", "C"])
        );
    }

    #[test]
    fn test_diff_regions() {
        let diff = diff_regions(&regions(&["A", "B"]), &regions(&["B", "C"]), "B");
        assert_eq!(diff.new_regions, regions(&["C"]));
        assert!(diff.retained_regions.is_empty());

        let diff = diff_regions(&regions(&["A", "B"]), &regions(&["A", "B", "D"]), "B");
        assert_eq!(diff.new_regions, regions(&["D"]));
        assert_eq!(diff.retained_regions, regions(&["A"]));
    }

    #[tokio::test]
    async fn test_fan_out_runs_every_region() {
        let seen = Mutex::new(Vec::new());
        let results = fan_out(&regions(&["A", "C"]), |region| {
            seen.lock().unwrap().push(region.clone());
            async move {
                if region == "A" {
                    RegionResult::Failed(ProvisionError::failed("boom in A"))
                } else {
                    RegionResult::Succeeded
                }
            }
        })
        .await;

        assert_eq!(results.len(), 2);
        assert_eq!(seen.into_inner().unwrap(), regions(&["A", "C"]));
        let err = aggregate("Create", results).unwrap_err();
        assert_eq!(err.to_string(), "boom in A");
    }

    #[test]
    fn test_skipped_regions_do_not_fail() {
        let results = vec![
            RegionOperationResult {
                region: String::from("A"),
                result: RegionResult::Skipped(String::from("not activated")),
            },
            RegionOperationResult {
                region: String::from("C"),
                result: RegionResult::Succeeded,
            },
        ];
        assert!(aggregate("Create", results).is_ok());
    }

    #[test]
    fn test_classify() {
        let soft = RegionResult::classify(
            RemoteError::new("OptInRequired", "region disabled"),
            |e| e.has_code("OptInRequired"),
            String::from("Create"),
        );
        assert!(matches!(soft, RegionResult::Skipped(_)));

        let hard = RegionResult::classify(
            RemoteError::new("AccessDenied", "nope"),
            |e| e.has_code("OptInRequired"),
            String::from("Create"),
        );
        assert!(matches!(hard, RegionResult::Failed(_)));
    }

    #[tokio::test]
    async fn test_teardown_never_fails() {
        teardown("delete thing", &regions(&["A", "C"]), |region| async move {
            if region == "A" {
                Err(RemoteError::new("AccessDenied", "nope"))
            } else {
                Ok(())
            }
        })
        .await;
    }
}
