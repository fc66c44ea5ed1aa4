//! Outcome reporting back to the orchestrator.

mod http;

pub use http::{HttpOutcomeReporter, ResponseBody};

use async_trait::async_trait;

use crate::error::ReportError;
use crate::model::{Correlation, Outcome};

/// The single outbound call that delivers a terminal outcome.
///
/// Receivers tolerate duplicate reports for the same step.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutcomeReporter: Send + Sync {
    /// Reports an outcome for the request identified by `correlation`.
    async fn report(&self, outcome: &Outcome, correlation: &Correlation)
        -> Result<(), ReportError>;
}
