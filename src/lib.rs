// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Provision Agent
//!
//! A custom resource provisioning engine for declarative deployment
//! templates.
//!
//! ## Overview
//!
//! The template orchestrator delegates resource types it cannot create
//! itself to this agent. For every lifecycle request the agent:
//!
//! - Routes the request to the provisioner registered for its type
//! - Creates, updates or deletes the remote resources, fanning out across
//!   every declared region where needed
//! - Reports exactly one terminal outcome back to the orchestrator
//!
//! Operations that cannot finish within one invocation become retry records
//! that are redelivered through a queue until they resolve or the wait window
//! closes.
//!
//! ## Architecture
//!
//! Three kinds of inbound event reach the [`Dispatcher`]:
//!
//! 1. **Lifecycle requests**: `Create`, `Update` or `Delete` of one resource
//! 2. **Record batches**: redelivered retry records resuming deferred checks
//! 3. **Build completions**: outcomes of builds started by build triggers
//!
//! ## Modules
//!
//! - [`dispatcher`]: Event classification and routing
//! - [`provisioner`]: Provisioner contract, registry, region fan-out and
//!   deferred completion
//! - [`resources`]: One provisioner per supported resource type
//! - [`cloud`]: Capability interface over the remote services
//! - [`tags`]: Memoized, throttle-tolerant tag lookups
//! - [`report`]: Outcome delivery to the orchestrator
//! - [`queue`]: Retry record queue
//! - [`domain`]: Signed client for the stacks domain API
//! - [`model`]: Wire and domain types
//! - [`config`]: Agent settings and policy constants
//!
//! ## Example
//!
//! ```json
//! {
//!   "RequestType": "Create",
//!   "ResourceType": "Custom::UsEast1SSLCertificate",
//!   "ResourceProperties": { "DomainName": "www.example.com" },
//!   "StackId": "arn:aws:cloudformation:us-west-2:123456789012:stack/app/0f3c",
//!   "RequestId": "4a9d",
//!   "LogicalResourceId": "Certificate",
//!   "ResponseURL": "https://example.com/reply"
//! }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cloud;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod model;
pub mod provisioner;
pub mod queue;
pub mod report;
pub mod resources;
pub mod tags;

// ============================================================================
// Re-exports
// ============================================================================

pub use cloud::Cloud;
pub use config::AgentConfig;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use domain::{DomainApi, HttpDomainApi};
pub use error::{AgentError, Result};
pub use model::{Outcome, ProvisionRequest, RetryRecord};
pub use provisioner::{DeferredCompletion, Provisioned, Provisioner, Registry};
pub use report::{HttpOutcomeReporter, OutcomeReporter};
pub use resources::{registry, ProvisionContext};
pub use tags::TagCache;
