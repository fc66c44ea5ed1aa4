//! Wire and domain types shared by the dispatcher and the provisioners.

mod build_event;
mod outcome;
mod record;
mod request;
mod resource_type;

#[cfg(test)]
pub(crate) use build_event::testing as build_testing;
pub use build_event::{env as build_env, BuildCompletion, BUILD_EVENT_SOURCE};
pub use outcome::{Outcome, OutcomeStatus};
pub use record::{PendingCheck, RecordType, RetryRecord};
pub use request::{lenient, Correlation, ProvisionRequest, RequestType, SENTINEL_PHYSICAL_ID};
pub use resource_type::ResourceType;
