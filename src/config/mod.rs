//! Configuration module for the provisioning agent.
//!
//! This module handles:
//! - Resolving agent settings from environment variables (and `.env`)
//! - The policy constants of the deferred-completion protocol and tag cache

mod settings;

pub use settings::{load_dotenv, vars, AgentConfig, DEFAULT_FUNCTION_NAME, DEFAULT_RUNTIME};

use std::time::Duration;

/// Maximum time a deferred operation may stay pending before it is abandoned.
pub const WAIT_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Redelivery cycles allowed for a replicated function deletion.
pub const REPLICATED_DELETE_RETRY_CYCLES: u32 = 1;

/// Attempts made by the tag cache before giving up on a throttled fetch.
pub const TAG_FETCH_ATTEMPTS: u32 = 10;

/// Base delay of the tag cache's exponential backoff.
pub const TAG_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Returns true if a record enqueued `age` ago is past the wait window.
#[must_use]
pub fn past_wait_window(age: chrono::Duration) -> bool {
    chrono::Duration::from_std(WAIT_WINDOW).is_ok_and(|window| age > window)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_window_boundary() {
        assert!(!past_wait_window(chrono::Duration::minutes(59)));
        assert!(!past_wait_window(chrono::Duration::minutes(60)));
        assert!(past_wait_window(chrono::Duration::minutes(61)));
    }
}
