//! Agent settings resolved from the process environment.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, Result};

/// Default own function name when the runtime does not provide one.
pub const DEFAULT_FUNCTION_NAME: &str = "agent-commander";

/// Default runtime for companion commander functions.
pub const DEFAULT_RUNTIME: &str = "provided.al2023";

/// Prefix the runtime adds to `AWS_EXECUTION_ENV`.
const EXECUTION_ENV_PREFIX: &str = "AWS_Lambda_";

/// Environment variable names.
pub mod vars {
    /// Home region.
    pub const REGION: &str = "AWS_REGION";
    /// Account id.
    pub const ACCOUNT_ID: &str = "AWS_ACCOUNT_ID";
    /// Own function name.
    pub const FUNCTION_NAME: &str = "AWS_LAMBDA_FUNCTION_NAME";
    /// Own execution environment.
    pub const EXECUTION_ENV: &str = "AWS_EXECUTION_ENV";
    /// Retry queue URL.
    pub const CHECK_QUEUE_URL: &str = "PROVISION_CHECK_QUEUE_URL";
    /// Shared secret for the domain API.
    pub const EXTERNAL_ID: &str = "EXTERNAL_ID";
    /// Domain API host.
    pub const PROVISION_API_HOST: &str = "PROVISION_API_HOST";
}

/// Agent settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Region the agent runs in.
    pub region: String,
    /// Account the agent runs in.
    pub account_id: String,
    /// Name of the agent's own function.
    pub function_name: String,
    /// Runtime companion functions are created with.
    pub runtime: String,
    /// Retry queue URL.
    pub check_queue_url: Option<String>,
    /// Shared secret for the domain API.
    pub external_id: Option<String>,
    /// Domain API host.
    pub provision_api_host: Option<String>,
}

impl AgentConfig {
    /// Loads settings from the process environment, reading `.env` from the
    /// working directory first if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the `.env` file is unreadable or a required
    /// variable is missing.
    pub fn from_env() -> Result<Self> {
        load_dotenv(Path::new(".env"))?;
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves settings through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &str| optional(name).ok_or_else(|| ConfigError::missing(name));

        let runtime = optional(vars::EXECUTION_ENV).map_or_else(
            || DEFAULT_RUNTIME.to_string(),
            |env| {
                env.strip_prefix(EXECUTION_ENV_PREFIX)
                    .unwrap_or(&env)
                    .to_string()
            },
        );

        Ok(Self {
            region: required(vars::REGION)?,
            account_id: required(vars::ACCOUNT_ID)?,
            function_name: optional(vars::FUNCTION_NAME)
                .unwrap_or_else(|| DEFAULT_FUNCTION_NAME.to_string()),
            runtime,
            check_queue_url: optional(vars::CHECK_QUEUE_URL),
            external_id: optional(vars::EXTERNAL_ID),
            provision_api_host: optional(vars::PROVISION_API_HOST),
        })
    }

    /// Returns the ARN of a function with the agent's own name in a region.
    #[must_use]
    pub fn function_arn(&self, region: &str) -> String {
        format!(
            "arn:aws:lambda:{region}:{}:function:{}",
            self.account_id, self.function_name
        )
    }

    /// Returns the retry queue URL.
    ///
    /// # Errors
    ///
    /// Returns an error if no queue is configured.
    pub fn require_check_queue_url(&self) -> Result<&str> {
        self.check_queue_url
            .as_deref()
            .ok_or_else(|| ConfigError::missing(vars::CHECK_QUEUE_URL).into())
    }
}

/// Loads a `.env` file into the process environment if it exists.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be loaded.
pub fn load_dotenv(path: &Path) -> Result<()> {
    if path.exists() {
        info!("Loading environment from: {}", path.display());
        dotenvy::from_path(path).map_err(|e| ConfigError::DotEnv {
            message: format!("{}: {e}", path.display()),
        })?;
    } else {
        debug!(".env file not found at: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_minimal_config() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("AWS_REGION", "us-west-2"),
            ("AWS_ACCOUNT_ID", "123456789012"),
        ]))
        .unwrap();

        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.function_name, DEFAULT_FUNCTION_NAME);
        assert_eq!(config.runtime, DEFAULT_RUNTIME);
        assert!(config.check_queue_url.is_none());
        assert!(config.require_check_queue_url().is_err());
        assert_eq!(
            config.function_arn("eu-west-1"),
            "arn:aws:lambda:eu-west-1:123456789012:function:agent-commander"
        );
    }

    #[test]
    fn test_execution_env_prefix_is_stripped() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("AWS_REGION", "us-west-2"),
            ("AWS_ACCOUNT_ID", "123456789012"),
            ("AWS_EXECUTION_ENV", "AWS_Lambda_nodejs18.x"),
            ("PROVISION_CHECK_QUEUE_URL", "https://sqs.example/queue"),
        ]))
        .unwrap();

        assert_eq!(config.runtime, "nodejs18.x");
        assert_eq!(config.require_check_queue_url().unwrap(), "https://sqs.example/queue");
    }

    #[test]
    fn test_missing_required() {
        let err = AgentConfig::from_lookup(lookup(&[("AWS_REGION", "us-west-2")])).unwrap_err();
        assert!(err.to_string().contains("AWS_ACCOUNT_ID"));
    }

    #[test]
    fn test_load_dotenv_missing_file_is_ok() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(load_dotenv(&dir.path().join(".env")).is_ok());
    }

    #[test]
    fn test_load_dotenv_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".env");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "PROVISION_AGENT_TEST_DOTENV=loaded").unwrap();

        load_dotenv(&path).unwrap();
        assert_eq!(
            std::env::var("PROVISION_AGENT_TEST_DOTENV").as_deref(),
            Ok("loaded")
        );
    }
}
