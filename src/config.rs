//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::poller::{MAX_JOB_TIMEOUT, PollingPolicy};

/// Connection settings for the MAAS region controller, derived from
/// environment variables and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "MAAS",
    discovery(
        app_name = "metalcast",
        env_var = "METALCAST_CONFIG_PATH",
        config_file_name = "metalcast.toml",
        dotfile_name = ".metalcast.toml",
        project_file_name = "metalcast.toml"
    )
)]
pub struct MaasConfig {
    /// Base URL of the region controller, for example
    /// `http://maas.example:5240/MAAS`.
    pub api_url: String,
    /// API key in the `consumer:token:secret` form shown by the MAAS UI.
    pub api_key: String,
    /// Per-request HTTP timeout in seconds. Defaults to 30.
    #[ortho_config(default = 30)]
    pub http_timeout_secs: u64,
}

/// Worker pool and polling settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "METALCAST",
    discovery(
        app_name = "metalcast",
        env_var = "METALCAST_CONFIG_PATH",
        config_file_name = "metalcast.toml",
        dotfile_name = ".metalcast.toml",
        project_file_name = "metalcast.toml"
    )
)]
pub struct OrchestratorConfig {
    /// Number of jobs allowed to run at once. Defaults to 4.
    #[ortho_config(default = 4)]
    pub workers: usize,
    /// Seconds between two status checks. Defaults to 5.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Minutes before a job is cancelled. Defaults to 15.
    #[ortho_config(default = 15)]
    pub job_timeout_mins: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to [{}] in metalcast.toml",
            self.env_var, self.toml_key, self.section
        )
    }

    fn require(&self, value: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                self.description,
                self.hint()
            )));
        }
        Ok(())
    }

    fn require_positive(&self, value: u64) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "{} must be greater than zero: {}",
                self.description,
                self.hint()
            )));
        }
        Ok(())
    }

    fn require_at_most(&self, value: u64, limit: u64) -> Result<(), ConfigError> {
        if value > limit {
            return Err(ConfigError::InvalidValue(format!(
                "{} must be at most {limit}, got {value}: {}",
                self.description,
                self.hint()
            )));
        }
        Ok(())
    }
}

const API_URL: FieldMetadata =
    FieldMetadata::new("MAAS API URL", "MAAS_API_URL", "api_url", "maas");
const API_KEY: FieldMetadata =
    FieldMetadata::new("MAAS API key", "MAAS_API_KEY", "api_key", "maas");
const HTTP_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "HTTP timeout",
    "MAAS_HTTP_TIMEOUT_SECS",
    "http_timeout_secs",
    "maas",
);
const WORKERS: FieldMetadata = FieldMetadata::new(
    "worker count",
    "METALCAST_WORKERS",
    "workers",
    "metalcast",
);
const POLL_INTERVAL: FieldMetadata = FieldMetadata::new(
    "poll interval",
    "METALCAST_POLL_INTERVAL_SECS",
    "poll_interval_secs",
    "metalcast",
);
const MAX_JOB_TIMEOUT_MINS: u64 = MAX_JOB_TIMEOUT.as_secs().saturating_div(60);

const JOB_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "job timeout",
    "METALCAST_JOB_TIMEOUT_MINS",
    "job_timeout_mins",
    "metalcast",
);

impl MaasConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("metalcast")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply each field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidValue`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        API_URL.require(&self.api_url)?;
        let url = self.api_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(format!(
                "MAAS API URL must start with http:// or https://, got `{url}`: {}",
                API_URL.hint()
            )));
        }
        API_KEY.require(&self.api_key)?;
        HTTP_TIMEOUT.require_positive(self.http_timeout_secs)?;
        Ok(())
    }

    /// Returns the per-request HTTP timeout.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl OrchestratorConfig {
    /// Loads configuration using the `ortho-config` derive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("metalcast")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Rejects zero workers and intervals, and job timeouts that are zero or
    /// longer than [`MAX_JOB_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        WORKERS.require_positive(u64::try_from(self.workers).unwrap_or(u64::MAX))?;
        POLL_INTERVAL.require_positive(self.poll_interval_secs)?;
        JOB_TIMEOUT.require_positive(self.job_timeout_mins)?;
        JOB_TIMEOUT.require_at_most(self.job_timeout_mins, MAX_JOB_TIMEOUT_MINS)?;
        Ok(())
    }

    /// Builds the default per-job polling policy.
    #[must_use]
    pub fn polling_policy(&self) -> PollingPolicy {
        PollingPolicy::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.job_timeout_mins.saturating_mul(60)),
        )
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let policy = PollingPolicy::default();
        Self {
            workers: 4,
            poll_interval_secs: policy.interval.as_secs(),
            job_timeout_mins: policy.timeout.as_secs().saturating_div(60),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value outside its accepted range.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
