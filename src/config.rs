use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tracing::info;

use crate::classifier::{ClassifyError, JsonPathClassifier, ResponseClassifier, SuccessFieldClassifier};
use crate::client::ClientConfig;
use crate::plan::{PlanError, WorkloadPlan};
use crate::scheduler::{SchedulerConfig, DEFAULT_CONTENT_TYPE, DEFAULT_DRAIN_TIMEOUT, DEFAULT_SEED};
use crate::unit::DrainAccounting;
use crate::utils::{parse_bool_flag, parse_duration_string};
use crate::yaml_config::{YamlConfigError, YamlRunFile};

pub const DEFAULT_WORKLOAD: &str = "5,5,5";
pub const DEFAULT_PAYLOAD_DIR: &str = "./test_images";

/// Errors raised while assembling the run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable must be set")]
    Missing(&'static str),

    #[error("Invalid {var}: '{value}'. {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid WORKLOAD: {0}")]
    Workload(#[from] PlanError),

    #[error("CONFIG_FILE: {0}")]
    File(#[from] YamlConfigError),
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Main configuration for a run.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: String,
    pub workload: WorkloadPlan,
    pub drain_timeout: Duration,
    pub seed: u64,
    pub payload_dir: PathBuf,
    pub content_type: String,
    pub success_path: Option<String>,
    pub request_timeout: Option<Duration>,
    pub drain_accounting: DrainAccounting,
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub custom_headers: Option<String>,
    pub metrics_port: Option<u16>,
}

/// A set, non-blank environment variable.
fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_duration(
    var: &'static str,
    file_value: Option<&crate::yaml_config::YamlDuration>,
) -> Result<Option<Duration>, ConfigError> {
    match env_value(var) {
        Some(raw) => parse_duration_string(&raw)
            .map(Some)
            .map_err(|e| ConfigError::invalid(var, &raw, e)),
        None => Ok(file_value.map(|d| d.to_std_duration()).transpose()?),
    }
}

impl Config {
    /// Loads configuration from environment variables, on top of the run
    /// file named by `CONFIG_FILE` when one is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base = match env_value("CONFIG_FILE") {
            Some(path) => {
                info!(path = %path, "Loading run file");
                YamlRunFile::from_file(&path)?
            }
            None => YamlRunFile::default(),
        };
        Self::from_env_over(base)
    }

    /// Loads configuration from environment variables, falling back to
    /// `base` for anything the environment leaves unset.
    pub fn from_env_over(base: YamlRunFile) -> Result<Self, ConfigError> {
        let target_url = env_value("TARGET_URL")
            .or(base.target)
            .ok_or(ConfigError::Missing("TARGET_URL"))?;
        if !target_url.starts_with("http://") && !target_url.starts_with("https://") {
            return Err(ConfigError::invalid(
                "TARGET_URL",
                &target_url,
                "Must start with http:// or https://",
            ));
        }

        let workload = match env_value("WORKLOAD") {
            Some(raw) => raw.parse::<WorkloadPlan>()?,
            None => match base.workload {
                Some(plan) if plan.is_empty() => return Err(PlanError::Empty.into()),
                Some(plan) => plan,
                None => DEFAULT_WORKLOAD.parse::<WorkloadPlan>()?,
            },
        };

        let drain_timeout =
            env_duration("DRAIN_TIMEOUT", base.drain_timeout.as_ref())?.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        let request_timeout = env_duration("REQUEST_TIMEOUT", base.request_timeout.as_ref())?;

        let seed = match env_value("RANDOM_SEED") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::invalid("RANDOM_SEED", &raw, e))?,
            None => base.seed.unwrap_or(DEFAULT_SEED),
        };

        let payload_dir = PathBuf::from(
            env_value("PAYLOAD_DIR")
                .or(base.payload_dir)
                .unwrap_or_else(|| DEFAULT_PAYLOAD_DIR.to_string()),
        );

        let content_type = env_value("PAYLOAD_CONTENT_TYPE")
            .or(base.content_type)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let success_path = env_value("SUCCESS_PATH").or(base.success_path);
        if let Some(path) = &success_path {
            JsonPathClassifier::new(path).map_err(|e| ConfigError::invalid("SUCCESS_PATH", path, e))?;
        }

        let drain_accounting = match env_value("DRAIN_ACCOUNTING") {
            Some(raw) => raw
                .parse::<DrainAccounting>()
                .map_err(|e| ConfigError::invalid("DRAIN_ACCOUNTING", &raw, e))?,
            None => base.drain_accounting.unwrap_or_default(),
        };

        let skip_tls_verify = match env_value("SKIP_TLS_VERIFY") {
            Some(raw) => parse_bool_flag(&raw),
            None => base.skip_tls_verify.unwrap_or(false),
        };

        let resolve_target_addr = env::var("RESOLVE_TARGET_ADDR")
            .ok()
            .or(base.resolve_target_addr);
        let custom_headers = env::var("CUSTOM_HEADERS").ok().or(base.custom_headers);

        let metrics_port = match env_value("METRICS_PORT") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u16>()
                    .map_err(|e| ConfigError::invalid("METRICS_PORT", &raw, e))?,
            ),
            None => None,
        };

        Ok(Config {
            target_url,
            workload,
            drain_timeout,
            seed,
            payload_dir,
            content_type,
            success_path,
            request_timeout,
            drain_accounting,
            skip_tls_verify,
            resolve_target_addr,
            custom_headers,
            metrics_port,
        })
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            skip_tls_verify: self.skip_tls_verify,
            resolve_target_addr: self.resolve_target_addr.clone(),
            custom_headers: self.custom_headers.clone(),
            request_timeout: self.request_timeout,
        }
    }

    /// Creates the driver settings from this Config.
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            endpoint: self.target_url.clone(),
            drain_timeout: self.drain_timeout,
            seed: self.seed,
            content_type: self.content_type.clone(),
            accounting: self.drain_accounting,
            client: self.to_client_config(),
        }
    }

    /// The JSONPath classifier when `SUCCESS_PATH` is set, otherwise the
    /// `success`-field classifier.
    pub fn classifier(&self) -> Result<Arc<dyn ResponseClassifier>, ClassifyError> {
        match &self.success_path {
            Some(path) => Ok(Arc::new(JsonPathClassifier::new(path)?)),
            None => Ok(Arc::new(SuccessFieldClassifier)),
        }
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self) {
        println!("Starting open-loop run:");
        println!("  Target URL: {}", self.target_url);
        println!(
            "  Workload: {} ({} slices, {} requests, peak {}/s)",
            self.workload,
            self.workload.len(),
            self.workload.total_requests(),
            self.workload.peak_rate()
        );
        println!("  Drain timeout: {:?}", self.drain_timeout);
        println!("  Drain accounting: {}", self.drain_accounting);
        println!("  Random seed: {}", self.seed);
        println!("  Payload directory: {}", self.payload_dir.display());
        println!("  Payload content type: {}", self.content_type);
        match &self.success_path {
            Some(path) => println!("  Success classifier: JSONPath {}", path),
            None => println!("  Success classifier: `success` field"),
        }
        match self.request_timeout {
            Some(timeout) => println!("  Request timeout: {:?}", timeout),
            None => println!("  Request timeout: none"),
        }
        println!("  Skip TLS Verify: {}", self.skip_tls_verify);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_error_names_the_variable() {
        let err = ConfigError::invalid("RANDOM_SEED", "abc", "not a number");
        assert_eq!(err.to_string(), "Invalid RANDOM_SEED: 'abc'. not a number");
    }

    #[test]
    fn missing_error_message() {
        assert_eq!(
            ConfigError::Missing("TARGET_URL").to_string(),
            "TARGET_URL environment variable must be set"
        );
    }
}
