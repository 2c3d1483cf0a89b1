//! YAML run files.
//!
//! A run file is an alternative to exporting a dozen environment variables:
//! it can be version controlled next to the payload set it drives. Every
//! field is optional; [`Config::from_env`](crate::config::Config::from_env)
//! uses the file as the base and lets environment variables override it.
//!
//! ```yaml
//! version: "1.0"
//! target: "http://localhost:8000/predict"
//! workload: [5, 10, 20, 10, 5]
//! drainTimeout: "10s"
//! seed: 7
//! payloadDir: "./test_images"
//! successPath: "$.result.ok"
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration as StdDuration;
use thiserror::Error;

use crate::plan::WorkloadPlan;
use crate::unit::DrainAccounting;

/// The only run-file version understood so far.
pub const SUPPORTED_VERSION: &str = "1.0";

/// Errors that can occur when loading or parsing a run file.
#[derive(Error, Debug)]
pub enum YamlConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Duration format for YAML (e.g., 30, "30s", "500ms").
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum YamlDuration {
    Seconds(u64),
    String(String),
}

impl YamlDuration {
    pub fn to_std_duration(&self) -> Result<StdDuration, YamlConfigError> {
        match self {
            YamlDuration::Seconds(s) => Ok(StdDuration::from_secs(*s)),
            YamlDuration::String(s) => crate::utils::parse_duration_string(s).map_err(|e| {
                YamlConfigError::Validation(format!("Invalid duration '{}': {}", s, e))
            }),
        }
    }
}

/// Contents of a run file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct YamlRunFile {
    pub version: Option<String>,
    pub target: Option<String>,
    pub workload: Option<WorkloadPlan>,
    pub drain_timeout: Option<YamlDuration>,
    pub seed: Option<u64>,
    pub payload_dir: Option<String>,
    pub content_type: Option<String>,
    pub success_path: Option<String>,
    pub request_timeout: Option<YamlDuration>,
    pub drain_accounting: Option<DrainAccounting>,
    pub skip_tls_verify: Option<bool>,
    pub custom_headers: Option<String>,
    pub resolve_target_addr: Option<String>,
}

impl YamlRunFile {
    /// Load a run file from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, YamlConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a run file from a YAML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, YamlConfigError> {
        let run_file: YamlRunFile = serde_yaml::from_str(content)?;
        run_file.validate()?;
        Ok(run_file)
    }

    fn validate(&self) -> Result<(), YamlConfigError> {
        let mut problems = Vec::new();

        if let Some(version) = &self.version {
            if version != SUPPORTED_VERSION {
                problems.push(format!(
                    "version: Unsupported config version '{}', expected '{}'",
                    version, SUPPORTED_VERSION
                ));
            }
        }

        if let Some(target) = &self.target {
            if !target.starts_with("http://") && !target.starts_with("https://") {
                problems.push(format!(
                    "target: '{}' must start with http:// or https://",
                    target
                ));
            }
        }

        if let Some(workload) = &self.workload {
            if workload.is_empty() {
                problems.push("workload: must contain at least one rate".to_string());
            }
        }

        if let Some(content_type) = &self.content_type {
            if content_type.trim().is_empty() {
                problems.push("contentType: cannot be empty".to_string());
            }
        }

        for (field, duration) in [
            ("drainTimeout", &self.drain_timeout),
            ("requestTimeout", &self.request_timeout),
        ] {
            if let Some(duration) = duration {
                if let Err(e) = duration.to_std_duration() {
                    problems.push(format!("{}: {}", field, e));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(YamlConfigError::Validation(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_run_file() {
        let yaml = r#"
version: "1.0"
target: "http://localhost:8000/predict"
workload: [5, 10, 0]
drainTimeout: "10s"
seed: 7
payloadDir: "/data/images"
contentType: "image/png"
successPath: "$.result.ok"
requestTimeout: 2
drainAccounting: "discard-terminated"
skipTlsVerify: true
customHeaders: "X-Run:nightly"
resolveTargetAddr: "localhost:127.0.0.1:8000"
"#;

        let run_file = YamlRunFile::from_str(yaml).unwrap();
        assert_eq!(run_file.target.as_deref(), Some("http://localhost:8000/predict"));
        assert_eq!(run_file.workload, Some(WorkloadPlan::new(vec![5, 10, 0])));
        assert_eq!(
            run_file.drain_timeout.unwrap().to_std_duration().unwrap(),
            StdDuration::from_secs(10)
        );
        assert_eq!(
            run_file.request_timeout.unwrap().to_std_duration().unwrap(),
            StdDuration::from_secs(2)
        );
        assert_eq!(run_file.seed, Some(7));
        assert_eq!(
            run_file.drain_accounting,
            Some(DrainAccounting::DiscardTerminated)
        );
        assert_eq!(run_file.skip_tls_verify, Some(true));
    }

    #[test]
    fn every_field_is_optional() {
        let run_file = YamlRunFile::from_str("{}").unwrap();
        assert_eq!(run_file, YamlRunFile::default());
    }

    #[test]
    fn rejects_unknown_fields() {
        let result = YamlRunFile::from_str("workers: 10\n");
        assert!(matches!(result, Err(YamlConfigError::YamlParse(_))));
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = YamlRunFile::from_str("version: \"2.0\"\n").unwrap_err();
        assert!(err.to_string().contains("Unsupported config version"));
    }

    #[test]
    fn rejects_bad_target_and_empty_workload() {
        let yaml = "target: \"ftp://host\"\nworkload: []\n";
        let err = YamlRunFile::from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("target"), "error was: {}", err);
        assert!(err.contains("workload"), "error was: {}", err);
    }

    #[test]
    fn rejects_bad_duration() {
        let err = YamlRunFile::from_str("drainTimeout: \"soon\"\n").unwrap_err();
        assert!(err.to_string().contains("drainTimeout"));
    }

    #[test]
    fn rejects_negative_rates() {
        assert!(YamlRunFile::from_str("workload: [5, -1]\n").is_err());
    }
}
