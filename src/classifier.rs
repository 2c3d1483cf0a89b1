//! Response classifiers.
//!
//! A [`ResponseClassifier`] decides whether a parsed JSON response body
//! counts as a success. Classifiers are shared across execution units and
//! must not keep per-call state: classifying the same body twice yields the
//! same answer.

use serde_json::Value;
use serde_json_path::JsonPath;
use thiserror::Error;
use tracing::debug;

/// Errors raised while interpreting a response body.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifyError {
    #[error("Invalid JSONPath '{path}': {message}")]
    InvalidPath { path: String, message: String },

    #[error("JSONPath '{0}' did not match exactly one value")]
    NoMatch(String),

    #[error("JSONPath '{path}' matched a non-boolean value: {found}")]
    NotBoolean { path: String, found: String },
}

/// Decides whether a response counts as a success.
pub trait ResponseClassifier: Send + Sync {
    /// `id` is the identifier of the payload that produced `body`.
    fn classify(&self, id: &str, body: &Value) -> Result<bool, ClassifyError>;
}

/// Success iff the body has a boolean `success` field set to `true`.
///
/// A missing or non-boolean field is a plain failure, not an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuccessFieldClassifier;

impl ResponseClassifier for SuccessFieldClassifier {
    fn classify(&self, id: &str, body: &Value) -> Result<bool, ClassifyError> {
        let success = body
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let marker = if success { "✓" } else { "✗" };
        debug!(id = %id, response = %body, "[{}] classified response", marker);

        Ok(success)
    }
}

/// Success iff a JSONPath query selects exactly one boolean `true`.
#[derive(Debug, Clone)]
pub struct JsonPathClassifier {
    raw: String,
    path: JsonPath,
}

impl JsonPathClassifier {
    pub fn new(path: &str) -> Result<Self, ClassifyError> {
        let parsed = JsonPath::parse(path).map_err(|e| ClassifyError::InvalidPath {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            raw: path.to_string(),
            path: parsed,
        })
    }

    pub fn path(&self) -> &str {
        &self.raw
    }
}

impl ResponseClassifier for JsonPathClassifier {
    fn classify(&self, id: &str, body: &Value) -> Result<bool, ClassifyError> {
        let node = self
            .path
            .query(body)
            .exactly_one()
            .map_err(|_| ClassifyError::NoMatch(self.raw.clone()))?;

        let success = node.as_bool().ok_or_else(|| ClassifyError::NotBoolean {
            path: self.raw.clone(),
            found: node.to_string(),
        })?;

        debug!(id = %id, path = %self.raw, success, "Classified response");

        Ok(success)
    }
}
