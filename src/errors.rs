//! Failure taxonomy for individual requests.
//!
//! Every failure a request can hit is recovered at the request boundary and
//! turned into a failed outcome. This module names those failures and sorts
//! them into categories for logs, metrics and the final report.

use std::fmt;
use thiserror::Error;

use crate::classifier::ClassifyError;
use crate::payload::PayloadError;

/// Categories of request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCategory {
    /// The payload source had nothing to send; no request went out
    PayloadError,

    /// HTTP 4xx responses
    ClientError,

    /// HTTP 5xx responses
    ServerError,

    /// Connection refused, reset, DNS failures
    NetworkError,

    /// Transport-level timeouts
    TimeoutError,

    /// TLS/SSL certificate errors
    TlsError,

    /// Body could not be read or was not JSON
    BodyError,

    /// The classifier could not interpret a well-formed body
    ClassifierError,

    /// The classifier looked at the body and said no
    Rejected,

    /// Anything else, including unexpected status classes
    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code.
    ///
    /// Returns `None` for 2xx; every other status counts as a failure.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200..=299 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorize a reqwest transport error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ErrorCategory::TimeoutError
        } else if error.is_connect() || error.is_request() {
            ErrorCategory::NetworkError
        } else if error.is_body() || error.is_decode() {
            ErrorCategory::BodyError
        } else if error.is_redirect() {
            ErrorCategory::ClientError
        } else {
            let error_msg = error.to_string().to_lowercase();

            if error_msg.contains("certificate")
                || error_msg.contains("tls")
                || error_msg.contains("ssl")
            {
                ErrorCategory::TlsError
            } else if error_msg.contains("timeout") {
                ErrorCategory::TimeoutError
            } else if error_msg.contains("dns")
                || error_msg.contains("resolve")
                || error_msg.contains("connect")
            {
                ErrorCategory::NetworkError
            } else {
                ErrorCategory::OtherError
            }
        }
    }

    /// Prometheus label for this category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::PayloadError => "payload_error",
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::BodyError => "body_error",
            ErrorCategory::ClassifierError => "classifier_error",
            ErrorCategory::Rejected => "rejected",
            ErrorCategory::OtherError => "other_error",
        }
    }

    /// Human-readable description of this category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::PayloadError => "Payload Unavailable",
            ErrorCategory::ClientError => "HTTP 4xx Client Errors",
            ErrorCategory::ServerError => "HTTP 5xx Server Errors",
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::TlsError => "TLS/SSL Certificate Errors",
            ErrorCategory::BodyError => "Unreadable or Non-JSON Bodies",
            ErrorCategory::ClassifierError => "Classifier Errors",
            ErrorCategory::Rejected => "Responses Classified Unsuccessful",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }

    /// All categories in report order.
    pub fn all() -> Vec<ErrorCategory> {
        vec![
            ErrorCategory::PayloadError,
            ErrorCategory::ClientError,
            ErrorCategory::ServerError,
            ErrorCategory::NetworkError,
            ErrorCategory::TimeoutError,
            ErrorCategory::TlsError,
            ErrorCategory::BodyError,
            ErrorCategory::ClassifierError,
            ErrorCategory::Rejected,
            ErrorCategory::OtherError,
        ]
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Why a single request did not produce a success.
#[derive(Error, Debug)]
pub enum RequestFailure {
    #[error("no payload available: {0}")]
    Payload(#[from] PayloadError),

    #[error("could not build request: {0}")]
    Build(String),

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("response body is not JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("classifier failed: {0}")]
    Classifier(#[from] ClassifyError),
}

impl RequestFailure {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RequestFailure::Payload(_) | RequestFailure::Build(_) => ErrorCategory::PayloadError,
            RequestFailure::Transport(e) => ErrorCategory::from_reqwest_error(e),
            RequestFailure::Status(code) => {
                ErrorCategory::from_status_code(*code).unwrap_or(ErrorCategory::OtherError)
            }
            RequestFailure::Body(_) | RequestFailure::InvalidJson(_) => ErrorCategory::BodyError,
            RequestFailure::Classifier(_) => ErrorCategory::ClassifierError,
        }
    }

    /// Whether the request had left the process before the failure.
    ///
    /// Payload and build failures happen before anything is sent and are
    /// not counted as issued.
    pub fn was_issued(&self) -> bool {
        !matches!(self, RequestFailure::Payload(_) | RequestFailure::Build(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_success_codes() {
        assert_eq!(ErrorCategory::from_status_code(200), None);
        assert_eq!(ErrorCategory::from_status_code(201), None);
        assert_eq!(ErrorCategory::from_status_code(204), None);
    }

    #[test]
    fn test_redirects_are_not_success() {
        assert_eq!(
            ErrorCategory::from_status_code(302),
            Some(ErrorCategory::OtherError)
        );
    }

    #[test]
    fn test_categorize_4xx_and_5xx() {
        assert_eq!(
            ErrorCategory::from_status_code(404),
            Some(ErrorCategory::ClientError)
        );
        assert_eq!(
            ErrorCategory::from_status_code(429),
            Some(ErrorCategory::ClientError)
        );
        assert_eq!(
            ErrorCategory::from_status_code(503),
            Some(ErrorCategory::ServerError)
        );
    }

    #[test]
    fn test_labels_are_unique() {
        let mut labels: Vec<_> = ErrorCategory::all().iter().map(|c| c.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), ErrorCategory::all().len());
    }

    #[test]
    fn test_payload_failures_are_not_issued() {
        let failure = RequestFailure::from(PayloadError::NoDataAvailable);
        assert!(!failure.was_issued());
        assert_eq!(failure.category(), ErrorCategory::PayloadError);
    }

    #[test]
    fn test_status_failures_are_issued() {
        let failure = RequestFailure::Status(500);
        assert!(failure.was_issued());
        assert_eq!(failure.category(), ErrorCategory::ServerError);
    }

    #[test]
    fn test_json_failures_are_body_errors() {
        let err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let failure = RequestFailure::from(err);
        assert!(failure.was_issued());
        assert_eq!(failure.category(), ErrorCategory::BodyError);
    }

    #[test]
    fn test_classifier_failures() {
        let failure = RequestFailure::from(ClassifyError::NoMatch("$.ok".to_string()));
        assert_eq!(failure.category(), ErrorCategory::ClassifierError);
        assert!(failure.to_string().contains("$.ok"));
    }
}
