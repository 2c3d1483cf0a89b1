use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::utils::parse_headers_with_escapes;

/// Errors raised while building the HTTP client.
#[derive(Error, Debug)]
pub enum ClientBuildError {
    #[error("RESOLVE_TARGET_ADDR: {0}")]
    InvalidResolve(String),

    #[error("CUSTOM_HEADERS: {0}")]
    InvalidHeader(String),

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Configuration for building the HTTP client.
///
/// Every execution unit builds its own client from this, since a client's
/// connection pool is bound to the runtime that created it.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub custom_headers: Option<String>,
    /// Unset leaves the transport default in place (no overall timeout).
    pub request_timeout: Option<Duration>,
}

/// Result of building the client, includes parsed headers for logging.
pub struct ClientBuildResult {
    pub client: reqwest::Client,
    pub parsed_headers: HeaderMap,
}

/// Builds a reqwest HTTP client with the specified configuration.
pub fn build_client(config: &ClientConfig) -> Result<ClientBuildResult, ClientBuildError> {
    let mut client_builder = reqwest::Client::builder();

    // DNS Override Configuration
    if let Some(ref resolve_str) = config.resolve_target_addr {
        if !resolve_str.is_empty() {
            let (hostname, socket_addr) = parse_resolve_override(resolve_str)?;
            client_builder = client_builder.resolve(&hostname, socket_addr);
        }
    }

    // Custom Headers Configuration
    let parsed_headers = configure_custom_headers(config.custom_headers.as_deref())?;
    if !parsed_headers.is_empty() {
        client_builder = client_builder.default_headers(parsed_headers.clone());
    }

    if let Some(timeout) = config.request_timeout {
        client_builder = client_builder.timeout(timeout);
    }

    // Build client with TLS settings
    let client = if config.skip_tls_verify {
        client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?
    } else {
        client_builder.build()?
    };

    Ok(ClientBuildResult {
        client,
        parsed_headers,
    })
}

/// Logs what a client built from `config` will do differently from the defaults.
pub fn log_client_config(config: &ClientConfig, parsed_headers: &HeaderMap) {
    if let Some(ref resolve_str) = config.resolve_target_addr {
        if resolve_str.is_empty() {
            info!("RESOLVE_TARGET_ADDR is set but empty, no DNS override will be applied");
        } else {
            info!(resolve = %resolve_str, "DNS override configured");
        }
    }
    if !parsed_headers.is_empty() {
        info!(count = parsed_headers.len(), "Custom default headers configured");
    }
    if let Some(timeout) = config.request_timeout {
        info!(timeout = ?timeout, "Per-request timeout configured");
    }
    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
    }
}

/// Parses `hostname:ip:port` into the hostname and the address it should resolve to.
pub fn parse_resolve_override(resolve_str: &str) -> Result<(String, SocketAddr), ClientBuildError> {
    let parts: Vec<&str> = resolve_str.split(':').collect();
    if parts.len() != 3 {
        return Err(ClientBuildError::InvalidResolve(format!(
            "'{}' is not in the expected format 'hostname:ip:port'",
            resolve_str
        )));
    }

    let hostname_to_override = parts[0].trim();
    let ip_to_resolve_to = parts[1].trim();
    let port_str = parts[2].trim();

    if hostname_to_override.is_empty() {
        return Err(ClientBuildError::InvalidResolve(
            "hostname part cannot be empty. Format: 'hostname:ip:port'".to_string(),
        ));
    }
    if ip_to_resolve_to.is_empty() {
        return Err(ClientBuildError::InvalidResolve(
            "IP address part cannot be empty. Format: 'hostname:ip:port'".to_string(),
        ));
    }

    let port: u16 = port_str.parse().map_err(|e| {
        ClientBuildError::InvalidResolve(format!(
            "Failed to parse port '{}': {}. Must be a valid u16",
            port_str, e
        ))
    })?;

    let socket_addr_str = format!("{}:{}", ip_to_resolve_to, port);
    let socket_addr: SocketAddr = socket_addr_str.parse().map_err(|e| {
        ClientBuildError::InvalidResolve(format!(
            "Failed to parse '{}' as an address: {}",
            socket_addr_str, e
        ))
    })?;

    Ok((hostname_to_override.to_string(), socket_addr))
}

fn configure_custom_headers(
    custom_headers_str: Option<&str>,
) -> Result<HeaderMap, ClientBuildError> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for header_pair_str in parse_headers_with_escapes(headers_str) {
        let header_pair_str_trimmed = header_pair_str.trim();
        if header_pair_str_trimmed.is_empty() {
            continue;
        }

        let (name_str, value_str) = match header_pair_str_trimmed.split_once(':') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => {
                return Err(ClientBuildError::InvalidHeader(format!(
                    "Invalid header format: '{}'. Expected 'Name:Value'.",
                    header_pair_str_trimmed
                )))
            }
        };

        if name_str.is_empty() {
            return Err(ClientBuildError::InvalidHeader(format!(
                "Header name cannot be empty in '{}'.",
                header_pair_str_trimmed
            )));
        }

        let header_name = HeaderName::from_str(name_str).map_err(|e| {
            ClientBuildError::InvalidHeader(format!("Invalid header name '{}': {}", name_str, e))
        })?;
        let header_value = HeaderValue::from_str(value_str).map_err(|e| {
            ClientBuildError::InvalidHeader(format!(
                "Invalid header value for '{}': {}",
                name_str, e
            ))
        })?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}
