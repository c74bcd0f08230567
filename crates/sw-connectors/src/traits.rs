//! Connector trait definitions for Surface Warden.
//!
//! Every discovery provider implements [`Connector`] for lifecycle checks and
//! [`DiscoverySource`] for the fetch/normalize contract. Transport failures
//! are modelled by [`ConnectorError`]; the orchestrator only ever sees the
//! coarser [`AdapterError`].

use crate::model::DiscoveredAsset;
use crate::secret::ApiSecret;
use crate::seed::Seed;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the HTTP layer of a connector.
#[derive(Error, Debug, Clone)]
pub enum ConnectorError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Classification of a failed adapter call as seen by the orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    /// The call exceeded its per-source timeout or the discovery deadline.
    Timeout,
    /// The provider signalled throttling, or the rate gate suppressed the call.
    Throttled,
    /// Transport failure, authentication failure, or an HTTP error status.
    NetworkFailure,
    /// The provider answered with a payload that could not be read.
    MalformedResponse,
}

impl AdapterErrorKind {
    /// Label used for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterErrorKind::Timeout => "timeout",
            AdapterErrorKind::Throttled => "throttled",
            AdapterErrorKind::NetworkFailure => "network_failure",
            AdapterErrorKind::MalformedResponse => "malformed_response",
        }
    }
}

impl fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal failure of one discovery source.
///
/// Adapter errors are collected by the orchestrator and returned next to the
/// candidates; they never abort a discovery on their own.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[error("{source_name}: {kind}: {message}")]
pub struct AdapterError {
    /// Name of the source that failed.
    pub source_name: String,
    /// Failure classification.
    pub kind: AdapterErrorKind,
    /// Whether re-running the discovery later may succeed.
    pub retryable: bool,
    /// Human-readable detail.
    pub message: String,
}

impl AdapterError {
    /// Creates a new adapter error.
    pub fn new(
        source_name: impl Into<String>,
        kind: AdapterErrorKind,
        retryable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            kind,
            retryable,
            message: message.into(),
        }
    }

    /// Per-source timeout or discovery deadline expiry.
    pub fn timeout(source_name: impl Into<String>, after: Duration) -> Self {
        Self::new(
            source_name,
            AdapterErrorKind::Timeout,
            true,
            format!("no response within {}ms", after.as_millis()),
        )
    }

    /// Throttle signal from the provider.
    pub fn throttled(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(source_name, AdapterErrorKind::Throttled, true, message)
    }

    /// Payload could not be parsed.
    pub fn malformed(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(source_name, AdapterErrorKind::MalformedResponse, false, message)
    }

    /// Maps a transport-level error of the named source.
    pub fn from_connector(source_name: impl Into<String>, error: ConnectorError) -> Self {
        let (kind, retryable) = match &error {
            ConnectorError::RateLimited(_) => (AdapterErrorKind::Throttled, true),
            ConnectorError::Timeout(_) => (AdapterErrorKind::Timeout, true),
            ConnectorError::InvalidResponse(_) => (AdapterErrorKind::MalformedResponse, false),
            ConnectorError::ConnectionFailed(_) | ConnectorError::RequestFailed(_) => {
                (AdapterErrorKind::NetworkFailure, true)
            }
            ConnectorError::AuthenticationFailed(_)
            | ConnectorError::AuthorizationDenied(_)
            | ConnectorError::NotFound(_)
            | ConnectorError::ConfigError(_) => (AdapterErrorKind::NetworkFailure, false),
        };
        Self::new(source_name, kind, retryable, error.to_string())
    }

    /// Returns true when this error is a throttle signal.
    pub fn is_throttle(&self) -> bool {
        self.kind == AdapterErrorKind::Throttled
    }
}

/// Health status of a connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorHealth {
    /// Connector is healthy and operational.
    Healthy,
    /// Connector is degraded but still functional.
    Degraded(String),
    /// Connector is unhealthy and not operational.
    Unhealthy(String),
    /// Health status is unknown.
    Unknown,
}

/// Configuration shared by every HTTP-backed connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector name, also used as the provenance key in `Asset::sources`.
    pub name: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Authentication configuration.
    pub auth: AuthConfig,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for server errors. 429 responses are never retried.
    pub max_retries: u32,
    /// Additional headers to include.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication.
    None,
    /// API key sent in a request header.
    ApiKey {
        key: ApiSecret,
        header_name: String,
    },
    /// API key sent as a query parameter (Shodan style).
    QueryParam { key: ApiSecret, param_name: String },
    /// HTTP basic authentication (Censys style).
    Basic { username: String, password: ApiSecret },
}

/// Raw provider response captured by [`DiscoverySource::fetch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProviderPayload {
    /// Source that produced the payload.
    pub source_name: String,
    /// Seed the payload was fetched for.
    pub seed: Seed,
    /// Provider-specific body.
    pub body: serde_json::Value,
    /// When the payload was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl RawProviderPayload {
    /// Creates a payload stamped with the current time.
    pub fn new(source_name: impl Into<String>, seed: Seed, body: serde_json::Value) -> Self {
        Self {
            source_name: source_name.into(),
            seed,
            body,
            fetched_at: Utc::now(),
        }
    }

    /// A payload carrying no data, used when the provider knows nothing about the seed.
    pub fn empty(source_name: impl Into<String>, seed: Seed) -> Self {
        Self::new(source_name, seed, serde_json::Value::Null)
    }
}

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the connector name.
    fn name(&self) -> &str;

    /// Returns the connector type (e.g., "scanner", "passive_dns", "manual").
    fn connector_type(&self) -> &str;

    /// Returns the capabilities this connector provides.
    fn capabilities(&self) -> Vec<String> {
        vec!["health_check".to_string(), "test_connection".to_string()]
    }

    /// Checks the health of the connector.
    async fn health_check(&self) -> ConnectorResult<ConnectorHealth>;

    /// Tests the connection to the external system.
    async fn test_connection(&self) -> ConnectorResult<bool>;
}

/// A provider that turns a seed into canonical asset candidates.
#[async_trait]
pub trait DiscoverySource: Connector {
    /// Whether this source can answer for the seed at all (e.g., IP-only APIs).
    fn supports(&self, _seed: &Seed) -> bool {
        true
    }

    /// Fetches the provider's raw answer for the seed.
    async fn fetch(&self, seed: &Seed) -> Result<RawProviderPayload, AdapterError>;

    /// Converts a raw answer into canonical candidates.
    ///
    /// Fields that cannot be parsed are dropped; a record without an
    /// identity is skipped.
    fn normalize(&self, payload: &RawProviderPayload) -> Vec<DiscoveredAsset>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_maps_to_throttled() {
        let err = AdapterError::from_connector("shodan", ConnectorError::RateLimited(60));
        assert_eq!(err.kind, AdapterErrorKind::Throttled);
        assert!(err.retryable);
        assert!(err.is_throttle());
    }

    #[test]
    fn test_auth_failure_is_not_retryable() {
        let err = AdapterError::from_connector(
            "censys",
            ConnectorError::AuthenticationFailed("Unauthorized".into()),
        );
        assert_eq!(err.kind, AdapterErrorKind::NetworkFailure);
        assert!(!err.retryable);
    }

    #[test]
    fn test_invalid_response_maps_to_malformed() {
        let err = AdapterError::from_connector(
            "otx",
            ConnectorError::InvalidResponse("unexpected EOF".into()),
        );
        assert_eq!(err.kind, AdapterErrorKind::MalformedResponse);
    }

    #[test]
    fn test_timeout_helper() {
        let err = AdapterError::timeout("slow", Duration::from_millis(250));
        assert_eq!(err.kind, AdapterErrorKind::Timeout);
        assert!(err.retryable);
        assert!(err.message.contains("250ms"));
    }

    #[test]
    fn test_adapter_error_display() {
        let err = AdapterError::malformed("otx", "missing passive_dns");
        assert_eq!(
            err.to_string(),
            "otx: malformed_response: missing passive_dns"
        );
    }

    #[test]
    fn test_adapter_error_kind_serialization() {
        let json = serde_json::to_string(&AdapterErrorKind::NetworkFailure).unwrap();
        assert_eq!(json, "\"network_failure\"");
    }
}
