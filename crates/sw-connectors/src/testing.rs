//! Testing harness for discovery sources.
//!
//! Provides helper functions to build configs and candidates in tests.

use crate::model::{AssetType, DiscoveredAsset, Port, PortState, Protocol};
use crate::secret::ApiSecret;
use crate::traits::{AuthConfig, ConnectorConfig, ConnectorHealth, ConnectorResult};
use std::collections::HashMap;
use std::net::IpAddr;

/// Creates a test connector config with sensible defaults.
pub fn test_connector_config(name: &str, base_url: &str) -> ConnectorConfig {
    ConnectorConfig {
        name: name.to_string(),
        base_url: base_url.to_string(),
        auth: AuthConfig::None,
        timeout_secs: 30,
        max_retries: 0,
        headers: HashMap::new(),
    }
}

/// Creates a test connector config with a query-parameter API key.
pub fn test_connector_config_with_key(name: &str, base_url: &str, key: &str) -> ConnectorConfig {
    ConnectorConfig {
        auth: AuthConfig::QueryParam {
            key: ApiSecret::new(key),
            param_name: "key".to_string(),
        },
        ..test_connector_config(name, base_url)
    }
}

/// A domain candidate reported by `source` with open TCP `ports`.
pub fn sample_domain(source: &str, domain: &str, ports: &[u16]) -> DiscoveredAsset {
    let mut asset = DiscoveredAsset::for_domain(source, domain, AssetType::Domain);
    for port in ports.iter().filter_map(|p| Port::open_tcp(*p)) {
        asset.add_port(port);
    }
    asset
}

/// A host candidate reported by `source`.
pub fn sample_host(source: &str, ip: &str) -> DiscoveredAsset {
    let ip: IpAddr = ip.parse().unwrap_or(IpAddr::from([192, 0, 2, 1]));
    DiscoveredAsset::for_ip(source, ip)
}

/// A TCP port in the given state.
pub fn tcp_port(portid: u16, state: PortState) -> Port {
    Port::new(Protocol::Tcp, portid, state).unwrap_or_else(|| panic!("port {} is invalid", portid))
}

/// Asserts that a connector health check returns healthy.
pub fn assert_healthy(result: &ConnectorResult<ConnectorHealth>) {
    match result {
        Ok(ConnectorHealth::Healthy) => {}
        other => panic!("Expected Healthy, got {:?}", other),
    }
}

/// Asserts that a connector health check returns unhealthy.
pub fn assert_unhealthy(result: &ConnectorResult<ConnectorHealth>) {
    match result {
        Ok(ConnectorHealth::Unhealthy(_)) => {}
        other => panic!("Expected Unhealthy, got {:?}", other),
    }
}
