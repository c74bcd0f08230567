//! Censys hosts source.

use super::{as_string, as_u16, find_value, string_list, HttpSource, HttpSourceConfig};
use crate::model::{DiscoveredAsset, Port, PortMetadata, PortState, Protocol};
use crate::secret::ApiSecret;
use crate::seed::Seed;
use crate::traits::{
    AdapterError, AuthConfig, Connector, ConnectorError, ConnectorHealth, ConnectorResult,
    DiscoverySource, RawProviderPayload,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;
use tracing::{debug, info, instrument};

fn default_per_page() -> u32 {
    50
}

/// Configuration for the Censys source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CensysConfig {
    #[serde(flatten)]
    pub http: HttpSourceConfig,
    /// Censys API ID.
    #[serde(default)]
    pub api_id: Option<String>,
    /// Censys API secret.
    #[serde(default)]
    pub api_secret: Option<ApiSecret>,
    /// Hits requested per search page.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

/// Censys hosts search and host lookup.
pub struct CensysSource {
    inner: HttpSource,
    per_page: String,
}

impl CensysSource {
    pub fn new(mut config: CensysConfig) -> ConnectorResult<Self> {
        if matches!(config.http.connector.auth, AuthConfig::None) {
            if let (Some(api_id), Some(api_secret)) =
                (config.api_id.clone(), config.api_secret.clone())
            {
                config.http.connector.auth = AuthConfig::Basic {
                    username: api_id,
                    password: api_secret,
                };
            }
        }

        let inner = HttpSource::new(&config.http)?;
        info!(source = %inner.name(), "Censys hosts source initialized");
        Ok(Self {
            inner,
            per_page: config.per_page.to_string(),
        })
    }

    fn host_hits(body: &Value) -> Vec<&Value> {
        for path in ["result.hits", "hits"] {
            if let Some(hits) = find_value(body, path).and_then(|v| v.as_array()) {
                return hits.iter().collect();
            }
        }
        // A single host lookup answers with `result` being the host itself.
        match find_value(body, "result") {
            Some(host) if host.get("ip").is_some() => vec![host],
            _ => Vec::new(),
        }
    }

    fn normalize_host(&self, host: &Value) -> Option<DiscoveredAsset> {
        let ip: IpAddr = as_string(host, &["ip"])?.parse().ok()?;
        let mut asset = DiscoveredAsset::for_ip(self.name(), ip);

        for name in string_list(host, "dns.names") {
            asset.add_hostname(&name);
        }
        for name in string_list(host, "dns.reverse_dns.names") {
            asset.add_hostname(&name);
        }
        asset.os = as_string(host, &["operating_system.product", "operating_system.vendor"]);

        let services = host.get("services").and_then(|v| v.as_array());
        for service in services.into_iter().flatten() {
            if let Some(port) = Self::port_from_service(service) {
                asset.add_port(port);
            }
        }
        Some(asset)
    }

    fn port_from_service(service: &Value) -> Option<Port> {
        let portid = as_u16(service, &["port"])?;
        let protocol = as_string(service, &["transport_protocol"])
            .and_then(|t| t.parse::<Protocol>().ok())
            .unwrap_or(Protocol::Tcp);
        let mut port = Port::new(protocol, portid, PortState::Open)?;
        port.service = as_string(service, &["service_name", "extended_service_name"])
            .map(|s| s.to_ascii_lowercase())
            .filter(|s| s != "unknown");
        port.product = service
            .get("software")
            .and_then(|v| v.as_array())
            .and_then(|sw| sw.first())
            .and_then(|sw| as_string(sw, &["product"]));
        let metadata = PortMetadata {
            extra_info: as_string(service, &["banner"]).map(|b| b.chars().take(120).collect()),
            method: Some("probe".to_string()),
            ..PortMetadata::default()
        };
        Some(port.with_metadata(metadata))
    }
}

#[async_trait]
impl Connector for CensysSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn connector_type(&self) -> &str {
        "scanner"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "health_check".to_string(),
            "test_connection".to_string(),
            "host_lookup".to_string(),
            "host_search".to_string(),
        ]
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.inner.client().get("/v2/account").await {
            Ok(response) if response.status().is_success() => Ok(ConnectorHealth::Healthy),
            Ok(response) => Ok(ConnectorHealth::Degraded(format!(
                "Unexpected status code {}",
                response.status()
            ))),
            Err(ConnectorError::AuthenticationFailed(_)) => Ok(ConnectorHealth::Unhealthy(
                "Authentication failed".to_string(),
            )),
            Err(err) => Ok(ConnectorHealth::Unhealthy(err.to_string())),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        let response = self.inner.client().get("/v2/account").await?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl DiscoverySource for CensysSource {
    #[instrument(skip(self))]
    async fn fetch(&self, seed: &Seed) -> Result<RawProviderPayload, AdapterError> {
        let result = match seed {
            Seed::Ipv4(ip) => {
                self.inner
                    .get_json_cached(&format!("/v2/hosts/{}", ip), &[])
                    .await
            }
            Seed::Domain(domain) => {
                let query = format!("dns.names: {}", domain);
                self.inner
                    .get_json_cached(
                        "/v2/hosts/search",
                        &[("q", query.as_str()), ("per_page", self.per_page.as_str())],
                    )
                    .await
            }
        };

        match result {
            Ok(body) => Ok(RawProviderPayload::new(self.name(), seed.clone(), body)),
            Err(ConnectorError::NotFound(_)) => {
                debug!(seed = %seed, "Censys has no hosts for seed");
                Ok(RawProviderPayload::empty(self.name(), seed.clone()))
            }
            Err(err) => Err(AdapterError::from_connector(self.name(), err)),
        }
    }

    fn normalize(&self, payload: &RawProviderPayload) -> Vec<DiscoveredAsset> {
        Self::host_hits(&payload.body)
            .into_iter()
            .filter_map(|host| self.normalize_host(host))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_connector_config;
    use crate::AssetType;
    use serde_json::json;

    fn config() -> CensysConfig {
        CensysConfig {
            http: HttpSourceConfig::new(test_connector_config(
                "censys",
                "https://search.censys.io/api",
            )),
            api_id: None,
            api_secret: None,
            per_page: default_per_page(),
        }
    }

    #[test]
    fn test_connector_identity() {
        let source = CensysSource::new(config()).unwrap();
        assert_eq!(source.name(), "censys");
        assert!(source.capabilities().contains(&"host_search".to_string()));
    }

    #[test]
    fn test_normalize_search_hits() {
        let body = json!({"code": 200, "result": {"hits": [
            {
                "ip": "203.0.113.10",
                "dns": {"names": ["shop.example.com"]},
                "operating_system": {"product": "Ubuntu"},
                "services": [
                    {"port": 22, "service_name": "SSH", "transport_protocol": "TCP",
                     "software": [{"product": "openssh"}]},
                    {"port": 53, "service_name": "DNS", "transport_protocol": "UDP"},
                    {"port": 8443, "service_name": "UNKNOWN"}
                ]
            },
            {"dns": {"names": ["no-ip.example.com"]}}
        ]}});
        let source = CensysSource::new(config()).unwrap();
        let payload = RawProviderPayload::new("censys", "example.com".parse().unwrap(), body);
        let assets = source.normalize(&payload);

        assert_eq!(assets.len(), 1);
        let host = &assets[0];
        assert_eq!(host.asset_type, AssetType::Host);
        assert_eq!(host.os.as_deref(), Some("Ubuntu"));
        assert!(host.hostnames.contains("shop.example.com"));
        assert_eq!(host.ports.len(), 3);

        let ssh = host.ports.iter().find(|p| p.portid == 22).unwrap();
        assert_eq!(ssh.service.as_deref(), Some("ssh"));
        assert_eq!(ssh.product.as_deref(), Some("openssh"));
        let dns = host.ports.iter().find(|p| p.portid == 53).unwrap();
        assert_eq!(dns.protocol, Protocol::Udp);
        let unknown = host.ports.iter().find(|p| p.portid == 8443).unwrap();
        assert!(unknown.service.is_none());
    }

    #[test]
    fn test_normalize_single_host_lookup() {
        let body = json!({"result": {"ip": "203.0.113.11", "services": []}});
        let source = CensysSource::new(config()).unwrap();
        let payload = RawProviderPayload::new("censys", "203.0.113.11".parse().unwrap(), body);
        assert_eq!(source.normalize(&payload).len(), 1);
    }

    #[test]
    fn test_auth_from_api_id_secret() {
        let mut config = config();
        config.api_id = Some("id".to_string());
        config.api_secret = Some(ApiSecret::new("secret"));
        assert!(CensysSource::new(config).is_ok());
    }
}
