//! Shodan discovery source.
//!
//! IP seeds are resolved through the host endpoint (open ports, hostnames,
//! OS); domain seeds through the DNS endpoint (subdomains and their A
//! records).

use super::{as_string, as_u16, find_value, string_list, HttpSource, HttpSourceConfig};
use crate::model::{AssetType, DiscoveredAsset, Port, PortMetadata, PortState, Protocol};
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

/// Configuration for the Shodan source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShodanConfig {
    #[serde(flatten)]
    pub http: HttpSourceConfig,
    /// Shodan API key, sent as the `key` query parameter.
    #[serde(default)]
    pub api_key: Option<ApiSecret>,
}

/// Shodan discovery source.
pub struct ShodanSource {
    inner: HttpSource,
}

impl ShodanSource {
    pub fn new(mut config: ShodanConfig) -> ConnectorResult<Self> {
        if matches!(config.http.connector.auth, AuthConfig::None) {
            if let Some(key) = config.api_key.clone() {
                config.http.connector.auth = AuthConfig::QueryParam {
                    key,
                    param_name: "key".to_string(),
                };
            }
        }
        let inner = HttpSource::new(&config.http)?;
        info!(source = %inner.name(), "Shodan source initialized");
        Ok(Self { inner })
    }

    /// Shodan sometimes answers 200 with an `error` field.
    fn check_error_body(&self, body: &Value) -> Result<(), AdapterError> {
        let Some(message) = body.get("error").and_then(|v| v.as_str()) else {
            return Ok(());
        };
        let lower = message.to_ascii_lowercase();
        if lower.contains("rate limit") || lower.contains("request limit") {
            return Err(AdapterError::throttled(self.name(), message));
        }
        Err(AdapterError::from_connector(
            self.name(),
            ConnectorError::RequestFailed(message.to_string()),
        ))
    }

    fn normalize_host(&self, host: &Value) -> Option<DiscoveredAsset> {
        let ip: IpAddr = as_string(host, &["ip_str"])?.parse().ok()?;
        let mut asset = DiscoveredAsset::for_ip(self.name(), ip);

        for hostname in string_list(host, "hostnames") {
            asset.add_hostname(&hostname);
        }
        if let Some(os) = as_string(host, &["os"]) {
            asset.os = Some(os);
        }
        if let Some(uptime) = find_value(host, "uptime").and_then(|v| v.as_u64()) {
            asset.uptime = Some(uptime.saturating_mul(60));
        }

        let banners = host.get("data").and_then(|v| v.as_array());
        for banner in banners.into_iter().flatten() {
            if let Some(port) = Self::port_from_banner(banner) {
                asset.add_port(port);
            }
        }

        // Ports listed without a banner still count as open.
        if let Some(ports) = host.get("ports").and_then(|v| v.as_array()) {
            for portid in ports.iter().filter_map(|v| v.as_u64()) {
                let Ok(portid) = u16::try_from(portid) else {
                    continue;
                };
                if asset.ports.iter().any(|p| p.portid == portid) {
                    continue;
                }
                if let Some(port) = Port::open_tcp(portid) {
                    asset.add_port(port);
                }
            }
        }

        Some(asset)
    }

    fn port_from_banner(banner: &Value) -> Option<Port> {
        let portid = as_u16(banner, &["port"])?;
        let protocol = as_string(banner, &["transport"])
            .and_then(|t| t.parse::<Protocol>().ok())
            .unwrap_or(Protocol::Tcp);
        let mut port = Port::new(protocol, portid, PortState::Open)?;
        port.service = as_string(banner, &["_shodan.module"]);
        port.product = as_string(banner, &["product"]);
        let metadata = PortMetadata {
            extra_info: as_string(banner, &["version", "info"]),
            method: Some("banner".to_string()),
            ..PortMetadata::default()
        };
        Some(port.with_metadata(metadata))
    }

    fn normalize_dns(&self, domain: &str, dns: &Value) -> Vec<DiscoveredAsset> {
        let mut apex = DiscoveredAsset::for_domain(self.name(), domain, AssetType::Domain);
        let mut subdomains: Vec<DiscoveredAsset> = string_list(dns, "subdomains")
            .into_iter()
            .map(|sub| {
                DiscoveredAsset::for_domain(
                    self.name(),
                    &format!("{}.{}", sub, domain),
                    AssetType::Subdomain,
                )
            })
            .collect();

        let records = dns.get("data").and_then(|v| v.as_array());
        for record in records.into_iter().flatten() {
            if as_string(record, &["type"]).as_deref() != Some("A") {
                continue;
            }
            let Some(ip) = as_string(record, &["value"]).and_then(|v| v.parse::<IpAddr>().ok())
            else {
                continue;
            };
            let sub = as_string(record, &["subdomain"]).unwrap_or_default();
            if sub.is_empty() {
                apex.ip = Some(ip);
                continue;
            }
            let fqdn = format!("{}.{}", sub, domain).to_ascii_lowercase();
            match subdomains
                .iter_mut()
                .find(|a| a.domain.as_deref() == Some(fqdn.as_str()))
            {
                Some(existing) => existing.ip = Some(ip),
                None => subdomains.push(
                    DiscoveredAsset::for_domain(self.name(), &fqdn, AssetType::Subdomain)
                        .with_ip(ip),
                ),
            }
        }

        let mut assets = vec![apex];
        assets.extend(subdomains);
        assets
    }
}

#[async_trait]
impl Connector for ShodanSource {
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
            "dns_lookup".to_string(),
        ]
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        Ok(self.inner.probe("/api-info").await)
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        let response = self.inner.client().get("/api-info").await?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl DiscoverySource for ShodanSource {
    #[instrument(skip(self))]
    async fn fetch(&self, seed: &Seed) -> Result<RawProviderPayload, AdapterError> {
        let (path, wrap) = match seed {
            Seed::Ipv4(ip) => (format!("/shodan/host/{}", ip), "host"),
            Seed::Domain(domain) => (format!("/dns/domain/{}", domain), "dns"),
        };

        match self.inner.get_json_cached(&path, &[]).await {
            Ok(body) => {
                self.check_error_body(&body)?;
                let mut wrapped = serde_json::Map::new();
                wrapped.insert(wrap.to_string(), body);
                Ok(RawProviderPayload::new(
                    self.name(),
                    seed.clone(),
                    Value::Object(wrapped),
                ))
            }
            Err(ConnectorError::NotFound(_)) => {
                debug!(seed = %seed, "Shodan has no data for seed");
                Ok(RawProviderPayload::empty(self.name(), seed.clone()))
            }
            Err(err) => Err(AdapterError::from_connector(self.name(), err)),
        }
    }

    fn normalize(&self, payload: &RawProviderPayload) -> Vec<DiscoveredAsset> {
        if let Some(host) = payload.body.get("host") {
            return self.normalize_host(host).into_iter().collect();
        }
        match (&payload.seed, payload.body.get("dns")) {
            (Seed::Domain(domain), Some(dns)) => self.normalize_dns(domain, dns),
            _ => Vec::new(),
        }
    }
}
