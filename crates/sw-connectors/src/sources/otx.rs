//! AlienVault OTX passive DNS source.

use super::{as_string, HttpSource, HttpSourceConfig};
use crate::model::{normalize_domain, AssetType, DiscoveredAsset};
use crate::secret::ApiSecret;
use crate::seed::Seed;
use crate::traits::{
    AdapterError, AuthConfig, Connector, ConnectorError, ConnectorHealth, ConnectorResult,
    DiscoverySource, RawProviderPayload,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{debug, info, instrument};

/// Configuration for the OTX source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtxConfig {
    #[serde(flatten)]
    pub http: HttpSourceConfig,
    /// OTX API key, sent in the `X-OTX-API-KEY` header.
    #[serde(default)]
    pub api_key: Option<ApiSecret>,
}

/// Passive DNS lookups against AlienVault OTX.
pub struct OtxSource {
    inner: HttpSource,
}

impl OtxSource {
    pub fn new(mut config: OtxConfig) -> ConnectorResult<Self> {
        if matches!(config.http.connector.auth, AuthConfig::None) {
            if let Some(key) = config.api_key.clone() {
                config.http.connector.auth = AuthConfig::ApiKey {
                    key,
                    header_name: "X-OTX-API-KEY".to_string(),
                };
            }
        }
        let inner = HttpSource::new(&config.http)?;
        info!(source = %inner.name(), "OTX passive DNS source initialized");
        Ok(Self { inner })
    }

    fn path_for(seed: &Seed) -> String {
        match seed {
            Seed::Domain(domain) => format!("/api/v1/indicators/domain/{}/passive_dns", domain),
            Seed::Ipv4(ip) => format!("/api/v1/indicators/IPv4/{}/passive_dns", ip),
        }
    }

    /// Only A records carry an identity we can use.
    fn a_records(payload: &RawProviderPayload) -> Vec<(String, IpAddr)> {
        let records = payload
            .body
            .get("passive_dns")
            .and_then(|v| v.as_array())
            .map(|v| v.as_slice())
            .unwrap_or_default();

        records
            .iter()
            .filter(|r| {
                as_string(r, &["record_type"])
                    .map(|t| t.eq_ignore_ascii_case("A"))
                    .unwrap_or(false)
            })
            .filter_map(|r| {
                let hostname = normalize_domain(&as_string(r, &["hostname"])?);
                let ip = as_string(r, &["address"])?.parse::<IpAddr>().ok()?;
                (!hostname.is_empty()).then_some((hostname, ip))
            })
            .collect()
    }

    fn normalize_domain_seed(
        &self,
        seed_domain: &str,
        records: Vec<(String, IpAddr)>,
    ) -> Vec<DiscoveredAsset> {
        // OTX lists the most recent observation first.
        let mut latest: BTreeMap<String, IpAddr> = BTreeMap::new();
        for (hostname, ip) in records {
            if hostname == seed_domain || hostname.ends_with(&format!(".{}", seed_domain)) {
                latest.entry(hostname).or_insert(ip);
            }
        }

        latest
            .into_iter()
            .map(|(hostname, ip)| {
                let asset_type = if hostname == seed_domain {
                    AssetType::Domain
                } else {
                    AssetType::Subdomain
                };
                DiscoveredAsset::for_domain(self.name(), &hostname, asset_type).with_ip(ip)
            })
            .collect()
    }

    fn normalize_ip_seed(
        &self,
        seed_ip: IpAddr,
        records: Vec<(String, IpAddr)>,
    ) -> Vec<DiscoveredAsset> {
        let mut host = DiscoveredAsset::for_ip(self.name(), seed_ip);
        for (hostname, ip) in records {
            if ip == seed_ip {
                host.add_hostname(&hostname);
            }
        }
        vec![host]
    }
}

#[async_trait]
impl Connector for OtxSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn connector_type(&self) -> &str {
        "passive_dns"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        Ok(self.inner.probe("/api/v1/user/me").await)
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        let response = self.inner.client().get("/api/v1/user/me").await?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl DiscoverySource for OtxSource {
    #[instrument(skip(self))]
    async fn fetch(&self, seed: &Seed) -> Result<RawProviderPayload, AdapterError> {
        match self.inner.get_json_cached(&Self::path_for(seed), &[]).await {
            Ok(body) => {
                if !body.is_object() {
                    return Err(AdapterError::malformed(
                        self.name(),
                        "expected a JSON object with passive_dns",
                    ));
                }
                Ok(RawProviderPayload::new(self.name(), seed.clone(), body))
            }
            Err(ConnectorError::NotFound(_)) => {
                debug!(seed = %seed, "OTX has no passive DNS for seed");
                Ok(RawProviderPayload::empty(self.name(), seed.clone()))
            }
            Err(err) => Err(AdapterError::from_connector(self.name(), err)),
        }
    }

    fn normalize(&self, payload: &RawProviderPayload) -> Vec<DiscoveredAsset> {
        let records = Self::a_records(payload);
        match &payload.seed {
            Seed::Domain(domain) => self.normalize_domain_seed(domain, records),
            Seed::Ipv4(ip) if !records.is_empty() => {
                self.normalize_ip_seed(IpAddr::V4(*ip), records)
            }
            Seed::Ipv4(_) => Vec::new(),
        }
    }
}
