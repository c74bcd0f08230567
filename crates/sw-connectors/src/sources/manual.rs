//! Manual entry source.
//!
//! Operators register records by hand; a discovery for a seed returns the
//! records that fall under it (the seed itself, its subdomains, or the
//! matching IP).

use crate::model::{normalize_domain, DiscoveredAsset};
use crate::seed::Seed;
use crate::traits::{
    AdapterError, Connector, ConnectorHealth, ConnectorResult, DiscoverySource,
    RawProviderPayload,
};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// In-memory source fed by operator input.
pub struct ManualSource {
    name: String,
    entries: Arc<RwLock<Vec<DiscoveredAsset>>>,
}

impl ManualSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Registers a record. Records without a domain or IP are refused.
    pub async fn add(&self, mut asset: DiscoveredAsset) -> bool {
        if asset.identity_key().is_none() {
            return false;
        }
        asset.domain = asset.domain.as_deref().map(normalize_domain);
        asset.source_name = self.name.clone();
        self.entries.write().await.push(asset);
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    fn matches(asset: &DiscoveredAsset, seed: &Seed) -> bool {
        match seed {
            Seed::Domain(domain) => {
                let suffix = format!(".{}", domain);
                asset
                    .domain
                    .as_deref()
                    .map(|d| d == domain || d.ends_with(&suffix))
                    .unwrap_or(false)
            }
            Seed::Ipv4(ip) => asset.ip == Some(IpAddr::V4(*ip)),
        }
    }
}

#[async_trait]
impl Connector for ManualSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "manual"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        Ok(ConnectorHealth::Healthy)
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        Ok(true)
    }
}

#[async_trait]
impl DiscoverySource for ManualSource {
    async fn fetch(&self, seed: &Seed) -> Result<RawProviderPayload, AdapterError> {
        let entries = self.entries.read().await;
        let matching: Vec<&DiscoveredAsset> =
            entries.iter().filter(|a| Self::matches(a, seed)).collect();
        let body = serde_json::to_value(&matching)
            .map_err(|e| AdapterError::malformed(&self.name, e.to_string()))?;
        Ok(RawProviderPayload::new(&self.name, seed.clone(), body))
    }

    fn normalize(&self, payload: &RawProviderPayload) -> Vec<DiscoveredAsset> {
        if payload.body.is_null() {
            return Vec::new();
        }
        match serde_json::from_value::<Vec<DiscoveredAsset>>(payload.body.clone()) {
            Ok(assets) => assets,
            Err(e) => {
                warn!(source = %self.name, error = %e, "Dropping unreadable manual payload");
                Vec::new()
            }
        }
    }
}
