//! Asset registry storage.
//!
//! The registry holds exactly one [`Asset`] per identity key. Writes go
//! through [`RegistryStore::upsert`], which merges into an existing entry
//! instead of replacing it, so committing the same candidate twice leaves a
//! single entry with refreshed provenance.

pub mod file;

pub use file::JsonFileRegistry;

use crate::filter::{FilterError, FilterSpec};
use crate::models::Asset;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use sw_connectors::IdentityKey;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Errors that can occur in the registry.
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    /// The record has neither a domain nor an IP.
    #[error("Asset {0} has no domain or ip to key on")]
    MissingIdentity(uuid::Uuid),

    /// The write could not be persisted.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Storage for registry assets, keyed by identity key.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Inserts the asset, or merges it into the entry sharing its key.
    ///
    /// The read-merge-write for one key is atomic. Returns the stored record.
    async fn upsert(&self, asset: Asset) -> RegistryResult<Asset>;

    /// Removes the given keys; missing keys are skipped. Returns how many
    /// entries were removed.
    async fn bulk_delete(&self, keys: &[IdentityKey]) -> RegistryResult<usize>;

    /// Lists assets ordered by identity key, optionally filtered.
    async fn list(&self, filter: Option<&FilterSpec>) -> RegistryResult<Vec<Asset>>;

    /// Gets the entry for one key.
    async fn get(&self, key: &IdentityKey) -> RegistryResult<Option<Asset>>;

    /// Copy of every entry, for reconciliation.
    async fn snapshot(&self) -> RegistryResult<HashMap<IdentityKey, Asset>>;

    /// Number of entries.
    async fn count(&self) -> RegistryResult<usize>;
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

/// In-memory registry.
#[derive(Clone)]
pub struct InMemoryRegistry {
    assets: Arc<RwLock<HashMap<IdentityKey, Asset>>>,
}

impl InMemoryRegistry {
    /// Creates a new empty in-memory registry.
    pub fn new() -> Self {
        Self {
            assets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creates a registry pre-populated with `assets`, merging duplicates.
    pub fn with_assets(assets: Vec<Asset>) -> RegistryResult<Self> {
        let mut map: HashMap<IdentityKey, Asset> = HashMap::new();
        for asset in assets {
            let key = asset
                .identity_key()
                .ok_or(RegistryError::MissingIdentity(asset.id))?;
            match map.get_mut(&key) {
                Some(stored) => stored.merge_from(&asset),
                None => {
                    map.insert(key, asset);
                }
            }
        }
        Ok(Self {
            assets: Arc::new(RwLock::new(map)),
        })
    }

    /// Puts back an entry as it was before a failed write.
    pub(crate) async fn restore(&self, key: &IdentityKey, previous: Option<Asset>) {
        let mut assets = self.assets.write().await;
        match previous {
            Some(asset) => {
                assets.insert(key.clone(), asset);
            }
            None => {
                assets.remove(key);
            }
        }
    }

    /// Puts back entries removed by a failed delete.
    pub(crate) async fn reinsert(&self, removed: Vec<(IdentityKey, Asset)>) {
        let mut assets = self.assets.write().await;
        for (key, asset) in removed {
            assets.insert(key, asset);
        }
    }

    /// Removes keys, returning what was removed.
    pub(crate) async fn take(&self, keys: &[IdentityKey]) -> Vec<(IdentityKey, Asset)> {
        let mut assets = self.assets.write().await;
        keys.iter()
            .filter_map(|key| assets.remove(key).map(|a| (key.clone(), a)))
            .collect()
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(mut assets: Vec<(IdentityKey, Asset)>) -> Vec<Asset> {
    assets.sort_by(|a, b| a.0.cmp(&b.0));
    assets.into_iter().map(|(_, a)| a).collect()
}

#[async_trait]
impl RegistryStore for InMemoryRegistry {
    async fn upsert(&self, asset: Asset) -> RegistryResult<Asset> {
        let key = asset
            .identity_key()
            .ok_or(RegistryError::MissingIdentity(asset.id))?;

        let mut assets = self.assets.write().await;
        let stored = match assets.get_mut(&key) {
            Some(existing) => {
                existing.merge_from(&asset);
                debug!(identity_key = %key, "Merged into registry entry");
                existing.clone()
            }
            None => {
                debug!(identity_key = %key, "Created registry entry");
                assets.insert(key, asset.clone());
                asset
            }
        };
        Ok(stored)
    }

    async fn bulk_delete(&self, keys: &[IdentityKey]) -> RegistryResult<usize> {
        Ok(self.take(keys).await.len())
    }

    async fn list(&self, filter: Option<&FilterSpec>) -> RegistryResult<Vec<Asset>> {
        let all = {
            let assets = self.assets.read().await;
            sorted(assets.iter().map(|(k, a)| (k.clone(), a.clone())).collect())
        };
        match filter {
            Some(spec) => Ok(spec.apply(&all)?),
            None => Ok(all),
        }
    }

    async fn get(&self, key: &IdentityKey) -> RegistryResult<Option<Asset>> {
        let assets = self.assets.read().await;
        Ok(assets.get(key).cloned())
    }

    async fn snapshot(&self) -> RegistryResult<HashMap<IdentityKey, Asset>> {
        let assets = self.assets.read().await;
        Ok(assets.clone())
    }

    async fn count(&self) -> RegistryResult<usize> {
        let assets = self.assets.read().await;
        Ok(assets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use sw_connectors::testing::{sample_domain, sample_host};
    use sw_connectors::AssetType;

    fn asset(source: &str, domain: &str, ports: &[u16]) -> Asset {
        Asset::from_candidate(&sample_domain(source, domain, ports), Utc::now())
    }

    #[tokio::test]
    async fn test_upsert_creates_then_merges() {
        let registry = InMemoryRegistry::new();
        let first = registry.upsert(asset("shodan", "example.com", &[80, 443])).await.unwrap();
        let second = registry.upsert(asset("otx", "example.com", &[22])).await.unwrap();

        assert_eq!(registry.count().await.unwrap(), 1);
        assert_eq!(first.id, second.id);
        let ids: Vec<u16> = second.ports.iter().map(|p| p.portid).collect();
        assert_eq!(ids, vec![22, 80, 443]);
        assert_eq!(second.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_idempotent() {
        let registry = InMemoryRegistry::new();
        let t1 = Utc::now();
        let t2 = t1 + Duration::hours(1);
        let candidate = sample_domain("shodan", "example.com", &[80]);

        registry.upsert(Asset::from_candidate(&candidate, t1)).await.unwrap();
        let stored = registry.upsert(Asset::from_candidate(&candidate, t2)).await.unwrap();

        assert_eq!(registry.count().await.unwrap(), 1);
        assert_eq!(stored.sources.get("shodan"), Some(&t2));
        assert_eq!(stored.ports.len(), 1);
        assert_eq!(stored.created_at, t1);
    }

    #[tokio::test]
    async fn test_upsert_without_identity() {
        let registry = InMemoryRegistry::new();
        let mut record = Asset::from_candidate(&sample_host("a", "192.0.2.1"), Utc::now());
        record.ip = None;
        assert!(matches!(
            registry.upsert(record).await,
            Err(RegistryError::MissingIdentity(_))
        ));
    }

    #[tokio::test]
    async fn test_bulk_delete_skips_missing() {
        let registry = InMemoryRegistry::new();
        registry.upsert(asset("a", "one.example", &[])).await.unwrap();
        registry.upsert(asset("a", "two.example", &[])).await.unwrap();

        let removed = registry
            .bulk_delete(&[
                IdentityKey::new("one.example", AssetType::Domain),
                IdentityKey::new("missing.example", AssetType::Domain),
            ])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(registry.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_sorted_and_filtered() {
        let registry = InMemoryRegistry::new();
        registry.upsert(asset("a", "b.com", &[])).await.unwrap();
        registry.upsert(asset("a", "a.com", &[])).await.unwrap();

        let all = registry.list(None).await.unwrap();
        assert_eq!(all[0].domain.as_deref(), Some("a.com"));

        let spec = FilterSpec::new().with("domain", "b.");
        let filtered = registry.list(Some(&spec)).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].domain.as_deref(), Some("b.com"));

        let bad = FilterSpec::new().with("nope", "x");
        assert!(matches!(
            registry.list(Some(&bad)).await,
            Err(RegistryError::Filter(FilterError::UnknownField { .. }))
        ));
    }

    #[tokio::test]
    async fn test_with_assets_merges_duplicates() {
        let registry = InMemoryRegistry::with_assets(vec![
            asset("a", "example.com", &[80]),
            asset("b", "example.com", &[443]),
        ])
        .unwrap();
        let key = IdentityKey::new("example.com", AssetType::Domain);
        let stored = registry.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.ports.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_same_key() {
        let registry = Arc::new(InMemoryRegistry::new());
        let mut handles = Vec::new();
        for port in 1..=20u16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .upsert(asset("shodan", "example.com", &[port]))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let key = IdentityKey::new("example.com", AssetType::Domain);
        let stored = registry.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.ports.len(), 20);
    }
}
