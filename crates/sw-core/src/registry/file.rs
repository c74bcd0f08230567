//! Registry persisted as a JSON snapshot file.
//!
//! Every mutation rewrites the whole snapshot through a temporary file and
//! a rename. If the write fails the in-memory change is rolled back, so
//! memory and disk never disagree about a key.

use super::{InMemoryRegistry, RegistryError, RegistryResult, RegistryStore};
use crate::filter::FilterSpec;
use crate::models::Asset;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use sw_connectors::IdentityKey;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// [`InMemoryRegistry`] backed by a JSON file.
pub struct JsonFileRegistry {
    path: PathBuf,
    inner: InMemoryRegistry,
    /// Serializes writers so each flush reflects every earlier mutation.
    write_lock: Mutex<()>,
}

impl JsonFileRegistry {
    /// Opens the snapshot at `path`. A missing file is an empty registry.
    pub async fn open(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let assets = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(|b| b.is_ascii_whitespace()) => Vec::new(),
            Ok(bytes) => serde_json::from_slice::<Vec<Asset>>(&bytes).map_err(|e| {
                RegistryError::Persistence(format!("{}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(RegistryError::Persistence(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        };

        info!(path = %path.display(), assets = assets.len(), "Opened registry snapshot");
        Ok(Self {
            inner: InMemoryRegistry::with_assets(assets)?,
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self) -> RegistryResult<()> {
        let assets = self.inner.list(None).await?;
        let body = serde_json::to_vec_pretty(&assets)
            .map_err(|e| RegistryError::Persistence(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        let persist = async {
            tokio::fs::write(&tmp, &body).await?;
            tokio::fs::rename(&tmp, &self.path).await
        };
        persist.await.map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "Failed to write registry snapshot");
            RegistryError::Persistence(format!("{}: {}", self.path.display(), e))
        })?;

        debug!(path = %self.path.display(), assets = assets.len(), "Flushed registry snapshot");
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for JsonFileRegistry {
    async fn upsert(&self, asset: Asset) -> RegistryResult<Asset> {
        let key = asset
            .identity_key()
            .ok_or(RegistryError::MissingIdentity(asset.id))?;

        let _guard = self.write_lock.lock().await;
        let previous = self.inner.get(&key).await?;
        let stored = self.inner.upsert(asset).await?;
        if let Err(e) = self.flush().await {
            self.inner.restore(&key, previous).await;
            return Err(e);
        }
        Ok(stored)
    }

    async fn bulk_delete(&self, keys: &[IdentityKey]) -> RegistryResult<usize> {
        let _guard = self.write_lock.lock().await;
        let removed = self.inner.take(keys).await;
        if removed.is_empty() {
            return Ok(0);
        }
        let count = removed.len();
        if let Err(e) = self.flush().await {
            self.inner.reinsert(removed).await;
            return Err(e);
        }
        Ok(count)
    }

    async fn list(&self, filter: Option<&FilterSpec>) -> RegistryResult<Vec<Asset>> {
        self.inner.list(filter).await
    }

    async fn get(&self, key: &IdentityKey) -> RegistryResult<Option<Asset>> {
        self.inner.get(key).await
    }

    async fn snapshot(&self) -> RegistryResult<HashMap<IdentityKey, Asset>> {
        self.inner.snapshot().await
    }

    async fn count(&self) -> RegistryResult<usize> {
        self.inner.count().await
    }
}
