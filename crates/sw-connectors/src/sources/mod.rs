//! Discovery source implementations.
//!
//! HTTP-backed sources (Shodan, OTX, Censys) share [`HttpSource`], which owns
//! the paced HTTP client and the per-source response cache. The manual and
//! mock sources hold their records in memory.

pub mod censys;
pub mod manual;
pub mod mock;
pub mod otx;
pub mod shodan;

pub use self::censys::{CensysConfig, CensysSource};
pub use self::manual::ManualSource;
pub use self::mock::{MockBehavior, MockSource};
pub use self::otx::{OtxConfig, OtxSource};
pub use self::shodan::{ShodanConfig, ShodanSource};

use crate::http::{HttpClient, RateLimitConfig, ResponseCache};
use crate::traits::{ConnectorConfig, ConnectorHealth, ConnectorResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

fn default_requests_per_minute() -> u32 {
    60
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_max_entries() -> u64 {
    1000
}

/// Settings shared by every HTTP-backed source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// Base connector configuration.
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    /// Request pacing towards the provider.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// TTL of cached provider answers; 0 disables the cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Maximum number of cached answers.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: u64,
}

impl HttpSourceConfig {
    /// Wraps a connector config with default pacing and caching.
    pub fn new(connector: ConnectorConfig) -> Self {
        Self {
            connector,
            requests_per_minute: default_requests_per_minute(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

/// HTTP client plus response cache, embedded by each HTTP-backed source.
pub struct HttpSource {
    name: String,
    client: HttpClient,
    cache: Option<ResponseCache<Value>>,
}

impl HttpSource {
    pub fn new(config: &HttpSourceConfig) -> ConnectorResult<Self> {
        let client = HttpClient::with_rate_limit(
            config.connector.clone(),
            Some(RateLimitConfig::per_minute(config.requests_per_minute)),
        )?;
        let cache = (config.cache_ttl_secs > 0).then(|| {
            ResponseCache::new(
                Duration::from_secs(config.cache_ttl_secs),
                config.cache_max_entries,
            )
        });
        Ok(Self {
            name: config.connector.name.clone(),
            client,
            cache,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// GET a JSON document, answering from the cache when possible.
    ///
    /// Only successful answers are cached.
    pub async fn get_json_cached(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ConnectorResult<Value> {
        let key = cache_key(path, query);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key).await {
                debug!(source = %self.name, key = %key, "Response cache hit");
                return Ok(hit);
            }
        }

        let value = if query.is_empty() {
            self.client.get_json(path).await?
        } else {
            self.client.get_json_with_query(path, query).await?
        };

        if let Some(cache) = &self.cache {
            cache.insert(key, value.clone()).await;
        }
        Ok(value)
    }

    /// Maps the status of a probe request to a health value.
    pub async fn probe(&self, path: &str) -> ConnectorHealth {
        match self.client.get(path).await {
            Ok(response) if response.status().is_success() => ConnectorHealth::Healthy,
            Ok(response) => {
                ConnectorHealth::Degraded(format!("Unexpected status code {}", response.status()))
            }
            Err(crate::ConnectorError::RateLimited(_)) => {
                ConnectorHealth::Degraded("Provider is throttling requests".to_string())
            }
            Err(err) => ConnectorHealth::Unhealthy(err.to_string()),
        }
    }
}

fn cache_key(path: &str, query: &[(&str, &str)]) -> String {
    let mut key = path.to_string();
    for (name, value) in query {
        key.push('&');
        key.push_str(name);
        key.push('=');
        key.push_str(value);
    }
    key
}

/// Walks a dotted path (`a.b.c`) into a JSON document.
pub(crate) fn find_value<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cursor = root;
    for part in path.split('.') {
        cursor = cursor.get(part)?;
    }
    Some(cursor)
}

/// First non-empty string among `paths`; numbers are stringified.
pub(crate) fn as_string(root: &Value, paths: &[&str]) -> Option<String> {
    for path in paths {
        if let Some(value) = find_value(root, path) {
            if let Some(s) = value.as_str() {
                if !s.trim().is_empty() {
                    return Some(s.trim().to_string());
                }
            }
            if let Some(n) = value.as_u64() {
                return Some(n.to_string());
            }
        }
    }
    None
}

/// First value among `paths` that fits a u16, accepting numeric strings.
pub(crate) fn as_u16(root: &Value, paths: &[&str]) -> Option<u16> {
    for path in paths {
        if let Some(value) = find_value(root, path) {
            if let Some(v) = value.as_u64() {
                return u16::try_from(v).ok();
            }
            if let Some(v) = value.as_str().and_then(|v| v.trim().parse::<u16>().ok()) {
                return Some(v);
            }
        }
    }
    None
}

/// Strings of an array at `path`; non-string members are skipped.
pub(crate) fn string_list(root: &Value, path: &str) -> Vec<String> {
    find_value(root, path)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().to_string())
                .collect()
        })
        .unwrap_or_default()
}
