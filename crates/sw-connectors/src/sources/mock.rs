//! Mock discovery source for testing.
//!
//! Returns preconfigured candidates per seed and supports failure injection
//! (errors, throttling, latency, malformed payloads) without any network.

use crate::model::DiscoveredAsset;
use crate::seed::Seed;
use crate::traits::{
    AdapterError, Connector, ConnectorError, ConnectorHealth, ConnectorResult, DiscoverySource,
    RawProviderPayload,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Behavior configuration for failure injection.
#[derive(Debug, Clone, Default)]
pub enum MockBehavior {
    /// Return responses normally.
    #[default]
    Normal,
    /// Fail with a specific error after N calls.
    FailAfter { calls: u64, error: ConnectorError },
    /// Fail for specific seeds.
    FailOn {
        seeds: Vec<String>,
        error: ConnectorError,
    },
    /// Simulate latency before answering.
    WithLatency(Duration),
    /// Always fail.
    AlwaysFail(ConnectorError),
    /// Answer every call with a throttle signal.
    Throttle,
    /// Answer with a payload that cannot be normalized.
    MalformedPayload,
    /// Simulate being unhealthy.
    Unhealthy(String),
}

/// Record of a fetch for test verification.
#[derive(Debug, Clone)]
pub struct FetchRecord {
    pub seed: String,
    pub timestamp: DateTime<Utc>,
}

/// Mock discovery source.
pub struct MockSource {
    name: String,
    /// Preconfigured candidates keyed by seed.
    responses: Arc<RwLock<HashMap<String, Vec<DiscoveredAsset>>>>,
    call_count: AtomicU64,
    behavior: Arc<RwLock<MockBehavior>>,
    fetch_history: Arc<RwLock<Vec<FetchRecord>>>,
}

impl MockSource {
    /// Creates a mock source with no responses.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            responses: Arc::new(RwLock::new(HashMap::new())),
            call_count: AtomicU64::new(0),
            behavior: Arc::new(RwLock::new(MockBehavior::Normal)),
            fetch_history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Creates a mock source with an initial behavior.
    pub fn with_behavior(name: &str, behavior: MockBehavior) -> Self {
        let mut source = Self::new(name);
        source.behavior = Arc::new(RwLock::new(behavior));
        source
    }

    /// Sets the candidates returned for `seed`. Their `source_name` is rewritten.
    pub async fn set_response(&self, seed: &str, assets: Vec<DiscoveredAsset>) {
        let assets = assets
            .into_iter()
            .map(|mut a| {
                a.source_name = self.name.clone();
                a
            })
            .collect();
        self.responses
            .write()
            .await
            .insert(seed.trim().to_ascii_lowercase(), assets);
    }

    /// Sets the behavior for failure injection.
    pub async fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.write().await = behavior;
    }

    /// Gets the fetch history for test verification.
    pub async fn get_fetch_history(&self) -> Vec<FetchRecord> {
        self.fetch_history.read().await.clone()
    }

    /// Resets the call counter.
    pub fn reset_call_count(&self) {
        self.call_count.store(0, Ordering::SeqCst);
    }

    /// Gets the current call count.
    pub fn get_call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    async fn record_and_check(&self, seed: &str) -> Result<bool, AdapterError> {
        self.fetch_history.write().await.push(FetchRecord {
            seed: seed.to_string(),
            timestamp: Utc::now(),
        });
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;

        // Clone out so the lock is not held while sleeping.
        let behavior = self.behavior.read().await.clone();
        let failure = match behavior {
            MockBehavior::Normal | MockBehavior::Unhealthy(_) => None,
            MockBehavior::FailAfter { calls, error } => (count > calls).then_some(error),
            MockBehavior::FailOn { seeds, error } => {
                seeds.iter().any(|s| s == seed).then_some(error)
            }
            MockBehavior::WithLatency(duration) => {
                tokio::time::sleep(duration).await;
                None
            }
            MockBehavior::AlwaysFail(error) => Some(error),
            MockBehavior::Throttle => Some(ConnectorError::RateLimited(60)),
            MockBehavior::MalformedPayload => return Ok(true),
        };

        match failure {
            Some(error) => Err(AdapterError::from_connector(&self.name, error)),
            None => Ok(false),
        }
    }
}

#[async_trait]
impl Connector for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "mock"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match &*self.behavior.read().await {
            MockBehavior::Unhealthy(reason) => Ok(ConnectorHealth::Unhealthy(reason.clone())),
            MockBehavior::AlwaysFail(_) => {
                Ok(ConnectorHealth::Unhealthy("Always failing".to_string()))
            }
            MockBehavior::Throttle => Ok(ConnectorHealth::Degraded("Throttling".to_string())),
            _ => Ok(ConnectorHealth::Healthy),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        match &*self.behavior.read().await {
            MockBehavior::AlwaysFail(e) => Err(e.clone()),
            MockBehavior::Unhealthy(_) => Ok(false),
            _ => Ok(true),
        }
    }
}

#[async_trait]
impl DiscoverySource for MockSource {
    async fn fetch(&self, seed: &Seed) -> Result<RawProviderPayload, AdapterError> {
        let query = seed.as_query();
        let malformed = self.record_and_check(&query).await?;
        if malformed {
            return Ok(RawProviderPayload::new(
                &self.name,
                seed.clone(),
                serde_json::Value::String("<html>502 Bad Gateway</html>".to_string()),
            ));
        }

        let responses = self.responses.read().await;
        match responses.get(&query) {
            Some(assets) => {
                let body = serde_json::to_value(assets)
                    .map_err(|e| AdapterError::malformed(&self.name, e.to_string()))?;
                Ok(RawProviderPayload::new(&self.name, seed.clone(), body))
            }
            None => Ok(RawProviderPayload::empty(&self.name, seed.clone())),
        }
    }

    fn normalize(&self, payload: &RawProviderPayload) -> Vec<DiscoveredAsset> {
        serde_json::from_value::<Vec<DiscoveredAsset>>(payload.body.clone()).unwrap_or_default()
    }
}
