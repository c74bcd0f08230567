//! Discovery orchestration.
//!
//! Fans a seed out to every enabled, non-gated source in parallel, bounds
//! each call with a per-source timeout and the whole run with an optional
//! deadline, and gathers candidates next to the errors of the sources that
//! failed. One failing source never affects the others.

use crate::clock::{Clock, SystemClock};
use crate::model::DiscoveredAsset;
use crate::rate_gate::{RateGate, DEFAULT_THROTTLE_COOLDOWN_MS};
use crate::seed::{Seed, SeedValidationError};
use crate::traits::{AdapterError, AdapterErrorKind, ConnectorHealth, DiscoverySource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sw_observability::metrics::{
    ADAPTER_ERRORS_TOTAL, ADAPTER_LATENCY_SECONDS, DISCOVERIES_TOTAL,
};
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};

/// Errors that abort a whole discovery.
#[derive(Error, Debug, Clone)]
pub enum DiscoveryError {
    #[error("Invalid seed: {0}")]
    InvalidSeed(#[from] SeedValidationError),

    #[error("No discovery sources are enabled")]
    NoSourcesConfigured,

    #[error("All {} discovery sources failed", .errors.len())]
    AllSourcesFailed { errors: Vec<AdapterError> },
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Timeout applied to each source call.
    #[serde(default = "default_timeout_per_source_ms")]
    pub timeout_per_source_ms: u64,
    /// How long a source stays gated after it signals throttling.
    #[serde(default = "default_throttle_cooldown_ms")]
    pub throttle_cooldown_ms: i64,
    /// Optional bound on a whole discovery.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

fn default_timeout_per_source_ms() -> u64 {
    30_000
}

fn default_throttle_cooldown_ms() -> i64 {
    DEFAULT_THROTTLE_COOLDOWN_MS
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_per_source_ms: default_timeout_per_source_ms(),
            throttle_cooldown_ms: default_throttle_cooldown_ms(),
            deadline_ms: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn timeout_per_source(&self) -> Duration {
        Duration::from_millis(self.timeout_per_source_ms)
    }

    pub fn throttle_cooldown(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.throttle_cooldown_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// Result of one discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryOutcome {
    pub seed: Seed,
    /// Candidates from every source that answered, in registration order.
    pub candidates: Vec<DiscoveredAsset>,
    /// Failures of individual sources, including gated ones.
    pub errors: Vec<AdapterError>,
    /// Sources that were actually invoked.
    pub sources_queried: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Status of a registered source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    pub name: String,
    pub connector_type: String,
    pub enabled: bool,
    /// Set while the rate gate suppresses the source.
    pub blocked_until: Option<DateTime<Utc>>,
    pub health: ConnectorHealth,
}

struct RegisteredSource {
    source: Arc<dyn DiscoverySource>,
    enabled: bool,
}

/// Runs discoveries across all registered sources.
pub struct DiscoveryOrchestrator {
    sources: Vec<RegisteredSource>,
    gate: Arc<RateGate>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
}

impl DiscoveryOrchestrator {
    /// Creates an orchestrator with its own rate gate and the system clock.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_gate(config, Arc::new(RateGate::new()), Arc::new(SystemClock))
    }

    /// Creates an orchestrator sharing `gate` and reading time from `clock`.
    pub fn with_gate(
        config: OrchestratorConfig,
        gate: Arc<RateGate>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sources: Vec::new(),
            gate,
            clock,
            config,
        }
    }

    /// Registers an enabled source.
    pub fn add_source(&mut self, source: Arc<dyn DiscoverySource>) {
        self.sources.push(RegisteredSource {
            source,
            enabled: true,
        });
    }

    /// Enables or disables a source by name. Returns false if unknown.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.sources.iter_mut().find(|s| s.source.name() == name) {
            Some(registered) => {
                registered.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|s| s.source.name().to_string())
            .collect()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn gate(&self) -> &Arc<RateGate> {
        &self.gate
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Runs a discovery bounded by the configured deadline, if any.
    pub async fn discover(&self, raw_seed: &str) -> Result<DiscoveryOutcome, DiscoveryError> {
        self.discover_with_deadline(raw_seed, self.config.deadline()).await
    }

    /// Runs a discovery bounded by `deadline`.
    ///
    /// The seed is validated before any source is touched. Sources still
    /// running when the deadline expires are aborted and reported as
    /// timeouts; everything collected so far is kept.
    pub async fn discover_with_deadline(
        &self,
        raw_seed: &str,
        deadline: Option<Duration>,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        let seed = Seed::parse(raw_seed).inspect_err(|e| {
            debug!(seed = raw_seed, error = %e, "Rejected discovery seed");
        })?;

        let span = sw_observability::discovery_span!(seed.to_string());
        self.run(seed, deadline).instrument(span).await
    }

    async fn run(
        &self,
        seed: Seed,
        deadline: Option<Duration>,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        let enabled: Vec<&RegisteredSource> = self.sources.iter().filter(|s| s.enabled).collect();
        if enabled.is_empty() {
            return Err(DiscoveryError::NoSourcesConfigured);
        }

        let started_at = self.clock.now();
        let started = Instant::now();
        let mut errors = Vec::new();
        let mut eligible = Vec::new();

        for registered in enabled {
            let name = registered.source.name();
            if self.gate.is_blocked(name, started_at) {
                let until = self
                    .gate
                    .blocked_until(name, started_at)
                    .map(|u| u.to_rfc3339())
                    .unwrap_or_default();
                debug!(source = name, blocked_until = %until, "Skipping gated source");
                self.record_error(
                    &mut errors,
                    AdapterError::throttled(name, format!("suppressed by rate gate until {}", until)),
                );
                continue;
            }
            if !registered.source.supports(&seed) {
                debug!(source = name, "Source does not handle this seed kind");
                continue;
            }
            eligible.push(registered.source.clone());
        }

        let sources_queried: Vec<String> =
            eligible.iter().map(|s| s.name().to_string()).collect();
        let per_source = self.config.timeout_per_source();
        let mut pending = Vec::with_capacity(eligible.len());

        for source in eligible {
            let name = source.name().to_string();
            let seed = seed.clone();
            let handle = tokio::spawn(async move {
                let start = Instant::now();
                let result = match tokio::time::timeout(per_source, source.fetch(&seed)).await {
                    Ok(Ok(payload)) => Ok(source.normalize(&payload)),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(AdapterError::timeout(source.name(), per_source)),
                };
                (result, start.elapsed())
            });
            pending.push((name, handle));
        }

        let deadline_at = deadline.map(|d| (d, tokio::time::Instant::now() + d));
        let mut candidates = Vec::new();
        let mut succeeded = 0usize;

        for (name, mut handle) in pending {
            let joined = match deadline_at {
                Some((budget, at)) => match tokio::time::timeout_at(at, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        handle.abort();
                        warn!(source = %name, "Discovery deadline expired, source aborted");
                        self.record_error(&mut errors, AdapterError::timeout(&name, budget));
                        continue;
                    }
                },
                None => handle.await,
            };

            match joined {
                Ok((Ok(found), elapsed)) => {
                    metrics::histogram!(ADAPTER_LATENCY_SECONDS, "source" => name.clone())
                        .record(elapsed.as_secs_f64());
                    debug!(source = %name, candidates = found.len(), "Source answered");
                    succeeded += 1;
                    candidates.extend(found);
                }
                Ok((Err(error), elapsed)) => {
                    metrics::histogram!(ADAPTER_LATENCY_SECONDS, "source" => name.clone())
                        .record(elapsed.as_secs_f64());
                    if error.is_throttle() {
                        self.gate.record_throttle(
                            &name,
                            self.clock.now(),
                            self.config.throttle_cooldown(),
                        );
                    }
                    self.record_error(&mut errors, error);
                }
                Err(join_error) => {
                    warn!(source = %name, error = %join_error, "Source task failed");
                    self.record_error(
                        &mut errors,
                        AdapterError::new(
                            &name,
                            AdapterErrorKind::NetworkFailure,
                            false,
                            format!("source task failed: {}", join_error),
                        ),
                    );
                }
            }
        }

        let outcome_label = if succeeded == 0 && !errors.is_empty() {
            "failed"
        } else {
            "ok"
        };
        metrics::counter!(DISCOVERIES_TOTAL, "outcome" => outcome_label).increment(1);

        if succeeded == 0 && !errors.is_empty() {
            warn!(seed = %seed, errors = errors.len(), "Every discovery source failed");
            return Err(DiscoveryError::AllSourcesFailed { errors });
        }

        info!(
            seed = %seed,
            candidates = candidates.len(),
            errors = errors.len(),
            "Discovery completed"
        );

        Ok(DiscoveryOutcome {
            seed,
            candidates,
            errors,
            sources_queried,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn record_error(&self, errors: &mut Vec<AdapterError>, error: AdapterError) {
        metrics::counter!(
            ADAPTER_ERRORS_TOTAL,
            "source" => error.source_name.clone(),
            "kind" => error.kind.as_str()
        )
        .increment(1);
        debug!(source = %error.source_name, kind = %error.kind, "Source failed: {}", error.message);
        errors.push(error);
    }

    /// Reports health and gate state of every registered source.
    pub async fn health(&self) -> Vec<SourceStatus> {
        let now = self.clock.now();
        let mut statuses = Vec::with_capacity(self.sources.len());
        for registered in &self.sources {
            let source = &registered.source;
            let health = match source.health_check().await {
                Ok(health) => health,
                Err(e) => ConnectorHealth::Unhealthy(e.to_string()),
            };
            statuses.push(SourceStatus {
                name: source.name().to_string(),
                connector_type: source.connector_type().to_string(),
                enabled: registered.enabled,
                blocked_until: self.gate.blocked_until(source.name(), now),
                health,
            });
        }
        statuses
    }
}
