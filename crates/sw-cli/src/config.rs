//! Configuration loading for the Surface Warden CLI.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sw_connectors::{
    ApiSecret, AuthConfig, CensysConfig, CensysSource, ConnectorConfig, DiscoveredAsset,
    DiscoverySource, HttpSourceConfig, ManualSource, OrchestratorConfig, OtxConfig, OtxSource,
    ShodanConfig, ShodanSource,
};
use sw_core::ServiceConfig;

const REDACTED: &str = "***REDACTED***";

/// Source types the CLI knows how to build.
pub const SOURCE_TYPES: &[&str] = &["shodan", "otx", "censys", "manual"];

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Timeouts, deadline, throttle cooldown and session lifetime.
    #[serde(default)]
    pub discovery: DiscoverySettings,

    /// Configured sources, by name.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceSettings>,

    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Loads configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Fills API keys from `SW_<SOURCE>_API_KEY` environment variables.
    ///
    /// Variables win over keys from the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|var| std::env::var(var).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (name, source) in self.sources.iter_mut() {
            if let Some(key) = lookup(&api_key_var(name)).filter(|k| !k.is_empty()) {
                source.api_key = Some(ApiSecret::new(key));
            }
        }
    }

    /// Creates a copy with secrets redacted.
    pub fn redact_secrets(&self) -> Self {
        let mut config = self.clone();
        for source in config.sources.values_mut() {
            if source.api_key.as_ref().is_some_and(|k| !k.is_empty()) {
                source.api_key = Some(ApiSecret::new(REDACTED));
            }
            if source.api_secret.as_ref().is_some_and(|k| !k.is_empty()) {
                source.api_secret = Some(ApiSecret::new(REDACTED));
            }
        }
        config
    }

    /// Builds every enabled source.
    pub async fn build_sources(&self) -> Result<Vec<Arc<dyn DiscoverySource>>> {
        let mut built = Vec::new();
        for (name, settings) in &self.sources {
            if !settings.enabled {
                continue;
            }
            let source = settings
                .build(name)
                .await
                .with_context(|| format!("Failed to build source '{}'", name))?;
            built.push(source);
        }
        Ok(built)
    }
}

/// Environment variable holding the API key for source `name`.
pub fn api_key_var(name: &str) -> String {
    let upper: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("SW_{}_API_KEY", upper)
}

/// Discovery settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverySettings {
    #[serde(flatten)]
    pub orchestrator: OrchestratorConfig,

    #[serde(flatten)]
    pub service: ServiceConfig,
}

/// Settings for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Source type (shodan, otx, censys, manual).
    pub source_type: String,

    /// Base URL for the provider API; empty means the provider default.
    #[serde(default)]
    pub base_url: String,

    /// Whether this source is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API key (Shodan, OTX) or API secret (Censys).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiSecret>,

    /// Censys API ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_id: Option<String>,

    /// Censys API secret, if not given as `api_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<ApiSecret>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Request pacing towards the provider.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// TTL of cached provider answers; 0 disables the cache.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Records served by a `manual` source.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<DiscoveredAsset>,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_cache_ttl() -> u64 {
    3600
}

impl SourceSettings {
    /// Settings for `source_type` with every other field at its default.
    pub fn of_type(source_type: &str) -> Self {
        Self {
            source_type: source_type.to_string(),
            base_url: String::new(),
            enabled: true,
            api_key: None,
            api_id: None,
            api_secret: None,
            timeout_secs: default_timeout(),
            requests_per_minute: default_requests_per_minute(),
            cache_ttl_secs: default_cache_ttl(),
            entries: Vec::new(),
        }
    }

    /// Provider default base URL for the configured type.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self.source_type.to_ascii_lowercase().as_str() {
            "shodan" => Some("https://api.shodan.io"),
            "otx" => Some("https://otx.alienvault.com"),
            "censys" => Some("https://search.censys.io/api"),
            _ => None,
        }
    }

    fn http(&self, name: &str) -> HttpSourceConfig {
        let base_url = if self.base_url.is_empty() {
            self.default_base_url().unwrap_or_default().to_string()
        } else {
            self.base_url.clone()
        };
        let mut http = HttpSourceConfig::new(ConnectorConfig {
            name: name.to_string(),
            base_url,
            auth: AuthConfig::None,
            timeout_secs: self.timeout_secs,
            max_retries: 2,
            headers: Default::default(),
        });
        http.requests_per_minute = self.requests_per_minute;
        http.cache_ttl_secs = self.cache_ttl_secs;
        http
    }

    async fn build(&self, name: &str) -> Result<Arc<dyn DiscoverySource>> {
        let kind = self.source_type.to_ascii_lowercase();
        let source: Arc<dyn DiscoverySource> = match kind.as_str() {
            "shodan" => Arc::new(ShodanSource::new(ShodanConfig {
                http: self.http(name),
                api_key: self.api_key.clone(),
            })?),
            "otx" => Arc::new(OtxSource::new(OtxConfig {
                http: self.http(name),
                api_key: self.api_key.clone(),
            })?),
            "censys" => Arc::new(CensysSource::new(CensysConfig {
                http: self.http(name),
                api_id: self.api_id.clone(),
                api_secret: self.api_secret.clone().or_else(|| self.api_key.clone()),
                per_page: 50,
            })?),
            "manual" => {
                let manual = ManualSource::new(name);
                for entry in &self.entries {
                    if !manual.add(entry.clone()).await {
                        bail!("manual entry without domain or ip in source '{}'", name);
                    }
                }
                Arc::new(manual)
            }
            other => bail!(
                "unknown source type '{}' (expected one of: {})",
                other,
                SOURCE_TYPES.join(", ")
            ),
        };
        Ok(source)
    }
}

/// Registry storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Path of the JSON registry snapshot.
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("surface-warden-registry.json")
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to use JSON format.
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}
