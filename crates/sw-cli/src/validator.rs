//! Configuration validation for Surface Warden.
//!
//! Checks run before any discovery so that a missing key or a bad URL is
//! reported up front instead of as a failed source mid-run.

use crate::config::{api_key_var, AppConfig, SourceSettings, SOURCE_TYPES};
use colored::Colorize;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Problems that prevent discovery.
    pub errors: Vec<String>,
    /// Problems worth fixing that do not prevent discovery.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Prints the validation result to the console.
    pub fn print(&self) {
        if !self.warnings.is_empty() {
            println!();
            println!("{}", "Configuration Warnings:".yellow().bold());
            for warning in &self.warnings {
                println!("  {} {}", "⚠".yellow(), warning);
            }
        }

        if !self.errors.is_empty() {
            println!();
            println!("{}", "Configuration Errors:".red().bold());
            for error in &self.errors {
                println!("  {} {}", "✗".red(), error);
            }
        }

        if self.errors.is_empty() && self.warnings.is_empty() {
            println!("  {} Configuration OK", "✓".green());
        }
    }
}

/// Validates application configuration.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        Self::validate_discovery(config, &mut result);
        Self::validate_sources(config, &mut result);
        Self::validate_registry(config, &mut result);
        result
    }

    fn validate_discovery(config: &AppConfig, result: &mut ValidationResult) {
        let orchestrator = &config.discovery.orchestrator;
        if orchestrator.timeout_per_source_ms == 0 {
            result.add_error("discovery.timeout_per_source_ms must be greater than 0");
        }
        if orchestrator.throttle_cooldown_ms <= 0 {
            result.add_error("discovery.throttle_cooldown_ms must be greater than 0");
        }
        if let Some(deadline) = orchestrator.deadline_ms {
            if deadline == 0 {
                result.add_error("discovery.deadline_ms must be greater than 0 when set");
            } else if deadline < orchestrator.timeout_per_source_ms {
                result.add_warning(format!(
                    "discovery.deadline_ms ({}) is shorter than timeout_per_source_ms ({}); \
                     slow sources will be cut off by the deadline",
                    deadline, orchestrator.timeout_per_source_ms
                ));
            }
        }
        if config.discovery.service.session_ttl_secs == 0 {
            result.add_error("discovery.session_ttl_secs must be greater than 0");
        }
    }

    fn validate_sources(config: &AppConfig, result: &mut ValidationResult) {
        if !config.sources.values().any(|s| s.enabled) {
            result.add_warning("No enabled sources. Discoveries will fail until one is configured.");
        }

        for (name, source) in &config.sources {
            if !source.enabled {
                continue;
            }
            let kind = source.source_type.to_ascii_lowercase();
            if !SOURCE_TYPES.contains(&kind.as_str()) {
                result.add_error(format!(
                    "Source '{}' has unknown source_type '{}' (expected one of: {})",
                    name,
                    source.source_type,
                    SOURCE_TYPES.join(", ")
                ));
                continue;
            }

            if kind != "manual" {
                Self::validate_base_url(name, source, result);
                if source.requests_per_minute == 0 {
                    result.add_error(format!(
                        "Source '{}' requires requests_per_minute greater than 0",
                        name
                    ));
                }
            }

            match kind.as_str() {
                "shodan" | "otx" if !has_key(source) => {
                    result.add_error(format!(
                        "Source '{}' requires api_key (or {})",
                        name,
                        api_key_var(name)
                    ));
                }
                "censys" => {
                    if source.api_id.as_deref().unwrap_or_default().is_empty() {
                        result.add_error(format!("Source '{}' requires api_id", name));
                    }
                    let secret = source.api_secret.as_ref().or(source.api_key.as_ref());
                    if secret.map_or(true, |s| s.is_empty()) {
                        result.add_error(format!(
                            "Source '{}' requires api_secret (or {})",
                            name,
                            api_key_var(name)
                        ));
                    }
                }
                "manual" if source.entries.is_empty() => {
                    result.add_warning(format!("Manual source '{}' has no entries", name));
                }
                _ => {}
            }
        }
    }

    fn validate_base_url(name: &str, source: &SourceSettings, result: &mut ValidationResult) {
        if source.base_url.is_empty() {
            return;
        }
        if !source.base_url.starts_with("https://") && !source.base_url.starts_with("http://") {
            result.add_error(format!(
                "Source '{}' has invalid base_url '{}': must start with http:// or https://",
                name, source.base_url
            ));
        } else if source.base_url.starts_with("http://") {
            result.add_warning(format!(
                "Source '{}' uses plain HTTP; its API key is sent unencrypted",
                name
            ));
        }
    }

    fn validate_registry(config: &AppConfig, result: &mut ValidationResult) {
        let path = &config.registry.path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                result.add_error(format!(
                    "Registry directory does not exist: {}",
                    parent.display()
                ));
            }
        }
        if path.is_dir() {
            result.add_error(format!("Registry path is a directory: {}", path.display()));
        }
    }
}

fn has_key(source: &SourceSettings) -> bool {
    source.api_key.as_ref().is_some_and(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_connectors::ApiSecret;

    fn config_with(name: &str, source: SourceSettings) -> AppConfig {
        let mut config = AppConfig::default();
        config.sources.insert(name.to_string(), source);
        config
    }

    fn keyed(source_type: &str) -> SourceSettings {
        SourceSettings {
            api_key: Some(ApiSecret::new("0123456789abcdef")),
            ..SourceSettings::of_type(source_type)
        }
    }

    #[test]
    fn test_validation_result_operations() {
        let mut result = ValidationResult::new();
        assert!(!result.has_errors());
        assert!(!result.has_warnings());

        result.add_warning("careful");
        result.add_error("broken");
        assert!(result.has_errors());
        assert!(result.has_warnings());
    }

    #[test]
    fn test_no_sources_is_a_warning() {
        let result = ConfigValidator::validate(&AppConfig::default());
        assert!(!result.has_errors());
        assert!(result.warnings[0].contains("No enabled sources"));
    }

    #[test]
    fn test_keyed_sources_are_valid() {
        let mut config = config_with("shodan", keyed("shodan"));
        config.sources.insert("otx".to_string(), keyed("otx"));
        let result = ConfigValidator::validate(&config);
        assert!(!result.has_errors(), "{:?}", result.errors);
    }

    #[test]
    fn test_missing_key() {
        let config = config_with("shodan", SourceSettings::of_type("shodan"));
        let result = ConfigValidator::validate(&config);
        assert!(result.errors[0].contains("SW_SHODAN_API_KEY"));
    }

    #[test]
    fn test_censys_requires_id_and_secret() {
        let config = config_with("censys", SourceSettings::of_type("censys"));
        let mut result = ValidationResult::new();
        ConfigValidator::validate_sources(&config, &mut result);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_unknown_source_type() {
        let config = config_with("x", SourceSettings::of_type("nmap"));
        let result = ConfigValidator::validate(&config);
        assert!(result.errors[0].contains("unknown source_type"));
    }

    #[test]
    fn test_disabled_source_not_validated() {
        let source = SourceSettings {
            enabled: false,
            ..SourceSettings::of_type("nmap")
        };
        let mut result = ValidationResult::new();
        ConfigValidator::validate_sources(&config_with("x", source), &mut result);
        assert!(!result.has_errors());
    }

    #[test]
    fn test_base_url_checks() {
        let bad = SourceSettings {
            base_url: "ftp://api.example.com".to_string(),
            ..keyed("shodan")
        };
        let result = ConfigValidator::validate(&config_with("shodan", bad));
        assert!(result.errors[0].contains("invalid base_url"));

        let plain = SourceSettings {
            base_url: "http://localhost:8080".to_string(),
            ..keyed("shodan")
        };
        let result = ConfigValidator::validate(&config_with("shodan", plain));
        assert!(!result.has_errors());
        assert!(result.warnings.iter().any(|w| w.contains("plain HTTP")));
    }

    #[test]
    fn test_deadline_shorter_than_timeout() {
        let mut config = config_with("shodan", keyed("shodan"));
        config.discovery.orchestrator.deadline_ms = Some(1000);
        let result = ConfigValidator::validate(&config);
        assert!(!result.has_errors());
        assert!(result.warnings.iter().any(|w| w.contains("deadline_ms")));

        config.discovery.orchestrator.timeout_per_source_ms = 0;
        assert!(ConfigValidator::validate(&config).has_errors());
    }

    #[test]
    fn test_registry_directory_must_exist() {
        let mut config = config_with("shodan", keyed("shodan"));
        config.registry.path = "/definitely/not/here/registry.json".into();
        let result = ConfigValidator::validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("Registry directory")));
    }
}
