//! Logging infrastructure for Surface Warden.
//!
//! This module provides structured logging using the tracing ecosystem.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level.
    pub level: Level,
    /// Whether to use JSON format.
    pub json_format: bool,
    /// Whether to include span events.
    pub include_spans: bool,
    /// Whether to include file/line info.
    pub include_location: bool,
    /// Whether to include target (module path).
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            include_spans: false,
            include_location: false,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Creates a development configuration with more verbose output.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            json_format: false,
            include_spans: true,
            include_location: true,
            include_target: true,
        }
    }

    /// Creates a production configuration with JSON output.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            json_format: true,
            include_spans: false,
            include_location: false,
            include_target: true,
        }
    }

    /// Builds a configuration from a level name such as `"debug"`.
    ///
    /// Unknown names fall back to `INFO`.
    pub fn from_level_name(level: &str, json_format: bool) -> Self {
        let level = level.parse::<Level>().unwrap_or(Level::INFO);
        Self {
            level,
            json_format,
            ..Self::default()
        }
    }

    fn default_directives(&self) -> String {
        format!(
            "sw_core={lvl},sw_connectors={lvl},sw_cli={lvl},surface_warden={lvl}",
            lvl = self.level
        )
    }
}

/// Initializes the logging system with default configuration.
pub fn init_logging() {
    init_logging_with_config(LoggingConfig::default());
}

/// Initializes the logging system with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_logging_with_config(config: LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

    let span_events = if config.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target);

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target);

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();
    }
}

/// Creates a span covering one discovery request.
#[macro_export]
macro_rules! discovery_span {
    ($seed:expr) => {
        tracing::info_span!("discovery", seed = %$seed)
    };
    ($seed:expr, $($field:tt)*) => {
        tracing::info_span!("discovery", seed = %$seed, $($field)*)
    };
}

/// Creates a span covering the commit of one identity key.
#[macro_export]
macro_rules! commit_span {
    ($identity_key:expr) => {
        tracing::info_span!("commit", identity_key = %$identity_key)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.json_format);
    }

    #[test]
    fn test_production_config() {
        let config = LoggingConfig::production();
        assert_eq!(config.level, Level::INFO);
        assert!(config.json_format);
    }

    #[test]
    fn test_development_config() {
        let config = LoggingConfig::development();
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.include_spans);
    }

    #[test]
    fn test_from_level_name() {
        assert_eq!(LoggingConfig::from_level_name("debug", false).level, Level::DEBUG);
        assert_eq!(LoggingConfig::from_level_name("WARN", true).level, Level::WARN);
        assert_eq!(LoggingConfig::from_level_name("loud", false).level, Level::INFO);
    }

    #[test]
    fn test_default_directives_cover_all_crates() {
        let directives = LoggingConfig::default().default_directives();
        assert!(directives.contains("sw_core=INFO"));
        assert!(directives.contains("sw_connectors=INFO"));
    }
}
