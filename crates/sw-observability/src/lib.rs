//! # sw-observability
//!
//! Logging and metrics infrastructure for Surface Warden.
//!
//! This crate provides structured logging with tracing and the metric
//! names and descriptions shared by the discovery and registry crates.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
pub use metrics::register_metrics;
