//! Metric names and descriptions for Surface Warden.
//!
//! Emitting crates use the constants below with the `metrics` macros.
//! Installing an exporter is left to the embedding application.

use metrics::{describe_counter, describe_histogram};

/// Total discovery requests accepted (valid seed).
pub const DISCOVERIES_TOTAL: &str = "sw_discoveries_total";
/// Adapter failures, labelled by `source` and `kind`.
pub const ADAPTER_ERRORS_TOTAL: &str = "sw_adapter_errors_total";
/// Throttle signals recorded by the rate gate, labelled by `source`.
pub const ADAPTER_THROTTLES_TOTAL: &str = "sw_adapter_throttles_total";
/// Adapter fetch latency, labelled by `source`.
pub const ADAPTER_LATENCY_SECONDS: &str = "sw_adapter_latency_seconds";
/// Commit outcomes, labelled by `outcome` (created, updated, conflict, failed).
pub const COMMITS_TOTAL: &str = "sw_commits_total";

/// Registers metric descriptions.
///
/// Safe to call more than once.
pub fn register_metrics() {
    describe_counter!(DISCOVERIES_TOTAL, "Total number of discovery requests");
    describe_counter!(
        ADAPTER_ERRORS_TOTAL,
        "Total number of discovery source failures"
    );
    describe_counter!(
        ADAPTER_THROTTLES_TOTAL,
        "Total number of throttle signals received from discovery sources"
    );
    describe_histogram!(
        ADAPTER_LATENCY_SECONDS,
        "Discovery source fetch latency in seconds"
    );
    describe_counter!(COMMITS_TOTAL, "Total number of candidate commits by outcome");
}
