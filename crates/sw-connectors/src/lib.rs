//! # sw-connectors
//!
//! Discovery sources for Surface Warden.
//!
//! This crate provides the canonical asset model every source normalizes
//! into, the source trait definitions and implementations (Shodan, OTX,
//! Censys, manual entry, mock), the per-source rate gate, and the
//! orchestrator that fans a discovery out across all sources.

pub mod clock;
pub mod http;
pub mod model;
pub mod orchestrator;
pub mod rate_gate;
pub mod secret;
pub mod seed;
pub mod sources;
pub mod testing;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use model::{
    merge_ports, normalize_domain, AssetType, CandidateStatus, DiscoveredAsset, IdentityKey, Port,
    PortKey, PortMetadata, PortState, Protocol,
};
pub use orchestrator::{
    DiscoveryError, DiscoveryOrchestrator, DiscoveryOutcome, OrchestratorConfig, SourceStatus,
};
pub use rate_gate::{default_cooldown, RateGate, DEFAULT_THROTTLE_COOLDOWN_MS};
pub use secret::ApiSecret;
pub use seed::{Seed, SeedValidationError};
pub use traits::{
    AdapterError, AdapterErrorKind, AuthConfig, Connector, ConnectorConfig, ConnectorError,
    ConnectorHealth, ConnectorResult, DiscoverySource, RawProviderPayload,
};

// Re-export source implementations
pub use sources::{
    CensysConfig, CensysSource, HttpSourceConfig, ManualSource, MockBehavior, MockSource,
    OtxConfig, OtxSource, ShodanConfig, ShodanSource,
};
