//! # sw-core
//!
//! Asset registry and discovery reconciliation for Surface Warden.
//!
//! This crate provides the registry asset model and stores, the reconciler
//! that classifies discovered candidates against the registry, the filter
//! engine, and the discovery service that ties sessions and commits together.

pub mod filter;
pub mod models;
pub mod reconciler;
pub mod registry;
pub mod service;

pub use filter::{FilterError, FilterSpec, Filterable};
pub use models::Asset;
pub use reconciler::{Classification, Delta, FieldConflict, ReconciledCandidate, Reconciler};
pub use registry::{
    InMemoryRegistry, JsonFileRegistry, RegistryError, RegistryResult, RegistryStore,
};
pub use service::{
    CommitError, CommitOutcome, CommitReport, CommitResult, CommitSummary, DiscoveryReport,
    DiscoveryService, Resolution, Selection, ServiceConfig, ServiceError,
};

// Discovery types callers need alongside the service.
pub use sw_connectors::{
    AssetType, CandidateStatus, DiscoveredAsset, DiscoveryError, IdentityKey, Port, PortState,
    Protocol, Seed,
};
