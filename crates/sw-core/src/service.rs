//! Discovery sessions and commits.
//!
//! [`DiscoveryService`] is the entry point for callers: it runs a
//! discovery, reconciles the candidates against the registry, keeps them in
//! a session, and later commits a caller-chosen subset into the registry.

use crate::filter::{FilterError, FilterSpec};
use crate::models::Asset;
use crate::reconciler::{FieldConflict, ReconciledCandidate, Reconciler};
use crate::registry::{RegistryError, RegistryStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sw_connectors::{
    AdapterError, CandidateStatus, Clock, DiscoveryError, DiscoveryOrchestrator,
    DiscoveryOutcome, IdentityKey, Seed, SourceStatus,
};
use sw_observability::metrics::COMMITS_TOTAL;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Errors that abort a whole service call.
#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("Discovery session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Discovery session expired: {0}")]
    SessionExpired(Uuid),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// Why one selected candidate was not committed.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitError {
    #[error("Candidate {0} is not pending in this session")]
    UnknownCandidate(Uuid),

    #[error("Candidate for {key} conflicts with the registry on {}", fields(.conflicts))]
    Conflict {
        key: IdentityKey,
        conflicts: Vec<FieldConflict>,
    },

    #[error("Failed to persist {key}: {message}")]
    Persistence { key: IdentityKey, message: String },
}

fn fields(conflicts: &[FieldConflict]) -> String {
    conflicts
        .iter()
        .map(|c| c.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// How to commit a conflicting candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the registry's values on conflicting fields, merge everything else.
    KeepExisting,
    /// Let the candidate's values win.
    TakeIncoming,
}

/// A candidate chosen for commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Selection {
    pub candidate_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl Selection {
    pub fn new(candidate_id: Uuid) -> Self {
        Self {
            candidate_id,
            resolution: None,
        }
    }

    pub fn resolved(candidate_id: Uuid, resolution: Resolution) -> Self {
        Self {
            candidate_id,
            resolution: Some(resolution),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    Created,
    Updated,
}

impl CommitOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            CommitOutcome::Created => "created",
            CommitOutcome::Updated => "updated",
        }
    }
}

/// Result of committing one selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResult {
    pub candidate_id: Uuid,
    /// Unset only when the candidate id was unknown.
    pub key: Option<IdentityKey>,
    pub result: Result<CommitOutcome, CommitError>,
}

/// Counts for a commit batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitSummary {
    pub created: usize,
    pub updated: usize,
    pub rejected: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitReport {
    pub session_id: Uuid,
    pub results: Vec<CommitResult>,
    pub summary: CommitSummary,
}

/// Output of one discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub session_id: Uuid,
    pub seed: Seed,
    pub candidates: Vec<ReconciledCandidate>,
    pub errors: Vec<AdapterError>,
    #[serde(default)]
    pub sources_queried: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl DiscoveryReport {
    /// Number of candidates with the given status.
    pub fn count(&self, status: CandidateStatus) -> usize {
        self.candidates.iter().filter(|c| c.status() == status).count()
    }
}

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Sessions older than this are dropped on access.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    3600
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

struct Session {
    created_at: DateTime<Utc>,
    candidates: Vec<ReconciledCandidate>,
}

/// Discovery, review and commit over one registry.
pub struct DiscoveryService {
    orchestrator: DiscoveryOrchestrator,
    registry: Arc<dyn RegistryStore>,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
    sessions: RwLock<HashMap<Uuid, Session>>,
    /// Held by a commit from its registry read through its write.
    key_locks: Mutex<HashMap<IdentityKey, Arc<Mutex<()>>>>,
}

impl DiscoveryService {
    /// Creates a service. Time is read from the orchestrator's clock.
    pub fn new(
        orchestrator: DiscoveryOrchestrator,
        registry: Arc<dyn RegistryStore>,
        config: ServiceConfig,
    ) -> Self {
        let clock = Arc::clone(orchestrator.clock());
        Self {
            orchestrator,
            registry,
            clock,
            config,
            sessions: RwLock::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &DiscoveryOrchestrator {
        &self.orchestrator
    }

    pub fn registry_store(&self) -> &Arc<dyn RegistryStore> {
        &self.registry
    }

    /// Runs a discovery and opens a session holding its candidates.
    ///
    /// Failed sources are listed in the report. The call fails when the seed
    /// is invalid, no source is enabled, or every queried source failed; no
    /// session is opened in those cases.
    pub async fn discover(&self, raw_seed: &str) -> Result<DiscoveryReport, ServiceError> {
        let outcome = self.orchestrator.discover(raw_seed).await?;
        self.reconcile_outcome(outcome).await
    }

    /// Like [`discover`](Self::discover), bounded by `deadline` instead of
    /// the configured one. `None` waits for every source's own timeout.
    pub async fn discover_with_deadline(
        &self,
        raw_seed: &str,
        deadline: Option<Duration>,
    ) -> Result<DiscoveryReport, ServiceError> {
        let outcome = self
            .orchestrator
            .discover_with_deadline(raw_seed, deadline)
            .await?;
        self.reconcile_outcome(outcome).await
    }

    async fn reconcile_outcome(
        &self,
        outcome: DiscoveryOutcome,
    ) -> Result<DiscoveryReport, ServiceError> {
        let registry = self.registry.snapshot().await?;
        let candidates = Reconciler::reconcile(outcome.candidates, &registry);
        Ok(self
            .open_session(
                outcome.seed,
                candidates,
                outcome.errors,
                outcome.sources_queried,
                outcome.duration_ms,
            )
            .await)
    }

    async fn open_session(
        &self,
        seed: Seed,
        candidates: Vec<ReconciledCandidate>,
        errors: Vec<AdapterError>,
        sources_queried: Vec<String>,
        duration_ms: u64,
    ) -> DiscoveryReport {
        let report = DiscoveryReport {
            session_id: Uuid::new_v4(),
            seed,
            candidates,
            errors,
            sources_queried,
            created_at: self.clock.now(),
            duration_ms,
        };
        info!(
            session_id = %report.session_id,
            seed = %report.seed,
            new = report.count(CandidateStatus::New),
            existing = report.count(CandidateStatus::Existing),
            conflicting = report.count(CandidateStatus::Conflicting),
            errors = report.errors.len(),
            "Opened discovery session"
        );
        self.insert_session(&report).await;
        report
    }

    async fn insert_session(&self, report: &DiscoveryReport) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            report.session_id,
            Session {
                created_at: report.created_at,
                candidates: report.candidates.clone(),
            },
        );
    }

    /// Re-opens a session from a saved report, e.g. one written by an
    /// earlier process. The session's age restarts from now.
    pub async fn restore_session(&self, report: &DiscoveryReport) -> Uuid {
        let mut restored = report.clone();
        restored.created_at = self.clock.now();
        self.insert_session(&restored).await;
        debug!(session_id = %report.session_id, "Restored discovery session");
        report.session_id
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::seconds(self.config.session_ttl_secs as i64);
        now - session.created_at >= ttl
    }

    /// Drops expired sessions, reporting whether `session_id` was one of them.
    fn purge_expired(&self, sessions: &mut HashMap<Uuid, Session>, session_id: Uuid) -> bool {
        let now = self.clock.now();
        let expired: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, s)| self.is_expired(s, now))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            sessions.remove(id);
            debug!(session_id = %id, "Dropped expired discovery session");
        }
        expired.contains(&session_id)
    }

    /// Candidates still pending in a session, optionally filtered.
    pub async fn pending(
        &self,
        session_id: Uuid,
        filter: Option<&FilterSpec>,
    ) -> Result<Vec<ReconciledCandidate>, ServiceError> {
        let mut sessions = self.sessions.write().await;
        if self.purge_expired(&mut sessions, session_id) {
            return Err(ServiceError::SessionExpired(session_id));
        }
        let session = sessions
            .get(&session_id)
            .ok_or(ServiceError::SessionNotFound(session_id))?;
        match filter {
            Some(spec) => Ok(spec.apply(&session.candidates)?),
            None => Ok(session.candidates.clone()),
        }
    }

    /// Commits the selected candidates of a session into the registry.
    ///
    /// Each candidate is re-classified against the current registry first.
    /// A conflicting candidate without a resolution is rejected and stays
    /// in the session; a failure on one key does not affect the others.
    pub async fn commit(
        &self,
        session_id: Uuid,
        selections: Vec<Selection>,
    ) -> Result<CommitReport, ServiceError> {
        let started = Instant::now();
        let pending = self.pending(session_id, None).await?;
        let by_id: HashMap<Uuid, &ReconciledCandidate> =
            pending.iter().map(|c| (c.id, c)).collect();

        let mut results = Vec::with_capacity(selections.len());
        let mut summary = CommitSummary::default();
        let mut committed = Vec::new();

        for selection in selections {
            let Some(candidate) = by_id.get(&selection.candidate_id) else {
                summary.rejected += 1;
                results.push(CommitResult {
                    candidate_id: selection.candidate_id,
                    key: None,
                    result: Err(CommitError::UnknownCandidate(selection.candidate_id)),
                });
                continue;
            };

            let span = sw_observability::commit_span!(candidate.key);
            let result = self
                .commit_one(candidate, selection.resolution)
                .instrument(span)
                .await;

            match &result {
                Ok(CommitOutcome::Created) => summary.created += 1,
                Ok(CommitOutcome::Updated) => summary.updated += 1,
                Err(_) => summary.rejected += 1,
            }
            let label = match &result {
                Ok(outcome) => outcome.as_str(),
                Err(CommitError::Conflict { .. }) => "conflict",
                Err(_) => "failed",
            };
            metrics::counter!(COMMITS_TOTAL, "outcome" => label).increment(1);

            if result.is_ok() {
                committed.push(candidate.id);
            }
            results.push(CommitResult {
                candidate_id: candidate.id,
                key: Some(candidate.key.clone()),
                result,
            });
        }

        self.remove_from_session(session_id, &committed).await;
        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            session_id = %session_id,
            created = summary.created,
            updated = summary.updated,
            rejected = summary.rejected,
            "Commit completed"
        );

        Ok(CommitReport {
            session_id,
            results,
            summary,
        })
    }

    async fn commit_one(
        &self,
        candidate: &ReconciledCandidate,
        resolution: Option<Resolution>,
    ) -> Result<CommitOutcome, CommitError> {
        let key = &candidate.key;
        let persistence = |e: RegistryError| CommitError::Persistence {
            key: key.clone(),
            message: e.to_string(),
        };

        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        let existing = self.registry.get(key).await.map_err(persistence)?;
        let classification = Reconciler::classify(&candidate.candidate, existing.as_ref());
        let mut incoming = Asset::from_candidate(&candidate.candidate, self.clock.now());

        if classification.status == CandidateStatus::Conflicting {
            match (resolution, existing.as_ref()) {
                (None, _) => {
                    debug!(identity_key = %key, "Rejected unresolved conflict");
                    return Err(CommitError::Conflict {
                        key: key.clone(),
                        conflicts: classification.conflicts,
                    });
                }
                (Some(Resolution::KeepExisting), Some(stored)) => keep_existing(&mut incoming, stored),
                (Some(_), _) => {}
            }
        }

        let incoming_id = incoming.id;
        let stored = self.registry.upsert(incoming).await.map_err(|e| {
            warn!(identity_key = %key, error = %e, "Failed to commit candidate");
            persistence(e)
        })?;

        let outcome = if stored.id == incoming_id {
            CommitOutcome::Created
        } else {
            CommitOutcome::Updated
        };
        debug!(identity_key = %key, outcome = outcome.as_str(), "Committed candidate");
        Ok(outcome)
    }

    async fn key_lock(&self, key: &IdentityKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        // Locks no other commit holds or waits on are dropped.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    async fn remove_from_session(&self, session_id: Uuid, ids: &[Uuid]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&session_id) else {
            return 0;
        };
        let before = session.candidates.len();
        session.candidates.retain(|c| !ids.contains(&c.id));
        let removed = before - session.candidates.len();
        if session.candidates.is_empty() {
            sessions.remove(&session_id);
            debug!(session_id = %session_id, "Discovery session fully resolved");
        }
        removed
    }

    /// Drops candidates from a session without touching the registry.
    pub async fn ignore(&self, session_id: Uuid, ids: &[Uuid]) -> Result<usize, ServiceError> {
        self.pending(session_id, None).await?;
        Ok(self.remove_from_session(session_id, ids).await)
    }

    /// Lists registry assets, optionally filtered.
    pub async fn registry(&self, filter: Option<&FilterSpec>) -> Result<Vec<Asset>, ServiceError> {
        Ok(self.registry.list(filter).await?)
    }

    /// Deletes registry entries; missing keys are skipped.
    pub async fn registry_delete(&self, keys: &[IdentityKey]) -> Result<usize, ServiceError> {
        let removed = self.registry.bulk_delete(keys).await?;
        info!(requested = keys.len(), removed, "Deleted registry entries");
        Ok(removed)
    }

    /// Health and gate state of every source.
    pub async fn sources(&self) -> Vec<SourceStatus> {
        self.orchestrator.health().await
    }
}

/// Strips from `incoming` every value that would override a conflicting
/// field of `stored`.
fn keep_existing(incoming: &mut Asset, stored: &Asset) {
    if let (Some(ours), Some(theirs)) = (stored.ip, incoming.ip) {
        if ours != theirs && incoming.domain.is_some() {
            incoming.ip = None;
        }
    }
    incoming.ports.retain(|port| {
        !stored
            .ports
            .iter()
            .any(|p| p.key() == port.key() && p.state != port.state)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use sw_connectors::testing::{sample_domain, tcp_port};
    use sw_connectors::{ManualClock, MockSource, OrchestratorConfig, PortState, RateGate};

    async fn service_with(
        responses: Vec<(&str, Vec<sw_connectors::DiscoveredAsset>)>,
    ) -> (DiscoveryService, Arc<ManualClock>, Arc<InMemoryRegistry>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut orchestrator = DiscoveryOrchestrator::with_gate(
            OrchestratorConfig::default(),
            Arc::new(RateGate::new()),
            clock.clone(),
        );
        let source = MockSource::new("mock");
        for (seed, assets) in responses {
            source.set_response(seed, assets).await;
        }
        orchestrator.add_source(Arc::new(source));
        let registry = Arc::new(InMemoryRegistry::new());
        let service = DiscoveryService::new(orchestrator, registry.clone(), ServiceConfig::default());
        (service, clock, registry)
    }

    #[tokio::test]
    async fn test_discover_then_commit() {
        let (service, _, registry) =
            service_with(vec![("example.com", vec![sample_domain("x", "example.com", &[80])])]).await;

        let report = service.discover("example.com").await.unwrap();
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.count(CandidateStatus::New), 1);

        let id = report.candidates[0].id;
        let commit = service.commit(report.session_id, vec![Selection::new(id)]).await.unwrap();
        assert_eq!(commit.summary.created, 1);
        assert_eq!(registry.count().await.unwrap(), 1);

        // Fully committed sessions are closed.
        assert!(matches!(
            service.pending(report.session_id, None).await,
            Err(ServiceError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_candidate() {
        let (service, _, _) =
            service_with(vec![("example.com", vec![sample_domain("x", "example.com", &[])])]).await;
        let report = service.discover("example.com").await.unwrap();
        let stray = Uuid::new_v4();
        let commit = service
            .commit(report.session_id, vec![Selection::new(stray)])
            .await
            .unwrap();
        assert_eq!(commit.summary.rejected, 1);
        assert_eq!(commit.results[0].result, Err(CommitError::UnknownCandidate(stray)));
    }

    #[tokio::test]
    async fn test_keep_existing_resolution() {
        let (service, _, registry) = service_with(vec![(
            "example.com",
            vec![sample_domain("x", "example.com", &[443]).with_port(tcp_port(22, PortState::Closed))],
        )]).await;
        let mut stored = Asset::from_candidate(&sample_domain("y", "example.com", &[]), Utc::now());
        stored.ports = vec![tcp_port(22, PortState::Open)];
        registry.upsert(stored).await.unwrap();

        let report = service.discover("example.com").await.unwrap();
        assert_eq!(report.count(CandidateStatus::Conflicting), 1);
        let id = report.candidates[0].id;

        let commit = service
            .commit(report.session_id, vec![Selection::resolved(id, Resolution::KeepExisting)])
            .await
            .unwrap();
        assert_eq!(commit.summary.updated, 1);

        let all = registry.list(None).await.unwrap();
        let ssh = all[0].ports.iter().find(|p| p.portid == 22).unwrap();
        assert_eq!(ssh.state, PortState::Open);
        assert!(all[0].ports.iter().any(|p| p.portid == 443));
    }

    #[tokio::test]
    async fn test_take_incoming_resolution() {
        let (service, _, registry) = service_with(vec![(
            "example.com",
            vec![sample_domain("x", "example.com", &[]).with_port(tcp_port(22, PortState::Closed))],
        )]).await;
        let mut stored = Asset::from_candidate(&sample_domain("y", "example.com", &[]), Utc::now());
        stored.ports = vec![tcp_port(22, PortState::Open)];
        registry.upsert(stored).await.unwrap();

        let report = service.discover("example.com").await.unwrap();
        let id = report.candidates[0].id;
        service
            .commit(report.session_id, vec![Selection::resolved(id, Resolution::TakeIncoming)])
            .await
            .unwrap();

        let all = registry.list(None).await.unwrap();
        assert_eq!(all[0].ports[0].state, PortState::Closed);
    }

    #[tokio::test]
    async fn test_ignore_leaves_registry_untouched() {
        let (service, _, registry) = service_with(vec![(
            "example.com",
            vec![
                sample_domain("x", "example.com", &[]),
                sample_domain("x", "www.example.com", &[]),
            ],
        )]).await;
        let report = service.discover("example.com").await.unwrap();
        let ignored = service
            .ignore(report.session_id, &[report.candidates[0].id, Uuid::new_v4()])
            .await
            .unwrap();
        assert_eq!(ignored, 1);
        assert_eq!(service.pending(report.session_id, None).await.unwrap().len(), 1);
        assert_eq!(registry.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_session_expiry() {
        let (service, clock, _) =
            service_with(vec![("example.com", vec![sample_domain("x", "example.com", &[])])]).await;
        let report = service.discover("example.com").await.unwrap();
        clock.advance(chrono::Duration::hours(2));

        assert!(matches!(
            service.commit(report.session_id, vec![]).await,
            Err(ServiceError::SessionExpired(_))
        ));
        assert!(matches!(
            service.pending(report.session_id, None).await,
            Err(ServiceError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_session() {
        let (service, clock, registry) =
            service_with(vec![("example.com", vec![sample_domain("x", "example.com", &[])])]).await;
        let report = service.discover("example.com").await.unwrap();
        clock.advance(chrono::Duration::hours(2));

        service.restore_session(&report).await;
        let commit = service
            .commit(report.session_id, vec![Selection::new(report.candidates[0].id)])
            .await
            .unwrap();
        assert_eq!(commit.summary.created, 1);
        assert_eq!(registry.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pending_filter() {
        let (service, _, _) = service_with(vec![(
            "example.com",
            vec![
                sample_domain("x", "example.com", &[]),
                sample_domain("x", "mail.example.com", &[]),
            ],
        )]).await;
        let report = service.discover("example.com").await.unwrap();
        let spec = FilterSpec::new().with("domain", "mail");
        let pending = service.pending(report.session_id, Some(&spec)).await.unwrap();
        assert_eq!(pending.len(), 1);
    }
}
