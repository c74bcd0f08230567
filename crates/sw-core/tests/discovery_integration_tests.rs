//! End-to-end tests for discovery, reconciliation and commit.
//!
//! Every test drives a [`DiscoveryService`] built from mock sources, a
//! manual clock and an in-memory registry.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use sw_connectors::testing::{sample_domain, tcp_port};
use sw_connectors::{
    AdapterErrorKind, Clock, ConnectorError, DiscoveryOrchestrator, ManualClock, ManualSource,
    MockBehavior, MockSource, OrchestratorConfig, RateGate,
};
use sw_core::{
    Asset, AssetType, CandidateStatus, CommitError, CommitOutcome, DiscoveryError,
    DiscoveryService, FilterSpec, IdentityKey, InMemoryRegistry, PortState, RegistryError,
    RegistryResult, RegistryStore, Selection, ServiceConfig, ServiceError,
};

struct Harness {
    service: DiscoveryService,
    clock: Arc<ManualClock>,
    registry: Arc<dyn RegistryStore>,
}

fn harness(sources: Vec<Arc<MockSource>>) -> Harness {
    harness_with_registry(sources, Arc::new(InMemoryRegistry::new()))
}

fn harness_with_registry(
    sources: Vec<Arc<MockSource>>,
    registry: Arc<dyn RegistryStore>,
) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let mut orchestrator = DiscoveryOrchestrator::with_gate(
        OrchestratorConfig {
            timeout_per_source_ms: 100,
            ..OrchestratorConfig::default()
        },
        Arc::new(RateGate::new()),
        clock.clone(),
    );
    for source in sources {
        orchestrator.add_source(source);
    }
    Harness {
        service: DiscoveryService::new(orchestrator, registry.clone(), ServiceConfig::default()),
        clock,
        registry,
    }
}

async fn answering(name: &str, domain: &str, ports: &[u16]) -> Arc<MockSource> {
    let source = Arc::new(MockSource::new(name));
    source
        .set_response("example.com", vec![sample_domain(name, domain, ports)])
        .await;
    source
}

async fn commit_all(service: &DiscoveryService, seed: &str) -> Vec<CommitOutcome> {
    let report = service.discover(seed).await.unwrap();
    let selections = report.candidates.iter().map(|c| Selection::new(c.id)).collect();
    let commit = service.commit(report.session_id, selections).await.unwrap();
    commit
        .results
        .into_iter()
        .map(|r| r.result.expect("commit should succeed"))
        .collect()
}

fn example_key() -> IdentityKey {
    IdentityKey::new("example.com", AssetType::Domain)
}

#[tokio::test]
async fn test_commit_is_idempotent_per_key() {
    let h = harness(vec![answering("shodan", "example.com", &[80]).await]);

    let t1 = h.clock.now();
    assert_eq!(commit_all(&h.service, "example.com").await, vec![CommitOutcome::Created]);

    h.clock.advance(ChronoDuration::minutes(5));
    let t2 = h.clock.now();
    let report = h.service.discover("example.com").await.unwrap();
    assert_eq!(report.candidates[0].status(), CandidateStatus::Existing);
    let commit = h
        .service
        .commit(report.session_id, vec![Selection::new(report.candidates[0].id)])
        .await
        .unwrap();
    assert_eq!(commit.summary.updated, 1);

    assert_eq!(h.registry.count().await.unwrap(), 1);
    let stored = h.registry.get(&example_key()).await.unwrap().unwrap();
    assert_eq!(stored.sources.get("shodan"), Some(&t2));
    assert_eq!(stored.created_at, t1);
}

#[tokio::test]
async fn test_ports_are_unioned_across_commits() {
    let source = answering("shodan", "example.com", &[80, 443]).await;
    let h = harness(vec![source.clone()]);
    commit_all(&h.service, "example.com").await;

    source
        .set_response("example.com", vec![sample_domain("shodan", "example.com", &[22])])
        .await;
    commit_all(&h.service, "example.com").await;

    let stored = h.registry.get(&example_key()).await.unwrap().unwrap();
    let ports: Vec<u16> = stored.ports.iter().map(|p| p.portid).collect();
    assert_eq!(ports, vec![22, 80, 443]);
}

#[tokio::test]
async fn test_timed_out_source_is_isolated() {
    let slow = Arc::new(MockSource::with_behavior(
        "slow",
        MockBehavior::WithLatency(Duration::from_secs(5)),
    ));
    let fast = answering("fast", "example.com", &[80]).await;
    let h = harness(vec![slow, fast]);

    let report = h.service.discover("example.com").await.unwrap();
    assert_eq!(report.candidates.len(), 1);
    assert_eq!(report.candidates[0].candidate.source_name, "fast");
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].source_name, "slow");
    assert_eq!(report.errors[0].kind, AdapterErrorKind::Timeout);
}

#[tokio::test]
async fn test_throttled_source_is_gated_for_cooldown() {
    let throttled = Arc::new(MockSource::with_behavior("throttled", MockBehavior::Throttle));
    let healthy = answering("healthy", "example.com", &[80]).await;
    let h = harness(vec![throttled.clone(), healthy]);

    h.service.discover("example.com").await.unwrap();
    assert_eq!(throttled.get_call_count(), 1);

    h.clock.advance(ChronoDuration::hours(1));
    let gated = h.service.discover("example.com").await.unwrap();
    assert_eq!(throttled.get_call_count(), 1);
    assert_eq!(gated.errors[0].kind, AdapterErrorKind::Throttled);

    let status = h.service.sources().await;
    assert!(status.iter().any(|s| s.name == "throttled" && s.blocked_until.is_some()));

    h.clock.advance(ChronoDuration::days(8));
    h.service.discover("example.com").await.unwrap();
    assert_eq!(throttled.get_call_count(), 2);
}

#[tokio::test]
async fn test_registry_filter_is_conjunctive() {
    let source = Arc::new(MockSource::new("otx"));
    source
        .set_response(
            "example.com",
            vec![
                sample_domain("otx", "a.com", &[80]),
                sample_domain("otx", "b.com", &[443]),
            ],
        )
        .await;
    let h = harness(vec![source]);
    commit_all(&h.service, "example.com").await;

    let spec = FilterSpec::new().with("domain", "a");
    let matched = h.service.registry(Some(&spec)).await.unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].domain.as_deref(), Some("a.com"));

    let spec = FilterSpec::new().with("domain", ".com").with("ports", "443");
    let matched = h.service.registry(Some(&spec)).await.unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].domain.as_deref(), Some("b.com"));

    let spec = FilterSpec::new().with("owner", "alice");
    assert!(matches!(
        h.service.registry(Some(&spec)).await,
        Err(ServiceError::Registry(RegistryError::Filter(_)))
    ));
}

#[tokio::test]
async fn test_conflict_is_not_committed_without_resolution() {
    let source = Arc::new(MockSource::new("censys"));
    source
        .set_response(
            "example.com",
            vec![sample_domain("censys", "example.com", &[]).with_port(tcp_port(22, PortState::Closed))],
        )
        .await;
    let h = harness(vec![source]);

    let mut stored = Asset::from_candidate(&sample_domain("shodan", "example.com", &[]), Utc::now());
    stored.ports = vec![tcp_port(22, PortState::Open)];
    h.registry.upsert(stored).await.unwrap();

    let report = h.service.discover("example.com").await.unwrap();
    let candidate = &report.candidates[0];
    assert_eq!(candidate.status(), CandidateStatus::Conflicting);

    let commit = h
        .service
        .commit(report.session_id, vec![Selection::new(candidate.id)])
        .await
        .unwrap();
    assert_eq!(commit.summary.rejected, 1);
    assert!(matches!(commit.results[0].result, Err(CommitError::Conflict { .. })));

    let after = h.registry.get(&example_key()).await.unwrap().unwrap();
    assert_eq!(after.ports[0].state, PortState::Open);
    assert!(!after.sources.contains_key("censys"));

    // Still pending for a later, resolved commit.
    let pending = h.service.pending(report.session_id, None).await.unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_invalid_seed_is_rejected_before_any_call() {
    let source = Arc::new(MockSource::new("mock"));
    let h = harness(vec![source.clone()]);

    let result = h.service.discover("not a domain!!").await;
    assert!(matches!(
        result,
        Err(ServiceError::Discovery(DiscoveryError::InvalidSeed(_)))
    ));
    assert_eq!(source.get_call_count(), 0);
}

#[tokio::test]
async fn test_all_sources_failing_fails_the_discovery() {
    let down = Arc::new(MockSource::with_behavior(
        "down",
        MockBehavior::AlwaysFail(ConnectorError::ConnectionFailed("refused".into())),
    ));
    let h = harness(vec![down]);

    let errors = match h.service.discover("example.com").await {
        Err(ServiceError::Discovery(DiscoveryError::AllSourcesFailed { errors })) => errors,
        other => panic!("expected every source to fail, got {:?}", other.map(|r| r.session_id)),
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].source_name, "down");
    assert_eq!(errors[0].kind, AdapterErrorKind::NetworkFailure);
}

#[tokio::test]
async fn test_caller_deadline_bounds_discovery() {
    let slow = Arc::new(MockSource::with_behavior(
        "slow",
        MockBehavior::WithLatency(Duration::from_secs(10)),
    ));
    let fast = answering("fast", "example.com", &[443]).await;

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let mut orchestrator = DiscoveryOrchestrator::with_gate(
        OrchestratorConfig {
            timeout_per_source_ms: 30_000,
            ..OrchestratorConfig::default()
        },
        Arc::new(RateGate::new()),
        clock,
    );
    orchestrator.add_source(slow);
    orchestrator.add_source(fast);
    let service = DiscoveryService::new(
        orchestrator,
        Arc::new(InMemoryRegistry::new()),
        ServiceConfig::default(),
    );

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        service.discover_with_deadline("example.com", Some(Duration::from_millis(50))),
    )
    .await
    .expect("deadline should cut the slow source short")
    .unwrap();

    assert_eq!(report.candidates.len(), 1);
    assert_eq!(report.candidates[0].candidate.source_name, "fast");
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].source_name, "slow");
    assert_eq!(report.errors[0].kind, AdapterErrorKind::Timeout);
}

#[tokio::test]
async fn test_manual_entries_flow_into_registry() {
    let manual = Arc::new(ManualSource::new("manual"));
    manual
        .add(sample_domain("manual", "vpn.example.com", &[443]))
        .await;

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let mut orchestrator = DiscoveryOrchestrator::with_gate(
        OrchestratorConfig::default(),
        Arc::new(RateGate::new()),
        clock,
    );
    orchestrator.add_source(manual);
    let registry = Arc::new(InMemoryRegistry::new());
    let service = DiscoveryService::new(orchestrator, registry.clone(), ServiceConfig::default());

    commit_all(&service, "example.com").await;
    let key = IdentityKey::new("vpn.example.com", AssetType::Domain);
    let stored = registry.get(&key).await.unwrap().unwrap();
    assert!(stored.sources.contains_key("manual"));
}

/// Store that refuses writes for one domain.
struct FlakyRegistry {
    inner: InMemoryRegistry,
    broken: String,
}

#[async_trait]
impl RegistryStore for FlakyRegistry {
    async fn upsert(&self, asset: Asset) -> RegistryResult<Asset> {
        if asset.domain.as_deref() == Some(self.broken.as_str()) {
            return Err(RegistryError::Persistence("disk full".to_string()));
        }
        self.inner.upsert(asset).await
    }

    async fn bulk_delete(&self, keys: &[IdentityKey]) -> RegistryResult<usize> {
        self.inner.bulk_delete(keys).await
    }

    async fn list(&self, filter: Option<&FilterSpec>) -> RegistryResult<Vec<Asset>> {
        self.inner.list(filter).await
    }

    async fn get(&self, key: &IdentityKey) -> RegistryResult<Option<Asset>> {
        self.inner.get(key).await
    }

    async fn snapshot(&self) -> RegistryResult<HashMap<IdentityKey, Asset>> {
        self.inner.snapshot().await
    }

    async fn count(&self) -> RegistryResult<usize> {
        self.inner.count().await
    }
}

#[tokio::test]
async fn test_persistence_failure_is_per_key() {
    let source = Arc::new(MockSource::new("shodan"));
    source
        .set_response(
            "example.com",
            vec![
                sample_domain("shodan", "ok.example.com", &[80]),
                sample_domain("shodan", "broken.example.com", &[80]),
            ],
        )
        .await;
    let registry = Arc::new(FlakyRegistry {
        inner: InMemoryRegistry::new(),
        broken: "broken.example.com".to_string(),
    });
    let h = harness_with_registry(vec![source], registry);

    let report = h.service.discover("example.com").await.unwrap();
    let selections = report.candidates.iter().map(|c| Selection::new(c.id)).collect();
    let commit = h.service.commit(report.session_id, selections).await.unwrap();

    assert_eq!(commit.summary.created, 1);
    assert_eq!(commit.summary.rejected, 1);
    let failed = commit.results.iter().find(|r| r.result.is_err()).unwrap();
    assert!(matches!(failed.result, Err(CommitError::Persistence { .. })));
    assert_eq!(h.registry.count().await.unwrap(), 1);

    // The failed candidate can be retried.
    let pending = h.service.pending(report.session_id, None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].candidate.domain.as_deref(), Some("broken.example.com"));
}

#[tokio::test]
async fn test_registry_delete_skips_missing_keys() {
    let h = harness(vec![answering("shodan", "example.com", &[80]).await]);
    commit_all(&h.service, "example.com").await;

    let removed = h
        .service
        .registry_delete(&[
            example_key(),
            IdentityKey::new("gone.example.com", AssetType::Domain),
        ])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(h.service.registry(None).await.unwrap().is_empty());
}

/// Store whose reads stall, widening the gap between a commit's read and
/// its write.
struct SlowReadRegistry {
    inner: InMemoryRegistry,
    delay: Duration,
}

#[async_trait]
impl RegistryStore for SlowReadRegistry {
    async fn upsert(&self, asset: Asset) -> RegistryResult<Asset> {
        self.inner.upsert(asset).await
    }

    async fn bulk_delete(&self, keys: &[IdentityKey]) -> RegistryResult<usize> {
        self.inner.bulk_delete(keys).await
    }

    async fn list(&self, filter: Option<&FilterSpec>) -> RegistryResult<Vec<Asset>> {
        self.inner.list(filter).await
    }

    async fn get(&self, key: &IdentityKey) -> RegistryResult<Option<Asset>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn snapshot(&self) -> RegistryResult<HashMap<IdentityKey, Asset>> {
        self.inner.snapshot().await
    }

    async fn count(&self) -> RegistryResult<usize> {
        self.inner.count().await
    }
}

#[tokio::test]
async fn test_concurrent_conflicting_commits_reject_one() {
    let open = Arc::new(MockSource::new("a"));
    open.set_response(
        "example.com",
        vec![sample_domain("a", "example.com", &[]).with_port(tcp_port(22, PortState::Open))],
    )
    .await;
    let closed = Arc::new(MockSource::new("b"));
    closed
        .set_response(
            "example.com",
            vec![sample_domain("b", "example.com", &[]).with_port(tcp_port(22, PortState::Closed))],
        )
        .await;
    let registry = Arc::new(SlowReadRegistry {
        inner: InMemoryRegistry::new(),
        delay: Duration::from_millis(50),
    });
    let h = harness_with_registry(vec![open, closed], registry);

    let report = h.service.discover("example.com").await.unwrap();
    assert_eq!(report.count(CandidateStatus::New), 2);
    let id_of = |source: &str| {
        report
            .candidates
            .iter()
            .find(|c| c.candidate.source_name == source)
            .map(|c| c.id)
            .unwrap()
    };

    let (first, second) = tokio::join!(
        h.service.commit(report.session_id, vec![Selection::new(id_of("a"))]),
        h.service.commit(report.session_id, vec![Selection::new(id_of("b"))]),
    );
    let results: Vec<_> = [first.unwrap(), second.unwrap()]
        .into_iter()
        .flat_map(|c| c.results)
        .map(|r| r.result)
        .collect();

    let created = results.iter().filter(|r| matches!(r, Ok(CommitOutcome::Created))).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(CommitError::Conflict { .. })))
        .count();
    assert_eq!(created, 1);
    assert_eq!(conflicts, 1);

    // The stored entry carries exactly one source's view of port 22.
    let stored = h.registry.get(&example_key()).await.unwrap().unwrap();
    assert_eq!(stored.sources.len(), 1);
    let winner = if stored.sources.contains_key("a") {
        PortState::Open
    } else {
        PortState::Closed
    };
    assert_eq!(stored.ports[0].state, winner);

    // The rejected candidate stays pending for a resolved commit.
    let pending = h.service.pending(report.session_id, None).await.unwrap();
    assert_eq!(pending.len(), 1);
}
