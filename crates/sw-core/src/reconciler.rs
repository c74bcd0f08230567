//! Candidate reconciliation against the registry.
//!
//! Candidates are first collapsed per `(identity key, source)`, then each
//! one is compared with the registry entry sharing its key:
//!
//! - no entry: `New`
//! - entry agrees on `ip` and on the state of every shared port: `Existing`,
//!   with any ports or hostnames the candidate adds listed as a delta
//! - entry disagrees on `ip` or on a shared port's state: `Conflicting`
//!
//! Additions alone never make a candidate `Conflicting`: a field counts as
//! mismatched only when both sides hold a value and the values differ. New
//! ports, hostnames or a first IP are merged on commit without a resolution.
//!
//! Conflicts are reported, never resolved here.

use crate::filter::Filterable;
use crate::models::Asset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use sw_connectors::{CandidateStatus, DiscoveredAsset, IdentityKey, Port};
use tracing::{debug, warn};
use uuid::Uuid;

/// One field on which a candidate disagrees with the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldConflict {
    /// `ip`, or `port <portid>/<protocol>`.
    pub field: String,
    pub existing: String,
    pub incoming: String,
}

/// What a candidate would add to an agreeing registry entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    /// True when the entry has no IP and the candidate supplies one.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ip: bool,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty() && self.hostnames.is_empty() && !self.ip
    }
}

/// A classified candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledCandidate {
    /// Handle used to select or ignore the candidate within its session.
    pub id: Uuid,
    pub key: IdentityKey,
    /// The candidate, with `status` set.
    pub candidate: DiscoveredAsset,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<FieldConflict>,
    #[serde(default, skip_serializing_if = "Delta::is_empty")]
    pub adds: Delta,
}

impl ReconciledCandidate {
    pub fn status(&self) -> CandidateStatus {
        self.candidate.status
    }
}

impl Filterable for ReconciledCandidate {
    fn field_value(&self, field: &str) -> Option<String> {
        self.candidate.field_value(field)
    }

    fn field_names() -> &'static [&'static str] {
        DiscoveredAsset::field_names()
    }
}

/// Classification of a candidate against one (possibly missing) entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: CandidateStatus,
    pub conflicts: Vec<FieldConflict>,
    pub adds: Delta,
}

/// Stateless reconciliation logic.
pub struct Reconciler;

impl Reconciler {
    /// Collapses records sharing identity key and source.
    ///
    /// Records without a domain or IP are dropped. Order of first
    /// appearance is kept.
    pub fn dedupe(candidates: Vec<DiscoveredAsset>) -> Vec<(IdentityKey, DiscoveredAsset)> {
        let mut merged: Vec<(IdentityKey, DiscoveredAsset)> = Vec::new();
        let mut index: HashMap<(IdentityKey, String), usize> = HashMap::new();

        for candidate in candidates {
            let Some(key) = candidate.identity_key() else {
                warn!(source = %candidate.source_name, "Dropping candidate without domain or ip");
                continue;
            };
            let slot = (key.clone(), candidate.source_name.clone());
            match index.get(&slot) {
                Some(&i) => merged[i].1.absorb(&candidate),
                None => {
                    index.insert(slot, merged.len());
                    merged.push((key, candidate));
                }
            }
        }
        merged
    }

    /// Compares a candidate with the registry entry sharing its key.
    pub fn classify(candidate: &DiscoveredAsset, existing: Option<&Asset>) -> Classification {
        let Some(existing) = existing else {
            return Classification {
                status: CandidateStatus::New,
                conflicts: Vec::new(),
                adds: Delta::default(),
            };
        };

        let mut conflicts = Vec::new();
        let mut adds = Delta::default();

        match (existing.ip, candidate.ip) {
            (Some(stored), Some(seen)) if stored != seen => conflicts.push(FieldConflict {
                field: "ip".to_string(),
                existing: stored.to_string(),
                incoming: seen.to_string(),
            }),
            (None, Some(_)) => adds.ip = true,
            _ => {}
        }

        for port in &candidate.ports {
            match existing.ports.iter().find(|p| p.key() == port.key()) {
                Some(stored) if stored.state != port.state => conflicts.push(FieldConflict {
                    field: format!("port {}/{}", port.portid, port.protocol),
                    existing: stored.state.to_string(),
                    incoming: port.state.to_string(),
                }),
                Some(_) => {}
                None => adds.ports.push(port.clone()),
            }
        }

        adds.hostnames = candidate
            .hostnames
            .iter()
            .filter(|h| !existing.hostnames.contains(*h))
            .cloned()
            .collect();

        let status = if conflicts.is_empty() {
            CandidateStatus::Existing
        } else {
            CandidateStatus::Conflicting
        };
        Classification {
            status,
            conflicts,
            adds,
        }
    }

    /// Deduplicates and classifies a candidate set against a registry snapshot.
    pub fn reconcile(
        candidates: Vec<DiscoveredAsset>,
        registry: &HashMap<IdentityKey, Asset>,
    ) -> Vec<ReconciledCandidate> {
        Self::dedupe(candidates)
            .into_iter()
            .map(|(key, mut candidate)| {
                let classification = Self::classify(&candidate, registry.get(&key));
                candidate.status = classification.status;
                debug!(identity_key = %key, status = %classification.status, "Classified candidate");
                ReconciledCandidate {
                    id: Uuid::new_v4(),
                    key,
                    candidate,
                    conflicts: classification.conflicts,
                    adds: classification.adds,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sw_connectors::testing::{sample_domain, sample_host, tcp_port};
    use sw_connectors::{AssetType, PortState};

    fn registry_with(assets: Vec<Asset>) -> HashMap<IdentityKey, Asset> {
        assets
            .into_iter()
            .filter_map(|a| a.identity_key().map(|k| (k, a)))
            .collect()
    }

    #[test]
    fn test_new_candidate() {
        let result = Reconciler::reconcile(
            vec![sample_domain("shodan", "example.com", &[80])],
            &HashMap::new(),
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].status(), CandidateStatus::New);
        assert_eq!(result[0].key, IdentityKey::new("example.com", AssetType::Domain));
    }

    #[test]
    fn test_existing_subset() {
        let stored = Asset::from_candidate(&sample_domain("a", "example.com", &[80, 443]), Utc::now());
        let registry = registry_with(vec![stored]);
        let result =
            Reconciler::reconcile(vec![sample_domain("b", "example.com", &[443])], &registry);
        assert_eq!(result[0].status(), CandidateStatus::Existing);
        assert!(result[0].adds.is_empty());
    }

    #[test]
    fn test_existing_with_additions() {
        let stored = Asset::from_candidate(&sample_domain("a", "example.com", &[80]), Utc::now());
        let registry = registry_with(vec![stored]);
        let candidate = sample_domain("b", "example.com", &[80, 22]).with_hostname("www.example.com");
        let result = Reconciler::reconcile(vec![candidate], &registry);

        assert_eq!(result[0].status(), CandidateStatus::Existing);
        assert_eq!(result[0].adds.ports.len(), 1);
        assert_eq!(result[0].adds.ports[0].portid, 22);
        assert_eq!(result[0].adds.hostnames, vec!["www.example.com".to_string()]);
    }

    #[test]
    fn test_port_state_conflict() {
        let mut stored = Asset::from_candidate(&sample_domain("a", "example.com", &[]), Utc::now());
        stored.ports = vec![tcp_port(22, PortState::Open)];
        let registry = registry_with(vec![stored]);

        let candidate = sample_domain("b", "example.com", &[]).with_port(tcp_port(22, PortState::Closed));
        let result = Reconciler::reconcile(vec![candidate], &registry);

        assert_eq!(result[0].status(), CandidateStatus::Conflicting);
        assert_eq!(
            result[0].conflicts,
            vec![FieldConflict {
                field: "port 22/tcp".to_string(),
                existing: "open".to_string(),
                incoming: "closed".to_string(),
            }]
        );
    }

    #[test]
    fn test_ip_conflict() {
        let stored = Asset::from_candidate(
            &sample_domain("a", "example.com", &[]).with_ip("192.0.2.1".parse().unwrap()),
            Utc::now(),
        );
        let registry = registry_with(vec![stored]);
        let candidate = sample_domain("b", "example.com", &[]).with_ip("192.0.2.2".parse().unwrap());
        let result = Reconciler::reconcile(vec![candidate], &registry);
        assert_eq!(result[0].status(), CandidateStatus::Conflicting);
        assert_eq!(result[0].conflicts[0].field, "ip");
    }

    #[test]
    fn test_missing_ip_is_not_a_conflict() {
        let stored = Asset::from_candidate(&sample_domain("a", "example.com", &[]), Utc::now());
        let registry = registry_with(vec![stored]);
        let candidate = sample_domain("b", "example.com", &[]).with_ip("192.0.2.2".parse().unwrap());
        let result = Reconciler::reconcile(vec![candidate], &registry);
        assert_eq!(result[0].status(), CandidateStatus::Existing);
        assert!(result[0].adds.ip);
    }

    #[test]
    fn test_same_type_only() {
        let stored = Asset::from_candidate(&sample_domain("a", "example.com", &[]), Utc::now());
        let registry = registry_with(vec![stored]);
        let mut candidate = sample_domain("b", "example.com", &[]);
        candidate.asset_type = AssetType::Subdomain;
        let result = Reconciler::reconcile(vec![candidate], &registry);
        assert_eq!(result[0].status(), CandidateStatus::New);
    }

    #[test]
    fn test_dedupe_per_key_and_source() {
        let result = Reconciler::dedupe(vec![
            sample_domain("shodan", "Example.com", &[80]),
            sample_domain("shodan", "example.com.", &[443]),
            sample_domain("otx", "example.com", &[80]),
        ]);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].1.ports.len(), 2);
        assert_eq!(result[1].1.source_name, "otx");
    }

    #[test]
    fn test_identityless_candidates_dropped() {
        let mut host = sample_host("censys", "192.0.2.1");
        host.ip = None;
        assert!(Reconciler::reconcile(vec![host], &HashMap::new()).is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let result = Reconciler::reconcile(
            vec![
                sample_domain("a", "one.example", &[]),
                sample_domain("a", "two.example", &[]),
            ],
            &HashMap::new(),
        );
        assert_ne!(result[0].id, result[1].id);
    }
}
