//! Registry asset model.
//!
//! An [`Asset`] is the authoritative, persisted record for one identity key.
//! It is only ever produced by committing discovery candidates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use sw_connectors::{merge_ports, AssetType, DiscoveredAsset, IdentityKey, Port};
use uuid::Uuid;

/// An asset tracked in the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    /// Unique identifier for this asset.
    pub id: Uuid,
    /// Normalized domain name, if the asset is name-identified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    /// Type of asset.
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    /// Ports sorted by `(protocol, portid)`, without duplicates.
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub hostnames: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Host uptime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    /// Source name to the last commit that incorporated it.
    #[serde(default)]
    pub sources: BTreeMap<String, DateTime<Utc>>,
    /// Timestamp when the asset was first created.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last update.
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    /// Builds the record a candidate would become if committed at `now`.
    pub fn from_candidate(candidate: &DiscoveredAsset, now: DateTime<Utc>) -> Self {
        let mut sources = BTreeMap::new();
        sources.insert(candidate.source_name.clone(), now);
        let mut ports = Vec::new();
        merge_ports(&mut ports, &candidate.ports);

        Self {
            id: Uuid::new_v4(),
            domain: candidate.domain.clone(),
            ip: candidate.ip,
            asset_type: candidate.asset_type.clone(),
            ports,
            hostnames: candidate.hostnames.clone(),
            os: candidate.os.clone(),
            uptime: candidate.uptime,
            sources,
            created_at: now,
            updated_at: now,
        }
    }

    /// Identity key; `None` only for a record with neither domain nor IP.
    pub fn identity_key(&self) -> Option<IdentityKey> {
        IdentityKey::for_fields(self.domain.as_deref(), self.ip.as_ref(), &self.asset_type)
    }

    /// Folds a newer record for the same key into this one.
    ///
    /// Scalars present on `incoming` win; ports are unioned by
    /// `(protocol, portid)` with the incoming port replacing the stored one;
    /// hostnames are unioned; provenance timestamps are overwritten per
    /// source. `id` and `created_at` are kept.
    pub fn merge_from(&mut self, incoming: &Asset) {
        if incoming.domain.is_some() {
            self.domain = incoming.domain.clone();
        }
        if incoming.ip.is_some() {
            self.ip = incoming.ip;
        }
        if incoming.os.is_some() {
            self.os = incoming.os.clone();
        }
        if incoming.uptime.is_some() {
            self.uptime = incoming.uptime;
        }
        merge_ports(&mut self.ports, &incoming.ports);
        self.hostnames.extend(incoming.hostnames.iter().cloned());
        for (source, seen) in &incoming.sources {
            self.sources.insert(source.clone(), *seen);
        }
        if incoming.updated_at > self.updated_at {
            self.updated_at = incoming.updated_at;
        }
    }

    /// Most recent commit time across all sources.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.sources.values().max().copied()
    }
}
