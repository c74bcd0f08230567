//! Canonical asset model produced by every discovery source.
//!
//! Providers answer in wildly different shapes; adapters convert them into
//! [`DiscoveredAsset`] so that the reconciler can compare records by
//! [`IdentityKey`] alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Classification of an asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    /// Registered (apex) domain.
    Domain,
    /// Name below a registered domain.
    Subdomain,
    /// Network host identified by address.
    Host,
    /// Custom asset type.
    Custom(String),
}

impl AssetType {
    /// Lowercase label used in identity keys and filters.
    pub fn label(&self) -> &str {
        match self {
            AssetType::Domain => "domain",
            AssetType::Subdomain => "subdomain",
            AssetType::Host => "host",
            AssetType::Custom(name) => name,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" => Err("asset type cannot be empty".to_string()),
            "domain" => Ok(AssetType::Domain),
            "subdomain" => Ok(AssetType::Subdomain),
            "host" => Ok(AssetType::Host),
            _ if normalized.contains('/') => Err(format!("invalid asset type: {}", s)),
            _ => Ok(AssetType::Custom(normalized)),
        }
    }
}

/// Transport protocol of a port.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Sctp => write!(f, "sctp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            other => Err(format!("unknown protocol: {}", other)),
        }
    }
}

/// Observed state of a port.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Filtered => write!(f, "filtered"),
        }
    }
}

impl FromStr for PortState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(PortState::Open),
            "closed" => Ok(PortState::Closed),
            "filtered" => Ok(PortState::Filtered),
            other => Err(format!("unknown port state: {}", other)),
        }
    }
}

/// Scanner detail attached to a port. All fields are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_ttl: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Service detection confidence (0-10, nmap scale).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
}

impl PortMetadata {
    pub fn is_empty(&self) -> bool {
        *self == PortMetadata::default()
    }
}

/// Key under which ports are deduplicated.
pub type PortKey = (Protocol, u16);

/// A port observed on an asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Port {
    pub protocol: Protocol,
    /// Port number, 1-65535.
    pub portid: u16,
    pub state: PortState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "PortMetadata::is_empty")]
    pub metadata: PortMetadata,
}

impl Port {
    /// Creates a port, returning `None` for port number 0.
    pub fn new(protocol: Protocol, portid: u16, state: PortState) -> Option<Self> {
        if portid == 0 {
            return None;
        }
        Some(Self {
            protocol,
            portid,
            state,
            service: None,
            product: None,
            metadata: PortMetadata::default(),
        })
    }

    /// Shorthand for an open TCP port.
    pub fn open_tcp(portid: u16) -> Option<Self> {
        Self::new(Protocol::Tcp, portid, PortState::Open)
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn with_metadata(mut self, metadata: PortMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn key(&self) -> PortKey {
        (self.protocol, self.portid)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.portid, self.protocol, self.state)?;
        if let Some(service) = &self.service {
            write!(f, " {}", service)?;
        }
        Ok(())
    }
}

/// Merges `incoming` into `ports`.
///
/// Ports are unioned by [`PortKey`]; when both sides carry the same key the
/// incoming port replaces the stored one. The result is sorted by key and
/// holds no duplicates.
pub fn merge_ports(ports: &mut Vec<Port>, incoming: &[Port]) {
    for port in incoming {
        match ports.iter_mut().find(|p| p.key() == port.key()) {
            Some(existing) => *existing = port.clone(),
            None => ports.push(port.clone()),
        }
    }
    ports.sort_by_key(Port::key);
}

/// Normalizes a domain name for identity comparison.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Identity of an asset within the registry: normalized domain or IP plus type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    /// Normalized domain, or the canonical text form of the IP.
    pub value: String,
    /// Asset type.
    #[serde(rename = "type")]
    pub asset_type: AssetType,
}

impl IdentityKey {
    /// Builds a key from a raw domain-or-IP value.
    pub fn new(value: &str, asset_type: AssetType) -> Self {
        let value = match value.trim().parse::<IpAddr>() {
            Ok(ip) => ip.to_string(),
            Err(_) => normalize_domain(value),
        };
        Self { value, asset_type }
    }

    /// Computes the key for the given identity fields.
    ///
    /// The domain wins when both are present; `None` when neither is.
    pub fn for_fields(
        domain: Option<&str>,
        ip: Option<&IpAddr>,
        asset_type: &AssetType,
    ) -> Option<Self> {
        match (domain.filter(|d| !d.trim().is_empty()), ip) {
            (Some(domain), _) => Some(Self::new(domain, asset_type.clone())),
            (None, Some(ip)) => Some(Self {
                value: ip.to_string(),
                asset_type: asset_type.clone(),
            }),
            (None, None) => None,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.asset_type)
    }
}

impl FromStr for IdentityKey {
    type Err = String;

    /// Parses `value/type`, e.g. `example.com/domain` or `192.0.2.1/host`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, asset_type) = s
            .rsplit_once('/')
            .ok_or_else(|| format!("identity key must look like value/type: {}", s))?;
        if value.trim().is_empty() {
            return Err(format!("identity key has an empty value: {}", s));
        }
        Ok(Self::new(value, asset_type.parse()?))
    }
}

/// Reconciliation status of a discovered candidate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    /// No registry entry shares the identity key.
    #[default]
    New,
    /// A registry entry shares the key and agrees with the candidate.
    Existing,
    /// A registry entry shares the key but disagrees on ip or a port state.
    Conflicting,
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateStatus::New => write!(f, "new"),
            CandidateStatus::Existing => write!(f, "existing"),
            CandidateStatus::Conflicting => write!(f, "conflicting"),
        }
    }
}

/// An asset reported by one source during one discovery session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredAsset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub hostnames: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Host uptime in seconds, when the source reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    /// Source that reported this record.
    #[serde(default)]
    pub source_name: String,
    /// Set by the reconciler; `New` until classified.
    #[serde(default)]
    pub status: CandidateStatus,
    /// When the source observed the record.
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

impl DiscoveredAsset {
    /// Creates a candidate identified by a domain name.
    pub fn for_domain(
        source_name: impl Into<String>,
        domain: &str,
        asset_type: AssetType,
    ) -> Self {
        Self::empty(source_name, Some(normalize_domain(domain)), None, asset_type)
    }

    /// Creates a host candidate identified by an IP address.
    pub fn for_ip(source_name: impl Into<String>, ip: IpAddr) -> Self {
        Self::empty(source_name, None, Some(ip), AssetType::Host)
    }

    fn empty(
        source_name: impl Into<String>,
        domain: Option<String>,
        ip: Option<IpAddr>,
        asset_type: AssetType,
    ) -> Self {
        Self {
            domain,
            ip,
            asset_type,
            ports: Vec::new(),
            hostnames: BTreeSet::new(),
            os: None,
            uptime: None,
            source_name: source_name.into(),
            status: CandidateStatus::New,
            observed_at: Utc::now(),
        }
    }

    /// Identity key of this candidate, if it has a domain or IP.
    pub fn identity_key(&self) -> Option<IdentityKey> {
        IdentityKey::for_fields(self.domain.as_deref(), self.ip.as_ref(), &self.asset_type)
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    /// Adds a port, replacing any port with the same protocol and number.
    pub fn add_port(&mut self, port: Port) {
        merge_ports(&mut self.ports, std::slice::from_ref(&port));
    }

    pub fn with_port(mut self, port: Port) -> Self {
        self.add_port(port);
        self
    }

    /// Adds a normalized hostname; blank names are ignored.
    pub fn add_hostname(&mut self, hostname: &str) {
        let hostname = normalize_domain(hostname);
        if !hostname.is_empty() {
            self.hostnames.insert(hostname);
        }
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.add_hostname(hostname);
        self
    }

    /// Folds another record from the same source and identity into this one.
    pub fn absorb(&mut self, other: &DiscoveredAsset) {
        if other.ip.is_some() {
            self.ip = other.ip;
        }
        if other.os.is_some() {
            self.os = other.os.clone();
        }
        if other.uptime.is_some() {
            self.uptime = other.uptime;
        }
        merge_ports(&mut self.ports, &other.ports);
        self.hostnames.extend(other.hostnames.iter().cloned());
        if other.observed_at > self.observed_at {
            self.observed_at = other.observed_at;
        }
    }
}
