//! Predicate filtering over asset collections.
//!
//! A [`FilterSpec`] maps field names to case-insensitive substring
//! predicates. Predicates are conjunctive; an empty value places no
//! constraint. Filtering on a field the items do not have is an error.

use crate::models::Asset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use sw_connectors::{DiscoveredAsset, Port};
use thiserror::Error;

/// Errors raised by the filter engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Unknown filter field '{field}' (available: {})", .available.join(", "))]
    UnknownField {
        field: String,
        available: Vec<String>,
    },

    #[error("Invalid filter expression '{0}', expected field=value")]
    InvalidExpression(String),
}

/// Something the filter engine can inspect by field name.
pub trait Filterable {
    /// String form of `field`, or `None` if the item has no such field.
    ///
    /// Absent optional values are reported as an empty string.
    fn field_value(&self, field: &str) -> Option<String>;

    /// Field names accepted by [`Filterable::field_value`].
    fn field_names() -> &'static [&'static str]
    where
        Self: Sized;
}

/// Conjunction of field substring predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec {
    predicates: BTreeMap<String, String>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a predicate. Field names are matched case-insensitively.
    pub fn with(mut self, field: &str, value: &str) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: &str, value: &str) {
        self.predicates
            .insert(field.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    /// Parses `field=value` expressions, e.g. from the command line.
    pub fn parse<'a>(expressions: impl IntoIterator<Item = &'a str>) -> Result<Self, FilterError> {
        let mut spec = Self::new();
        for expr in expressions {
            let (field, value) = expr
                .split_once('=')
                .ok_or_else(|| FilterError::InvalidExpression(expr.to_string()))?;
            if field.trim().is_empty() {
                return Err(FilterError::InvalidExpression(expr.to_string()));
            }
            spec.insert(field, value);
        }
        Ok(spec)
    }

    /// True when no predicate constrains anything.
    pub fn is_empty(&self) -> bool {
        self.predicates.values().all(|v| v.is_empty())
    }

    /// Predicates that constrain, lowercased for matching.
    fn active(&self) -> Vec<(&str, String)> {
        self.predicates
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.as_str(), v.to_lowercase()))
            .collect()
    }

    /// Returns the items matching every predicate, preserving order.
    pub fn apply<T: Filterable + Clone>(&self, items: &[T]) -> Result<Vec<T>, FilterError> {
        let active = self.active();
        let mut matched = Vec::new();

        for item in items {
            let mut keep = true;
            for (field, needle) in &active {
                let value = item.field_value(field).ok_or_else(|| FilterError::UnknownField {
                    field: field.to_string(),
                    available: T::field_names().iter().map(|s| s.to_string()).collect(),
                })?;
                if !value.to_lowercase().contains(needle.as_str()) {
                    keep = false;
                    break;
                }
            }
            if keep {
                matched.push(item.clone());
            }
        }
        Ok(matched)
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .predicates
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// Filters `items` by `spec`.
pub fn apply<T: Filterable + Clone>(items: &[T], spec: &FilterSpec) -> Result<Vec<T>, FilterError> {
    spec.apply(items)
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

fn ports_text(ports: &[Port]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

const ASSET_FIELDS: &[&str] = &[
    "domain", "ip", "type", "ports", "hostnames", "os", "uptime", "sources",
];

impl Filterable for Asset {
    fn field_value(&self, field: &str) -> Option<String> {
        let value = match field {
            "domain" => opt(&self.domain),
            "ip" => opt(&self.ip),
            "type" | "asset_type" => self.asset_type.to_string(),
            "ports" => ports_text(&self.ports),
            "hostnames" => self.hostnames.iter().cloned().collect::<Vec<_>>().join(", "),
            "os" => opt(&self.os),
            "uptime" => opt(&self.uptime),
            "sources" => self.sources.keys().cloned().collect::<Vec<_>>().join(", "),
            _ => return None,
        };
        Some(value)
    }

    fn field_names() -> &'static [&'static str] {
        ASSET_FIELDS
    }
}

const CANDIDATE_FIELDS: &[&str] = &[
    "domain", "ip", "type", "ports", "hostnames", "os", "uptime", "source", "status",
];

impl Filterable for DiscoveredAsset {
    fn field_value(&self, field: &str) -> Option<String> {
        let value = match field {
            "domain" => opt(&self.domain),
            "ip" => opt(&self.ip),
            "type" | "asset_type" => self.asset_type.to_string(),
            "ports" => ports_text(&self.ports),
            "hostnames" => self.hostnames.iter().cloned().collect::<Vec<_>>().join(", "),
            "os" => opt(&self.os),
            "uptime" => opt(&self.uptime),
            "source" | "source_name" => self.source_name.clone(),
            "status" => self.status.to_string(),
            _ => return None,
        };
        Some(value)
    }

    fn field_names() -> &'static [&'static str] {
        CANDIDATE_FIELDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sw_connectors::testing::{sample_domain, sample_host};
    use sw_connectors::CandidateStatus;

    fn assets() -> Vec<Asset> {
        let now = Utc::now();
        vec![
            Asset::from_candidate(&sample_domain("shodan", "a.com", &[80]), now),
            Asset::from_candidate(&sample_domain("otx", "b.com", &[443]), now),
        ]
    }

    #[test]
    fn test_single_predicate() {
        let spec = FilterSpec::new().with("domain", "a");
        let matched = spec.apply(&assets()).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].domain.as_deref(), Some("a.com"));
    }

    #[test]
    fn test_conjunctive() {
        let spec = FilterSpec::new().with("domain", ".com").with("sources", "OTX");
        let matched = spec.apply(&assets()).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].domain.as_deref(), Some("b.com"));

        let spec = FilterSpec::new().with("domain", "a").with("sources", "otx");
        assert!(spec.apply(&assets()).unwrap().is_empty());
    }

    #[test]
    fn test_case_insensitive() {
        let spec = FilterSpec::new().with("DOMAIN", "A.COM");
        assert_eq!(spec.apply(&assets()).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_value_is_no_constraint() {
        let spec = FilterSpec::new().with("domain", "");
        assert!(spec.is_empty());
        assert_eq!(spec.apply(&assets()).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_field() {
        let spec = FilterSpec::new().with("colour", "red");
        match spec.apply(&assets()) {
            Err(FilterError::UnknownField { field, available }) => {
                assert_eq!(field, "colour");
                assert!(available.contains(&"domain".to_string()));
            }
            other => panic!("expected UnknownField, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_empty_collection() {
        let spec = FilterSpec::new().with("colour", "red");
        let empty: Vec<Asset> = Vec::new();
        assert!(spec.apply(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_ports_and_absent_values() {
        let spec = FilterSpec::new().with("ports", "443/tcp");
        assert_eq!(apply(&assets(), &spec).unwrap().len(), 1);

        let spec = FilterSpec::new().with("os", "linux");
        assert!(apply(&assets(), &spec).unwrap().is_empty());
    }

    #[test]
    fn test_candidates() {
        let mut host = sample_host("censys", "192.0.2.8");
        host.status = CandidateStatus::Conflicting;
        let candidates = vec![sample_domain("shodan", "a.com", &[]), host];

        let spec = FilterSpec::new().with("status", "conflict");
        let matched = spec.apply(&candidates).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].source_name, "censys");

        let spec = FilterSpec::new().with("type", "host").with("ip", "192.0.2");
        assert_eq!(spec.apply(&candidates).unwrap().len(), 1);
    }

    #[test]
    fn test_parse() {
        let spec = FilterSpec::parse(["domain=example", "type = host"]).unwrap();
        assert_eq!(spec.to_string(), "domain=example,type=host");
        assert!(matches!(
            FilterSpec::parse(["novalue"]),
            Err(FilterError::InvalidExpression(_))
        ));
        assert!(FilterSpec::parse(["=x"]).is_err());
    }
}
