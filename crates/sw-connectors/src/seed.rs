//! Discovery seed validation.
//!
//! A seed is either a DNS name made of valid labels or a dotted-quad IPv4
//! address. Anything else is rejected before any source is contacted.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Maximum length of a complete domain name (RFC 1035).
const MAX_DOMAIN_LENGTH: usize = 253;

/// Errors that can occur when validating a seed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeedValidationError {
    #[error("seed cannot be empty")]
    Empty,

    #[error("seed exceeds maximum length of {MAX_DOMAIN_LENGTH} characters (got {0})")]
    TooLong(usize),

    #[error("'{0}' is neither a domain name nor a dotted-quad IPv4 address")]
    Malformed(String),

    #[error("'{0}' has an IPv4 octet out of range")]
    OctetOutOfRange(String),
}

/// A validated discovery seed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Seed {
    /// Lowercased domain name without trailing dot.
    Domain(String),
    /// IPv4 address.
    Ipv4(Ipv4Addr),
}

fn domain_regex() -> &'static Regex {
    static INSTANCE: OnceLock<Regex> = OnceLock::new();
    INSTANCE.get_or_init(|| {
        Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z][a-z0-9-]{0,61}[a-z0-9]$")
            .unwrap()
    })
}

fn ipv4_regex() -> &'static Regex {
    static INSTANCE: OnceLock<Regex> = OnceLock::new();
    INSTANCE.get_or_init(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").unwrap())
}

impl Seed {
    /// Validates and normalizes raw user input.
    pub fn parse(input: &str) -> Result<Self, SeedValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SeedValidationError::Empty);
        }

        if ipv4_regex().is_match(trimmed) {
            return trimmed
                .parse::<Ipv4Addr>()
                .map(Seed::Ipv4)
                .map_err(|_| SeedValidationError::OctetOutOfRange(trimmed.to_string()));
        }

        let domain = trimmed.trim_end_matches('.').to_ascii_lowercase();
        if domain.len() > MAX_DOMAIN_LENGTH {
            return Err(SeedValidationError::TooLong(domain.len()));
        }
        if domain_regex().is_match(&domain) {
            Ok(Seed::Domain(domain))
        } else {
            Err(SeedValidationError::Malformed(trimmed.to_string()))
        }
    }

    /// Returns the seed as it is sent to providers.
    pub fn as_query(&self) -> String {
        match self {
            Seed::Domain(d) => d.clone(),
            Seed::Ipv4(ip) => ip.to_string(),
        }
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, Seed::Domain(_))
    }

    pub fn is_ip(&self) -> bool {
        matches!(self, Seed::Ipv4(_))
    }
}

impl FromStr for Seed {
    type Err = SeedValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Seed::parse(s)
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seed::Domain(d) => f.write_str(d),
            Seed::Ipv4(ip) => write!(f, "{}", ip),
        }
    }
}
