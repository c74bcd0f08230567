//! Provider credential type with automatic memory zeroization.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// An API key or password for a discovery provider.
///
/// The backing memory is zeroized on drop, and `Debug`/`Display` never
/// print the value.
///
/// ```
/// use sw_connectors::ApiSecret;
///
/// let key = ApiSecret::new("abcd1234efgh");
/// assert_eq!(key.expose_secret(), "abcd1234efgh");
/// assert_eq!(key.masked(), "abcd********");
/// ```
#[derive(Clone, Default)]
pub struct ApiSecret(Zeroizing<String>);

impl ApiSecret {
    /// Wraps a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Exposes the secret for use in a request.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Returns true if no secret is configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shows the first four characters and masks the rest.
    pub fn masked(&self) -> String {
        let visible: String = self.0.chars().take(4).collect();
        let hidden = self.0.chars().count().saturating_sub(4);
        format!("{}{}", visible, "*".repeat(hidden))
    }
}

impl From<String> for ApiSecret {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ApiSecret {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Debug for ApiSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiSecret([REDACTED])")
    }
}

impl fmt::Display for ApiSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl PartialEq for ApiSecret {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for ApiSecret {}

impl Serialize for ApiSecret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ApiSecret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(ApiSecret::new(String::deserialize(deserializer)?))
    }
}
