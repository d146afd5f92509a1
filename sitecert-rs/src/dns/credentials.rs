//! Opaque DNS provider credentials

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::provider::{DnsProviderError, DnsResult};

/// Provider-specific credential fields, stored as a flat JSON object.
///
/// `Debug` prints field names only so credentials can sit inside logged
/// structures without leaking.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a stored authorization blob
    pub fn from_json(json: &str) -> DnsResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| DnsProviderError::Credentials(format!("malformed authorization: {}", e)))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn with(mut self, field: &str, value: &str) -> Self {
        self.0.insert(field.to_string(), value.to_string());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str).filter(|v| !v.trim().is_empty())
    }

    /// A required field; the error names the field, never a value
    pub fn require(&self, provider: &str, field: &str) -> DnsResult<&str> {
        self.get(field).ok_or_else(|| {
            DnsProviderError::Credentials(format!("{} requires field '{}'", provider, field))
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}
