//! Provider tag -> solver constructor table

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::credentials::Credentials;
use super::provider::{DnsProviderError, DnsResult, DnsSolver};
use super::providers;

/// Builds a solver from credentials
pub type SolverConstructor =
    Box<dyn Fn(&Credentials) -> DnsResult<Arc<dyn DnsSolver>> + Send + Sync>;

/// Public description of a registered provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    /// Tag stored on DNS accounts ("CloudFlare")
    pub tag: String,
    /// Human readable name
    pub label: String,
    /// Credential field names the provider expects
    pub fields: Vec<String>,
}

struct Entry {
    descriptor: ProviderDescriptor,
    constructor: SolverConstructor,
}

/// Registry of DNS-01 providers
pub struct ProviderRegistry {
    entries: BTreeMap<String, Entry>,
}

impl ProviderRegistry {
    /// A registry with no providers
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// A registry with every built-in provider
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        providers::register_builtin(&mut registry);
        registry
    }

    /// Register (or replace) the constructor for `tag`
    pub fn register<F>(&mut self, tag: &str, label: &str, fields: &[&str], constructor: F)
    where
        F: Fn(&Credentials) -> DnsResult<Arc<dyn DnsSolver>> + Send + Sync + 'static,
    {
        let descriptor = ProviderDescriptor {
            tag: tag.to_string(),
            label: label.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        };
        self.entries.insert(
            tag.to_string(),
            Entry {
                descriptor,
                constructor: Box::new(constructor),
            },
        );
    }

    pub fn is_supported(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    /// Descriptors of every registered provider, sorted by tag
    pub fn supported(&self) -> Vec<ProviderDescriptor> {
        self.entries.values().map(|e| e.descriptor.clone()).collect()
    }

    /// Build the solver registered under `tag`
    pub fn resolve(&self, tag: &str, credentials: &Credentials) -> DnsResult<Arc<dyn DnsSolver>> {
        let entry = self
            .entries
            .get(tag)
            .ok_or_else(|| DnsProviderError::UnsupportedProvider(tag.to_string()))?;

        debug!(provider = %tag, fields = ?credentials, "Resolving DNS solver");
        (entry.constructor)(credentials)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
