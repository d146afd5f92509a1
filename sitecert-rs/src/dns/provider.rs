//! DNS-01 solver trait
//!
//! A solver publishes and withdraws the `_acme-challenge` TXT record for a
//! domain. Solvers are obtained from the [`ProviderRegistry`](super::ProviderRegistry).

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

/// Result type for DNS operations
pub type DnsResult<T> = Result<T, DnsProviderError>;

/// Errors that can occur during DNS provider operations
#[derive(Debug, Error)]
pub enum DnsProviderError {
    /// No constructor registered for the tag
    #[error("Unsupported DNS provider: {0}")]
    UnsupportedProvider(String),

    /// Missing or malformed credential fields. Never carries values.
    #[error("Invalid credentials: {0}")]
    Credentials(String),

    /// Authentication failed with the DNS provider
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Zone not found for the domain
    #[error("Zone not found for domain '{domain}'")]
    ZoneNotFound { domain: String },

    /// Record creation failed
    #[error("Failed to create TXT record for '{record_name}': {message}")]
    RecordCreation { record_name: String, message: String },

    /// Record deletion failed
    #[error("Failed to delete TXT record '{record_id}': {message}")]
    RecordDeletion { record_id: String, message: String },

    /// API request failed
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// TXT record not visible before the propagation timeout
    #[error("TXT record '{record_name}' not propagated after {elapsed_secs}s")]
    Propagation { record_name: String, elapsed_secs: u64 },
}

/// Timing parameters shared by every solver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverSettings {
    pub propagation_timeout: Duration,
    pub poll_interval: Duration,
    pub ttl: u32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            propagation_timeout: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(10),
            ttl: 3600,
        }
    }
}

/// DNS-01 challenge solver
#[async_trait]
pub trait DnsSolver: Send + Sync + Debug {
    /// Registry tag of the provider ("CloudFlare", "DnsPod", ...)
    fn name(&self) -> &'static str;

    fn settings(&self) -> SolverSettings {
        SolverSettings::default()
    }

    /// Publish `value` at `_acme-challenge.{domain}`.
    ///
    /// Returns an opaque handle passed back to [`cleanup`](Self::cleanup).
    async fn present(&self, domain: &str, value: &str) -> DnsResult<String>;

    /// Remove the record created by [`present`](Self::present).
    /// Must not fail when the record is already gone.
    async fn cleanup(&self, domain: &str, handle: &str) -> DnsResult<()>;
}

/// ACME challenge record name prefix
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// Strip the wildcard label: `*.example.com` validates as `example.com`
pub fn normalize_domain(domain: &str) -> &str {
    domain.strip_prefix("*.").unwrap_or(domain)
}

/// `_acme-challenge.{domain}` with any wildcard prefix removed
pub fn challenge_record_fqdn(domain: &str) -> String {
    format!("{}.{}", ACME_CHALLENGE_RECORD, normalize_domain(domain))
}

/// TXT value for a key authorization: base64url(SHA-256(key_authorization))
pub fn challenge_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
}

/// Candidate zones for a domain, most specific first, stopping above the TLD.
///
/// `a.b.example.com` yields `a.b.example.com`, `b.example.com`, `example.com`.
pub fn zone_candidates(domain: &str) -> Vec<String> {
    let domain = normalize_domain(domain).trim_end_matches('.');
    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return vec![domain.to_string()];
    }
    (0..labels.len() - 1)
        .map(|i| labels[i..].join("."))
        .collect()
}

/// Record name relative to its zone: `_acme-challenge.www` in `example.com`
pub fn relative_record_name(fqdn: &str, zone: &str) -> String {
    fqdn.strip_suffix(zone)
        .map(|s| s.trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .unwrap_or(fqdn)
        .to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("example.com"), "example.com");
        assert_eq!(normalize_domain("*.example.com"), "example.com");
        assert_eq!(normalize_domain("*.sub.example.com"), "sub.example.com");
    }

    #[test]
    fn test_challenge_record_fqdn() {
        assert_eq!(challenge_record_fqdn("example.com"), "_acme-challenge.example.com");
        assert_eq!(challenge_record_fqdn("*.example.com"), "_acme-challenge.example.com");
    }

    #[test]
    fn test_challenge_value() {
        // RFC 8555 section 8.4: base64url(SHA-256("token.thumbprint")), unpadded
        let value = challenge_value("token.thumbprint");
        assert_eq!(value.len(), 43);
        assert!(!value.contains('='));
        assert!(!value.contains('+') && !value.contains('/'));
        assert_eq!(value, challenge_value("token.thumbprint"));
        assert_ne!(value, challenge_value("other.thumbprint"));
    }

    #[test]
    fn test_zone_candidates() {
        assert_eq!(
            zone_candidates("*.a.b.example.com"),
            vec!["a.b.example.com", "b.example.com", "example.com"]
        );
        assert_eq!(zone_candidates("example.com"), vec!["example.com"]);
    }

    #[test]
    fn test_relative_record_name() {
        assert_eq!(
            relative_record_name("_acme-challenge.www.example.com", "example.com"),
            "_acme-challenge.www"
        );
        assert_eq!(
            relative_record_name("_acme-challenge.example.com", "example.com"),
            "_acme-challenge"
        );
    }

    #[test]
    fn test_default_settings() {
        let settings = SolverSettings::default();
        assert_eq!(settings.propagation_timeout, Duration::from_secs(1800));
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.ttl, 3600);
    }

    /// In-memory solver used by registry and orchestrator tests
    #[derive(Debug, Default)]
    pub struct MockDnsSolver {
        /// handle -> (record fqdn, value)
        pub records: Mutex<HashMap<String, (String, String)>>,
        pub next_id: AtomicU64,
    }

    #[async_trait]
    impl DnsSolver for MockDnsSolver {
        fn name(&self) -> &'static str {
            "Mock"
        }

        async fn present(&self, domain: &str, value: &str) -> DnsResult<String> {
            let id = format!("rec-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.records
                .lock()
                .unwrap()
                .insert(id.clone(), (challenge_record_fqdn(domain), value.to_string()));
            Ok(id)
        }

        async fn cleanup(&self, _domain: &str, handle: &str) -> DnsResult<()> {
            self.records.lock().unwrap().remove(handle);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_mock_solver_present_cleanup() {
        let solver = MockDnsSolver::default();
        let handle = solver.present("*.example.com", "abc").await.unwrap();
        assert_eq!(
            solver.records.lock().unwrap().get(&handle).unwrap().0,
            "_acme-challenge.example.com"
        );
        solver.cleanup("*.example.com", &handle).await.unwrap();
        solver.cleanup("*.example.com", &handle).await.unwrap();
        assert!(solver.records.lock().unwrap().is_empty());
    }
}
