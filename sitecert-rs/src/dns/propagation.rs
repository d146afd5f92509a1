//! TXT record propagation checks against public resolvers

use std::time::Instant;
use tracing::{debug, info};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

use super::provider::{DnsProviderError, DnsResult, SolverSettings};

/// Polls DNS until a challenge TXT record becomes visible
pub struct PropagationChecker {
    resolver: TokioAsyncResolver,
}

impl PropagationChecker {
    pub fn new() -> Self {
        let mut opts = ResolverOpts::default();
        // challenge records change between attempts
        opts.cache_size = 0;
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
        }
    }

    /// Whether `fqdn` currently has a TXT record equal to `expected`
    pub async fn has_txt(&self, fqdn: &str, expected: &str) -> bool {
        match self.resolver.txt_lookup(fqdn).await {
            Ok(lookup) => lookup.iter().any(|record| record.to_string() == expected),
            Err(e) => {
                debug!(record = %fqdn, error = %e, "TXT lookup failed");
                false
            }
        }
    }

    /// Wait until `fqdn` serves `expected`, polling every
    /// `settings.poll_interval` up to `settings.propagation_timeout`
    pub async fn wait_for(&self, fqdn: &str, expected: &str, settings: &SolverSettings) -> DnsResult<()> {
        let started = Instant::now();
        loop {
            if self.has_txt(fqdn, expected).await {
                info!(record = %fqdn, elapsed_secs = started.elapsed().as_secs(), "TXT record propagated");
                return Ok(());
            }
            if started.elapsed() + settings.poll_interval > settings.propagation_timeout {
                return Err(DnsProviderError::Propagation {
                    record_name: fqdn.to_string(),
                    elapsed_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(settings.poll_interval).await;
        }
    }
}

impl Default for PropagationChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_times_out_on_missing_record() {
        let checker = PropagationChecker::new();
        let settings = SolverSettings {
            propagation_timeout: Duration::from_millis(10),
            poll_interval: Duration::from_millis(5),
            ttl: 60,
        };
        let result = checker
            .wait_for("_acme-challenge.nonexistent.invalid", "value", &settings)
            .await;
        assert!(matches!(result, Err(DnsProviderError::Propagation { .. })));
    }
}
