//! Background auto-renewal

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::orchestrator::CertificateService;
use crate::error::Result;

pub struct RenewalScheduler {
    service: Arc<CertificateService>,
    renew_before_days: i64,
    interval: Duration,
}

impl RenewalScheduler {
    pub fn new(service: Arc<CertificateService>, renew_before_days: i64, interval: Duration) -> Self {
        Self {
            service,
            renew_before_days,
            interval,
        }
    }

    /// Start renewals for every certificate inside the renewal window.
    /// Returns the ids whose renewal was started.
    pub async fn run_once(&self) -> Result<Vec<i64>> {
        let cutoff = Utc::now() + ChronoDuration::days(self.renew_before_days);
        let due = self.service.store().due_for_renewal(cutoff).await?;
        debug!(count = due.len(), cutoff = %cutoff, "Checked certificates for renewal");

        let mut started = Vec::new();
        for cert in due {
            match self.service.renew(cert.id).await {
                Ok(()) => {
                    info!(id = cert.id, domain = %cert.primary_domain, "Starting certificate renewal");
                    started.push(cert.id);
                }
                Err(e) => warn!(id = cert.id, error = %e, "Skipping certificate renewal"),
            }
        }
        Ok(started)
    }

    /// Check every `interval` until the task is dropped
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                if let Err(e) = self.run_once().await {
                    error!("Certificate renewal check failed: {}", e);
                }
            }
        })
    }
}
