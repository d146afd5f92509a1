//! Certificate lifecycle
//!
//! Apply and Renew move a certificate `ready|applied|error -> applying ->
//! applied|error`. Only one issuance per certificate runs at a time and a
//! semaphore caps issuances across certificates. The database row is the
//! source of truth; files under `{ssl_dir}/certs/` are derived from it.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::parse::parse_certificate;
use super::progress::{self, ProgressLog};
use super::store::{CertificateStore, NewCertificate};
use super::types::{
    CertStatus, Certificate, CertificatePaths, CreateCertificateRequest, ProviderMode,
    SourceType, UpdateCertificateRequest, UploadCertificateRequest,
};
use crate::acme::{keys, AccountManager, AcmeBackend, KeyType, ProgressSink};
use crate::error::{Result, SiteError};
use crate::settings::{SettingsStore, SSL_DIR_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IssueKind {
    Apply,
    Renew,
}

impl IssueKind {
    fn verb(&self) -> &'static str {
        match self {
            IssueKind::Apply => "apply",
            IssueKind::Renew => "renew",
        }
    }
}

/// Marks a certificate id as in flight until dropped
struct FlightGuard {
    in_flight: Arc<Mutex<HashSet<i64>>>,
    id: i64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.id);
        }
    }
}

/// Write `fullchain.pem` (0644) and `privkey.pem` (0600)
pub fn write_material(ssl_dir: &Path, primary_domain: &str, pem: &str, key: &str) -> std::io::Result<CertificatePaths> {
    let paths = CertificatePaths::for_domain(ssl_dir, primary_domain);
    fs::create_dir_all(&paths.cert_dir)?;
    fs::write(&paths.cert_path, pem)?;
    fs::write(&paths.key_path, key)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&paths.cert_path, fs::Permissions::from_mode(0o644))?;
        fs::set_permissions(&paths.key_path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(paths)
}

/// Drives certificate issuance and owns certificate records
pub struct CertificateService {
    store: CertificateStore,
    accounts: Arc<AccountManager>,
    settings: SettingsStore,
    backend: Arc<dyn AcmeBackend>,
    default_ssl_dir: PathBuf,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    permits: Arc<Semaphore>,
}

impl CertificateService {
    pub fn new(
        store: CertificateStore,
        accounts: Arc<AccountManager>,
        settings: SettingsStore,
        backend: Arc<dyn AcmeBackend>,
        default_ssl_dir: PathBuf,
        max_concurrent_issuance: usize,
    ) -> Self {
        Self {
            store,
            accounts,
            settings,
            backend,
            default_ssl_dir,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            permits: Arc::new(Semaphore::new(max_concurrent_issuance.max(1))),
        }
    }

    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    /// SSL base directory: the `SSLDir` setting, else the configured default
    pub async fn ssl_dir(&self) -> Result<PathBuf> {
        Ok(self
            .settings
            .get(SSL_DIR_KEY)
            .await?
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_ssl_dir.clone()))
    }

    /// Change the SSL base directory, creating it first
    pub async fn update_ssl_dir(&self, dir: &str) -> Result<()> {
        let path = Path::new(dir.trim());
        if !path.is_absolute() {
            return Err(SiteError::Validation(format!(
                "SSL directory must be absolute: {}",
                dir
            )));
        }
        fs::create_dir_all(path)?;
        self.settings.set(SSL_DIR_KEY, &path.to_string_lossy()).await?;
        info!(dir = %path.display(), "SSL directory updated");
        Ok(())
    }

    fn claim(&self, id: i64) -> Result<FlightGuard> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| SiteError::Conflict("issuance registry poisoned".to_string()))?;
        if !set.insert(id) {
            return Err(SiteError::Conflict(format!(
                "certificate {} is already being issued",
                id
            )));
        }
        Ok(FlightGuard {
            in_flight: self.in_flight.clone(),
            id,
        })
    }

    pub fn is_in_flight(&self, id: i64) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(&id))
            .unwrap_or(false)
    }

    pub async fn create(self: &Arc<Self>, request: CreateCertificateRequest) -> Result<Certificate> {
        let primary = request.primary_domain.trim();
        if primary.is_empty() {
            return Err(SiteError::Validation("primary domain is empty".to_string()));
        }

        let dns_account_id = match request.provider {
            ProviderMode::Manual => {
                return Err(SiteError::Validation(
                    "manual certificates are imported with upload".to_string(),
                ));
            }
            ProviderMode::Dns => {
                let id = request.dns_account_id.ok_or_else(|| {
                    SiteError::Validation("dns provider requires a DNS account".to_string())
                })?;
                if self.accounts.get_dns_account(id).await?.is_none() {
                    return Err(SiteError::Validation(format!("DNS account {} not found", id)));
                }
                Some(id)
            }
            ProviderMode::Http => None,
        };
        if self.accounts.get_account(request.acme_account_id).await?.is_none() {
            return Err(SiteError::Validation(format!(
                "ACME account {} not found",
                request.acme_account_id
            )));
        }

        let sans: Vec<String> = request
            .san_domains
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty() && d != primary)
            .collect();
        let key_type = request.key_type.unwrap_or(KeyType::Rsa2048);

        let cert = self
            .store
            .insert(NewCertificate {
                primary_domain: primary,
                san_domains: &sans,
                provider: request.provider,
                source: SourceType::AutoApply,
                key_type: Some(key_type.as_str()),
                acme_account_id: Some(request.acme_account_id),
                dns_account_id,
                pem: None,
                private_key: None,
                issued_at: None,
                expires_at: None,
                status: CertStatus::Ready,
                auto_renew: request.auto_renew,
                description: &request.description,
            })
            .await?;
        info!(id = cert.id, domain = %cert.primary_domain, "Certificate created");

        if request.apply {
            self.apply(cert.id).await?;
        }
        Ok(cert)
    }

    /// Import an externally issued certificate
    pub async fn upload(&self, request: UploadCertificateRequest) -> Result<Certificate> {
        let parsed = parse_certificate(&request.certificate)
            .map_err(|e| SiteError::Validation(e.to_string()))?;
        keys::validate_private_key_pem(&request.private_key)
            .map_err(|e| SiteError::Validation(e.to_string()))?;

        let cert = self
            .store
            .insert(NewCertificate {
                primary_domain: &parsed.primary_domain,
                san_domains: &parsed.san_domains,
                provider: ProviderMode::Manual,
                source: SourceType::Upload,
                key_type: None,
                acme_account_id: None,
                dns_account_id: None,
                pem: Some(&request.certificate),
                private_key: Some(&request.private_key),
                issued_at: Some(parsed.not_before),
                expires_at: Some(parsed.not_after),
                status: CertStatus::Applied,
                auto_renew: false,
                description: &request.description,
            })
            .await?;

        let ssl_dir = self.ssl_dir().await?;
        if let Err(e) = write_material(
            &ssl_dir,
            &cert.primary_domain,
            &request.certificate,
            &request.private_key,
        ) {
            warn!(id = cert.id, error = %e, "Failed to write uploaded certificate files");
        }

        info!(id = cert.id, domain = %cert.primary_domain, "Certificate uploaded");
        Ok(cert)
    }

    /// Edit certificate metadata. Refused while an issuance for it runs.
    pub async fn update(&self, id: i64, request: UpdateCertificateRequest) -> Result<Certificate> {
        let _guard = self.claim(id)?;
        let cert = self.store.require(id).await?;

        let primary = request
            .primary_domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(&cert.primary_domain)
            .to_string();
        let sans = match request.san_domains {
            Some(sans) => sans
                .into_iter()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty() && *d != primary)
                .collect(),
            None => cert.san_domains.clone(),
        };

        self.store
            .update_meta(id, request.auto_renew, &request.description, &primary, &sans)
            .await?;

        if primary != cert.primary_domain {
            let ssl_dir = self.ssl_dir().await?;
            let from = ProgressLog::path_for(&ssl_dir, &cert.primary_domain, id);
            let to = ProgressLog::path_for(&ssl_dir, &primary, id);
            match fs::rename(&from, &to) {
                Ok(()) => info!(id, log = %to.display(), "Issuance log renamed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(id, error = %e, "Failed to rename issuance log"),
            }
        }
        self.store.require(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let _guard = self.claim(id)?;
        let cert = self.store.require(id).await?;

        let paths = CertificatePaths::for_domain(&self.ssl_dir().await?, &cert.primary_domain);
        match fs::remove_dir_all(&paths.cert_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(id, error = %e, "Failed to remove certificate files"),
        }

        self.store.delete(id).await?;
        info!(id, domain = %cert.primary_domain, "Certificate deleted");
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Certificate> {
        self.store.require(id).await
    }

    pub async fn list(&self) -> Result<Vec<Certificate>> {
        self.store.list().await
    }

    /// Issuance log text for a certificate
    pub async fn get_log(&self, id: i64) -> Result<String> {
        let cert = self.store.require(id).await?;
        let path = ProgressLog::path_for(&self.ssl_dir().await?, &cert.primary_domain, id);
        Ok(progress::read_log(&path)?)
    }

    /// Start issuance in the background. Returns once the request is accepted.
    pub async fn apply(self: &Arc<Self>, id: i64) -> Result<()> {
        self.spawn_issue(id, IssueKind::Apply).await
    }

    /// Start renewal in the background. Uploaded certificates are refused
    /// without touching their state.
    pub async fn renew(self: &Arc<Self>, id: i64) -> Result<()> {
        self.spawn_issue(id, IssueKind::Renew).await
    }

    /// Apply and wait for the outcome
    pub async fn apply_now(&self, id: i64) -> Result<Certificate> {
        let (cert, guard) = self.prepare(id, IssueKind::Apply).await?;
        self.run_issue(cert, IssueKind::Apply, guard).await
    }

    /// Renew and wait for the outcome
    pub async fn renew_now(&self, id: i64) -> Result<Certificate> {
        let (cert, guard) = self.prepare(id, IssueKind::Renew).await?;
        self.run_issue(cert, IssueKind::Renew, guard).await
    }

    async fn prepare(&self, id: i64, kind: IssueKind) -> Result<(Certificate, FlightGuard)> {
        let cert = self.store.require(id).await?;
        if cert.source == SourceType::Upload {
            return Err(match kind {
                IssueKind::Renew => SiteError::UploadNotRenewable,
                IssueKind::Apply => SiteError::Validation(
                    "uploaded certificates cannot be applied".to_string(),
                ),
            });
        }
        let guard = self.claim(id)?;
        Ok((cert, guard))
    }

    async fn spawn_issue(self: &Arc<Self>, id: i64, kind: IssueKind) -> Result<()> {
        let (cert, guard) = self.prepare(id, kind).await?;
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.run_issue(cert, kind, guard).await {
                error!(id, action = kind.verb(), error = %e, "Certificate issuance failed");
            }
        });
        Ok(())
    }

    async fn run_issue(&self, cert: Certificate, kind: IssueKind, _guard: FlightGuard) -> Result<Certificate> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SiteError::Conflict("issuance queue closed".to_string()))?;

        let id = cert.id;
        let ssl_dir = self.ssl_dir().await?;
        self.store.set_status(id, CertStatus::Applying, "").await?;

        let log = ProgressLog::create(ProgressLog::path_for(&ssl_dir, &cert.primary_domain, id));
        log.record(&format!(
            "Starting certificate {} for {}",
            kind.verb(),
            cert.primary_domain
        ));

        match self.issue(&cert, &ssl_dir, &log).await {
            Ok(()) => {
                log.record("Finished");
                info!(id, domain = %cert.primary_domain, action = kind.verb(), "Certificate issued");
                self.store.require(id).await
            }
            Err(e) => {
                let message = e.to_string();
                log.record(&format!("Error: {}", message));
                self.store.set_status(id, CertStatus::Error, &message).await?;
                Err(e)
            }
        }
    }

    async fn issue(&self, cert: &Certificate, ssl_dir: &Path, log: &ProgressLog) -> Result<()> {
        let account_id = cert
            .acme_account_id
            .ok_or_else(|| SiteError::Validation("certificate has no ACME account".to_string()))?;
        let account = self
            .accounts
            .get_account(account_id)
            .await?
            .ok_or_else(|| SiteError::NotFound(format!("ACME account {}", account_id)))?;
        log.record(&format!("ACME account: {} ({})", account.email, account.ca_type));

        log.record(&format!("Creating ACME client (account URL: {})", account.account_url));
        let mut session = self.backend.connect(&account).await?;

        if cert.provider == ProviderMode::Dns {
            let dns_id = cert
                .dns_account_id
                .ok_or_else(|| SiteError::Validation("dns provider without DNS account".to_string()))?;
            let dns = self
                .accounts
                .get_dns_account(dns_id)
                .await?
                .ok_or_else(|| SiteError::NotFound(format!("DNS account {}", dns_id)))?;
            log.record(&format!("DNS account: {} ({})", dns.name, dns.provider));

            let solver = self.accounts.registry().resolve(&dns.provider, &dns.authorization)?;
            session.set_dns_solver(solver);
            log.record("DNS provider configured");
        }

        let domains = cert.domains();
        let key_type = cert.key_type.unwrap_or(account.key_type);
        log.record(&format!("Domains: {}", domains.join(", ")));
        log.record(&format!("Key type: {}", key_type));
        log.record("Requesting certificate from CA, this can take several minutes");

        let issued = session.obtain(&domains, key_type, log).await?;
        log.record("Certificate obtained");

        let parsed = parse_certificate(&issued.certificate_pem)?;
        log.record(&format!(
            "Valid from {} to {}",
            parsed.not_before.format("%Y-%m-%d"),
            parsed.not_after.format("%Y-%m-%d")
        ));

        self.store
            .record_issued(
                cert.id,
                &issued.certificate_pem,
                &issued.private_key_pem,
                parsed.not_before,
                parsed.not_after,
            )
            .await?;

        match write_material(
            ssl_dir,
            &cert.primary_domain,
            &issued.certificate_pem,
            &issued.private_key_pem,
        ) {
            Ok(paths) => log.record(&format!(
                "Certificate files saved to {}",
                paths.cert_dir.display()
            )),
            Err(e) => {
                warn!(id = cert.id, error = %e, "Failed to write certificate files");
                log.record(&format!("Warning: failed to save certificate files: {}", e));
            }
        }
        Ok(())
    }

    /// File paths of an applied certificate, rewriting them from the
    /// database when missing on disk
    pub async fn material_paths(&self, id: i64) -> Result<CertificatePaths> {
        let cert = self.store.require(id).await?;
        let (pem, key) = match (&cert.status, &cert.pem, &cert.private_key) {
            (CertStatus::Applied, Some(pem), Some(key)) if !pem.is_empty() && !key.is_empty() => {
                (pem, key)
            }
            _ => {
                return Err(SiteError::Validation(format!(
                    "certificate {} is not applied",
                    id
                )));
            }
        };

        let ssl_dir = self.ssl_dir().await?;
        let paths = CertificatePaths::for_domain(&ssl_dir, &cert.primary_domain);
        if paths.exists() {
            return Ok(paths);
        }

        info!(id, dir = %paths.cert_dir.display(), "Restoring certificate files from database");
        Ok(write_material(&ssl_dir, &cert.primary_domain, pem, key)?)
    }
}
