//! ACME protocol client
//!
//! [`AcmeBackend`] is the seam between the certificate orchestrator and the
//! CA: it registers accounts and opens an [`IssuanceSession`] bound to one
//! stored account. [`InstantAcmeBackend`] implements it over `instant-acme`.

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, ExternalAccountKey,
    Identifier, NewAccount, NewOrder, Order, OrderStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::error::AcmeError;
use super::keys;
use super::types::{AcmeAccount, ExternalAccountBinding, KeyType};
use crate::dns::{challenge_record_fqdn, challenge_value, DnsSolver, PropagationChecker};

/// How long to wait for the CA to validate challenges and issue
const ORDER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Receives human readable progress lines during issuance
pub trait ProgressSink: Send + Sync {
    fn record(&self, message: &str);
}

/// Outcome of a successful registration
#[derive(Clone)]
pub struct RegisteredAccount {
    /// PKCS#8 PEM account key
    pub private_key_pem: String,
    /// CA-assigned account URL
    pub account_url: String,
}

/// Issued certificate material
#[derive(Clone)]
pub struct IssuedCertificate {
    /// Full chain, leaf first
    pub certificate_pem: String,
    pub private_key_pem: String,
}

/// Certificate authority operations
#[async_trait]
pub trait AcmeBackend: Send + Sync {
    /// Whether accounts can be created with a `key_type` account key
    fn supports_account_key(&self, key_type: KeyType) -> bool {
        key_type == KeyType::Ec256
    }

    /// Create a new account at `directory_url` signed with a fresh
    /// `key_type` key
    async fn register(
        &self,
        email: &str,
        key_type: KeyType,
        directory_url: &str,
        eab: Option<&ExternalAccountBinding>,
    ) -> Result<RegisteredAccount, AcmeError>;

    /// Bind a client to a stored account. Fails without a CA-assigned
    /// account URL.
    async fn connect(&self, account: &AcmeAccount) -> Result<Box<dyn IssuanceSession>, AcmeError>;
}

/// A client bound to one account
#[async_trait]
pub trait IssuanceSession: Send {
    /// Solve challenges with DNS-01 through `solver` instead of HTTP-01
    fn set_dns_solver(&mut self, solver: Arc<dyn DnsSolver>);

    /// Order, validate, finalize and download a certificate for `domains`
    /// using a fresh key of `key_type`
    async fn obtain(
        &mut self,
        domains: &[String],
        key_type: KeyType,
        progress: &dyn ProgressSink,
    ) -> Result<IssuedCertificate, AcmeError>;
}

/// [`AcmeBackend`] over `instant-acme`
pub struct InstantAcmeBackend {
    http_webroot: PathBuf,
    propagation: Arc<PropagationChecker>,
}

impl InstantAcmeBackend {
    /// `http_webroot` is the document root serving
    /// `/.well-known/acme-challenge/` for HTTP-01
    pub fn new(http_webroot: PathBuf) -> Self {
        Self {
            http_webroot,
            propagation: Arc::new(PropagationChecker::new()),
        }
    }
}

/// Account key bytes from `instant-acme` credentials
fn credentials_key_der(credentials: &AccountCredentials) -> Result<(String, Vec<u8>), AcmeError> {
    let value = serde_json::to_value(credentials)
        .map_err(|e| AcmeError::Registration(format!("unreadable credentials: {}", e)))?;
    let account_url = value["id"].as_str().unwrap_or_default().to_string();
    let key = value["key_pkcs8"]
        .as_str()
        .ok_or_else(|| AcmeError::Registration("credentials carry no key".to_string()))?;
    let der = URL_SAFE_NO_PAD
        .decode(key.trim_end_matches('='))
        .or_else(|_| STANDARD.decode(key))
        .map_err(|e| AcmeError::Registration(format!("malformed account key: {}", e)))?;
    Ok((account_url, der))
}

#[async_trait]
impl AcmeBackend for InstantAcmeBackend {
    async fn register(
        &self,
        email: &str,
        key_type: KeyType,
        directory_url: &str,
        eab: Option<&ExternalAccountBinding>,
    ) -> Result<RegisteredAccount, AcmeError> {
        // instant-acme generates the account key itself, always P-256
        if !self.supports_account_key(key_type) {
            return Err(AcmeError::UnsupportedAccountKey(key_type.to_string()));
        }

        let external = match eab {
            Some(eab) => {
                let hmac = URL_SAFE_NO_PAD
                    .decode(eab.hmac_key.trim().trim_end_matches('='))
                    .map_err(|e| AcmeError::Registration(format!("invalid EAB HMAC key: {}", e)))?;
                Some(ExternalAccountKey::new(eab.kid.clone(), &hmac))
            }
            None => None,
        };

        let contact = format!("mailto:{}", email);
        let (_account, credentials) = Account::create(
            &NewAccount {
                contact: &[&contact],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            directory_url,
            external.as_ref(),
        )
        .await
        .map_err(|e| AcmeError::Registration(e.to_string()))?;

        let (account_url, der) = credentials_key_der(&credentials)?;
        if account_url.is_empty() {
            return Err(AcmeError::Registration(
                "CA returned no account URL".to_string(),
            ));
        }

        info!(directory = %directory_url, account_url = %account_url, "ACME account registered");
        Ok(RegisteredAccount {
            private_key_pem: keys::pkcs8_der_to_pem(&der)?,
            account_url,
        })
    }

    async fn connect(&self, account: &AcmeAccount) -> Result<Box<dyn IssuanceSession>, AcmeError> {
        if account.account_url.is_empty() {
            return Err(AcmeError::MissingAccountUrl);
        }

        let der = keys::pem_to_pkcs8_der(&account.private_key)?;
        let credentials: AccountCredentials = serde_json::from_value(serde_json::json!({
            "id": account.account_url,
            "key_pkcs8": URL_SAFE_NO_PAD.encode(der),
            "directory": account.directory_url,
        }))
        .map_err(|e| AcmeError::AccountKey(e.to_string()))?;

        let client = Account::from_credentials(credentials)
            .await
            .map_err(|e| AcmeError::AccountKey(e.to_string()))?;

        Ok(Box::new(InstantAcmeSession {
            account: client,
            solver: None,
            http_webroot: self.http_webroot.clone(),
            propagation: self.propagation.clone(),
        }))
    }
}

/// Record to withdraw once the order settles
enum PendingCleanup {
    Dns { domain: String, handle: String },
    File(PathBuf),
}

struct InstantAcmeSession {
    account: Account,
    solver: Option<Arc<dyn DnsSolver>>,
    http_webroot: PathBuf,
    propagation: Arc<PropagationChecker>,
}

fn identifier_name(identifier: &Identifier) -> String {
    match identifier {
        Identifier::Dns(domain) => domain.clone(),
        #[allow(unreachable_patterns)]
        other => format!("{:?}", other),
    }
}

impl InstantAcmeSession {
    /// Publish every pending challenge and tell the CA it can validate
    async fn prepare_challenges(
        &self,
        order: &mut Order,
        progress: &dyn ProgressSink,
        cleanups: &mut Vec<PendingCleanup>,
    ) -> Result<(), AcmeError> {
        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| AcmeError::OrderCreation(format!("Failed to get authorizations: {}", e)))?;

        let challenge_type = if self.solver.is_some() {
            ChallengeType::Dns01
        } else {
            ChallengeType::Http01
        };

        let mut ready_urls = Vec::new();
        for authz in &authorizations {
            let domain = identifier_name(&authz.identifier);
            match authz.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => {
                    progress.record(&format!("Authorization for {} already valid", domain));
                    continue;
                }
                other => {
                    return Err(AcmeError::ChallengeFailed {
                        domain,
                        message: format!("authorization is {:?}", other),
                    });
                }
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == challenge_type)
                .ok_or_else(|| AcmeError::ChallengeFailed {
                    domain: domain.clone(),
                    message: format!("CA offered no {:?} challenge", challenge_type),
                })?;
            let key_authorization = order.key_authorization(challenge);

            match &self.solver {
                Some(solver) => {
                    let value = challenge_value(key_authorization.as_str());
                    let fqdn = challenge_record_fqdn(&domain);
                    progress.record(&format!(
                        "Creating TXT record {} via {}",
                        fqdn,
                        solver.name()
                    ));
                    let handle = solver.present(&domain, &value).await.map_err(|e| {
                        AcmeError::ChallengeFailed {
                            domain: domain.clone(),
                            message: e.to_string(),
                        }
                    })?;
                    cleanups.push(PendingCleanup::Dns {
                        domain: domain.clone(),
                        handle,
                    });

                    progress.record(&format!("Waiting for {} to propagate", fqdn));
                    self.propagation
                        .wait_for(&fqdn, &value, &solver.settings())
                        .await
                        .map_err(|e| AcmeError::ChallengeFailed {
                            domain: domain.clone(),
                            message: e.to_string(),
                        })?;
                }
                None => {
                    let dir = self.http_webroot.join(".well-known").join("acme-challenge");
                    let path = dir.join(&challenge.token);
                    std::fs::create_dir_all(&dir)
                        .and_then(|_| std::fs::write(&path, key_authorization.as_str()))
                        .map_err(|e| AcmeError::ChallengeFailed {
                            domain: domain.clone(),
                            message: format!("Failed to write {}: {}", path.display(), e),
                        })?;
                    progress.record(&format!("HTTP-01 token written to {}", path.display()));
                    cleanups.push(PendingCleanup::File(path));
                }
            }

            ready_urls.push(challenge.url.clone());
        }

        for url in &ready_urls {
            order
                .set_challenge_ready(url)
                .await
                .map_err(|e| AcmeError::OrderFailed(format!("Failed to set challenge ready: {}", e)))?;
        }
        Ok(())
    }

    /// Poll the order until it leaves `pending`
    async fn wait_until_ready(&self, order: &mut Order) -> Result<(), AcmeError> {
        let started = Instant::now();
        let mut delay = Duration::from_millis(500);
        loop {
            tokio::time::sleep(delay).await;
            let state = order
                .refresh()
                .await
                .map_err(|e| AcmeError::OrderFailed(format!("Failed to refresh order: {}", e)))?;

            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    let reason = state
                        .error
                        .as_ref()
                        .and_then(|p| p.detail.clone())
                        .unwrap_or_else(|| "order is invalid".to_string());
                    return Err(AcmeError::OrderFailed(reason));
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    debug!(status = ?state.status, "Order not ready yet");
                }
            }

            if started.elapsed() > ORDER_TIMEOUT {
                return Err(AcmeError::Timeout("order validation".to_string()));
            }
            delay = (delay * 2).min(Duration::from_secs(10));
        }
    }

    async fn download(&self, order: &mut Order) -> Result<String, AcmeError> {
        let started = Instant::now();
        loop {
            match order
                .certificate()
                .await
                .map_err(|e| AcmeError::Finalization(e.to_string()))?
            {
                Some(chain) => return Ok(chain),
                None if started.elapsed() > ORDER_TIMEOUT => {
                    return Err(AcmeError::Timeout("certificate download".to_string()));
                }
                None => tokio::time::sleep(Duration::from_secs(1)).await,
            }
        }
    }

    async fn cleanup(&self, cleanups: Vec<PendingCleanup>, progress: &dyn ProgressSink) {
        for cleanup in cleanups {
            match cleanup {
                PendingCleanup::Dns { domain, handle } => {
                    if let Some(solver) = &self.solver {
                        if let Err(e) = solver.cleanup(&domain, &handle).await {
                            warn!(domain = %domain, error = %e, "Failed to remove challenge record");
                            progress.record(&format!("Failed to remove TXT record for {}: {}", domain, e));
                        }
                    }
                }
                PendingCleanup::File(path) => {
                    if let Err(e) = std::fs::remove_file(&path) {
                        debug!(path = %path.display(), error = %e, "Failed to remove challenge file");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl IssuanceSession for InstantAcmeSession {
    fn set_dns_solver(&mut self, solver: Arc<dyn DnsSolver>) {
        self.solver = Some(solver);
    }

    async fn obtain(
        &mut self,
        domains: &[String],
        key_type: KeyType,
        progress: &dyn ProgressSink,
    ) -> Result<IssuedCertificate, AcmeError> {
        let identifiers: Vec<Identifier> =
            domains.iter().map(|d| Identifier::Dns(d.clone())).collect();
        let mut order = self
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;
        progress.record(&format!("Order created for {}", domains.join(", ")));

        let mut cleanups = Vec::new();
        let validated = match self.prepare_challenges(&mut order, progress, &mut cleanups).await {
            Ok(()) => self.wait_until_ready(&mut order).await,
            Err(e) => Err(e),
        };
        self.cleanup(cleanups, progress).await;
        validated?;
        progress.record("Challenges validated");

        let key = keys::generate_key(key_type)?;
        let csr = keys::build_csr(domains, &key.key_pair)?;
        order
            .finalize(&csr)
            .await
            .map_err(|e| AcmeError::Finalization(e.to_string()))?;
        progress.record("Order finalized, downloading certificate");

        let certificate_pem = self.download(&mut order).await?;
        Ok(IssuedCertificate {
            certificate_pem,
            private_key_pem: key.pem,
        })
    }
}
