//! Service wiring

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::acme::{AccountManager, AcmeBackend, InstantAcmeBackend};
use crate::certificate::{CertificateService, CertificateStore, RenewalScheduler};
use crate::config::AppConfig;
use crate::dns::ProviderRegistry;
use crate::error::Result;
use crate::settings::SettingsStore;
use crate::site::{ConfigFiles, NginxLayout, NginxRuntime, ServerControl, SiteService, SiteStore};

/// All services sharing one database
pub struct Services {
    pub db: SqlitePool,
    pub accounts: Arc<AccountManager>,
    pub certificates: Arc<CertificateService>,
    pub sites: Arc<SiteService>,
    /// Hand-edited nginx config files
    pub conf_files: Arc<ConfigFiles>,
}

impl Services {
    /// Connect to the configured database and build production services
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        info!("Connecting to database");
        let db = SqlitePool::connect(&config.database_url).await?;

        let backend = Arc::new(InstantAcmeBackend::new(config.acme.http_webroot.clone()));
        let server = Arc::new(nginx_runtime(config));
        Self::build(config, db, backend, server, ProviderRegistry::with_builtin()).await
    }

    /// Build services over existing parts and create missing tables
    pub async fn build(
        config: &AppConfig,
        db: SqlitePool,
        backend: Arc<dyn AcmeBackend>,
        server: Arc<dyn ServerControl>,
        registry: ProviderRegistry,
    ) -> Result<Self> {
        let accounts = Arc::new(AccountManager::new(db.clone(), backend.clone(), Arc::new(registry)));
        accounts.init_db().await?;

        let settings = SettingsStore::new(db.clone());
        settings.init_db().await?;

        let cert_store = CertificateStore::new(db.clone());
        cert_store.init_db().await?;

        let site_store = SiteStore::new(db.clone());
        site_store.init_db().await?;

        let certificates = Arc::new(CertificateService::new(
            cert_store,
            accounts.clone(),
            settings,
            backend,
            config.ssl_dir.clone(),
            config.acme.max_concurrent_issuance,
        ));
        let conf_files = Arc::new(ConfigFiles::new(server.clone()));
        let sites = Arc::new(SiteService::new(
            site_store,
            certificates.clone(),
            server,
            config.nginx.www_root.clone(),
        ));

        Ok(Self {
            db,
            accounts,
            certificates,
            sites,
            conf_files,
        })
    }

    pub fn renewal_scheduler(&self, config: &AppConfig) -> RenewalScheduler {
        RenewalScheduler::new(
            self.certificates.clone(),
            config.acme.renew_before_days,
            Duration::from_secs(config.acme.renew_check_interval_secs),
        )
    }
}

/// nginx controller for the configured install prefix
pub fn nginx_runtime(config: &AppConfig) -> NginxRuntime {
    NginxRuntime::new(
        NginxLayout::new(config.nginx.install_dir.clone()),
        Duration::from_secs(config.nginx.command_timeout_secs),
    )
}
