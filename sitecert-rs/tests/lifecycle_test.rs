//! End-to-end tests: account, certificate issuance and SSL site activation

use async_trait::async_trait;
use sitecert_rs::acme::{
    keys, AcmeAccount, AcmeBackend, AcmeError, CaType, ExternalAccountBinding, IssuanceSession,
    IssuedCertificate, KeyType, ProgressSink, RegisterAccountRequest, RegisteredAccount,
};
use sitecert_rs::certificate::{CertStatus, CreateCertificateRequest, ProviderMode};
use sitecert_rs::dns::{DnsSolver, ProviderRegistry};
use sitecert_rs::site::{
    ConfigTest, CreateWebsiteRequest, HttpMode, NginxLayout, ServerControl, SiteStatus, SiteType,
    UpdateWebsiteRequest,
};
use sitecert_rs::{AppConfig, Result, Services, SiteError};
use sqlx::sqlite::SqlitePoolOptions;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Issues self-signed certificates named after the requested domains
struct StubCa;

struct StubSession;

#[async_trait]
impl AcmeBackend for StubCa {
    async fn register(
        &self,
        _email: &str,
        key_type: KeyType,
        directory_url: &str,
        _eab: Option<&ExternalAccountBinding>,
    ) -> std::result::Result<RegisteredAccount, AcmeError> {
        Ok(RegisteredAccount {
            private_key_pem: keys::generate_key(key_type)?.pem,
            account_url: format!("{}/acct/7", directory_url),
        })
    }

    async fn connect(
        &self,
        _account: &AcmeAccount,
    ) -> std::result::Result<Box<dyn IssuanceSession>, AcmeError> {
        Ok(Box::new(StubSession))
    }
}

#[async_trait]
impl IssuanceSession for StubSession {
    fn set_dns_solver(&mut self, _solver: Arc<dyn DnsSolver>) {}

    async fn obtain(
        &mut self,
        domains: &[String],
        _key_type: KeyType,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<IssuedCertificate, AcmeError> {
        progress.record("stub order finalized");
        let mut params = rcgen::CertificateParams::new(domains.to_vec())
            .map_err(|e| AcmeError::Finalization(e.to_string()))?;
        params.distinguished_name = rcgen::DistinguishedName::new();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, domains[0].as_str());
        let key = rcgen::KeyPair::generate().map_err(|e| AcmeError::KeyGeneration(e.to_string()))?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| AcmeError::Finalization(e.to_string()))?;
        Ok(IssuedCertificate {
            certificate_pem: cert.pem(),
            private_key_pem: key.serialize_pem(),
        })
    }
}

/// nginx stand-in that accepts or rejects every config
struct StubNginx {
    layout: NginxLayout,
    reject: AtomicBool,
    reloads: AtomicUsize,
}

#[async_trait]
impl ServerControl for StubNginx {
    fn layout(&self) -> &NginxLayout {
        &self.layout
    }

    async fn test_config(&self) -> Result<ConfigTest> {
        let reject = self.reject.load(Ordering::SeqCst);
        Ok(ConfigTest {
            success: !reject,
            output: if reject { "emerg".to_string() } else { "ok".to_string() },
        })
    }

    async fn reload_if_running(&self) -> Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Env {
    services: Services,
    nginx: Arc<StubNginx>,
    _root: TempDir,
}

async fn setup() -> Env {
    let root = tempfile::tempdir().unwrap();
    let install = root.path().join("nginx");
    let layout = NginxLayout::new(&install);
    fs::create_dir_all(install.join("sbin")).unwrap();
    fs::write(layout.binary(), "").unwrap();
    fs::create_dir_all(layout.conf_dir()).unwrap();
    fs::write(layout.main_conf(), "events {}\nhttp {\n}\n").unwrap();

    let mut config = AppConfig::default();
    config.ssl_dir = root.path().join("ssl");
    config.nginx.install_dir = install;
    config.nginx.www_root = root.path().join("www");

    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let nginx = Arc::new(StubNginx {
        layout,
        reject: AtomicBool::new(false),
        reloads: AtomicUsize::new(0),
    });
    let services = Services::build(
        &config,
        db,
        Arc::new(StubCa),
        nginx.clone(),
        ProviderRegistry::with_builtin(),
    )
    .await
    .unwrap();

    Env {
        services,
        nginx,
        _root: root,
    }
}

async fn issued_certificate(env: &Env, domain: &str) -> i64 {
    let account = env
        .services
        .accounts
        .create_account(RegisterAccountRequest {
            email: "ops@example.com".to_string(),
            ca_type: CaType::Buypass,
            key_type: KeyType::Ec256,
            directory_url: None,
            eab: None,
        })
        .await
        .unwrap();
    assert!(account.account_url.ends_with("/acct/7"));

    let cert = env
        .services
        .certificates
        .create(CreateCertificateRequest {
            primary_domain: domain.to_string(),
            san_domains: vec![format!("www.{}", domain)],
            provider: ProviderMode::Http,
            acme_account_id: account.id,
            dns_account_id: None,
            key_type: None,
            auto_renew: true,
            description: "site".to_string(),
            apply: false,
        })
        .await
        .unwrap();
    let cert = env.services.certificates.apply_now(cert.id).await.unwrap();
    assert_eq!(cert.status, CertStatus::Applied);
    cert.id
}

#[tokio::test]
async fn test_https_site_end_to_end() {
    let env = setup().await;
    let cert_id = issued_certificate(&env, "shop.example.com").await;

    let site = env
        .services
        .sites
        .create(CreateWebsiteRequest {
            primary_domain: "shop.example.com".to_string(),
            domains: vec!["www.shop.example.com".to_string()],
            site_type: SiteType::ReverseProxy,
            site_dir: None,
            proxy_pass: "http://127.0.0.1:3000".to_string(),
            remark: String::new(),
        })
        .await
        .unwrap();

    let mut update = UpdateWebsiteRequest::from_site(&site);
    update.ssl_enable = true;
    update.certificate_id = Some(cert_id);
    update.hsts = true;
    update.web_socket = true;
    env.services.sites.update(site.id, update).await.unwrap();

    env.services.sites.enable(site.id).await.unwrap();
    let site = env.services.sites.get(site.id).await.unwrap();
    assert_eq!(site.status, SiteStatus::Running);
    assert_eq!(site.http_config, HttpMode::HttpsRedirect);

    let text = fs::read_to_string(env.nginx.layout().site_config("shop_example_com")).unwrap();
    let ssl_dir = env.services.certificates.ssl_dir().await.unwrap();
    let fullchain = ssl_dir.join("certs/shop.example.com/fullchain.pem");
    assert!(fullchain.is_file());
    assert!(text.contains(&format!("ssl_certificate {};", fullchain.display())));
    assert_eq!(text.matches("return 301 https://$host$request_uri;").count(), 1);
    assert!(text.contains("server_name shop.example.com www.shop.example.com;"));
    assert!(text.contains("proxy_pass http://127.0.0.1:3000;"));
    assert!(text.contains("Strict-Transport-Security"));

    let main = fs::read_to_string(env.nginx.layout().main_conf()).unwrap();
    assert!(main.contains("include conf.d/*.conf;"));

    let log = env.services.certificates.get_log(cert_id).await.unwrap();
    assert!(log.contains("stub order finalized"));
}

#[tokio::test]
async fn test_rejected_config_leaves_site_stopped() {
    let env = setup().await;
    let site = env
        .services
        .sites
        .create(CreateWebsiteRequest {
            primary_domain: "blog.example.com".to_string(),
            domains: Vec::new(),
            site_type: SiteType::Static,
            site_dir: None,
            proxy_pass: String::new(),
            remark: String::new(),
        })
        .await
        .unwrap();
    env.nginx.reject.store(true, Ordering::SeqCst);

    let result = env.services.sites.enable(site.id).await;
    assert!(matches!(result, Err(SiteError::Validation(_))));
    assert!(!env.nginx.layout().site_config("blog_example_com").exists());
    assert_eq!(env.nginx.reloads.load(Ordering::SeqCst), 0);
    assert_eq!(
        env.services.sites.get(site.id).await.unwrap().status,
        SiteStatus::Stopped
    );
}

#[tokio::test]
async fn test_ssl_requires_applied_certificate() {
    let env = setup().await;
    let site = env
        .services
        .sites
        .create(CreateWebsiteRequest {
            primary_domain: "api.example.com".to_string(),
            domains: Vec::new(),
            site_type: SiteType::ReverseProxy,
            site_dir: None,
            proxy_pass: "http://127.0.0.1:9000".to_string(),
            remark: String::new(),
        })
        .await
        .unwrap();

    let mut update = UpdateWebsiteRequest::from_site(&site);
    update.ssl_enable = true;
    update.certificate_id = Some(99);
    assert!(matches!(
        env.services.sites.update(site.id, update).await,
        Err(SiteError::NotFound(_))
    ));
    assert!(!env.services.sites.get(site.id).await.unwrap().ssl_enable);
}
