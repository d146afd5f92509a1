//! Site lifecycle and config activation
//!
//! Every config change follows write, `nginx -t`, then reload. When the
//! test fails the previous file content is restored, or the file removed
//! if there was none, so nginx never reloads a broken config.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::generator::ConfigGenerator;
use super::nginx::ServerControl;
use super::store::SiteStore;
use super::types::{
    domain_to_alias, parse_redirects, CreateWebsiteRequest, HttpMode, LogKind, SiteStatus,
    SiteType, UpdateWebsiteRequest, Website, DEFAULT_INDEX_FILES, DEFAULT_LOG_TAIL,
    DEFAULT_SSL_PROTOCOLS,
};
use crate::certificate::{CertStatus, CertificatePaths, CertificateService, NO_LOG_PLACEHOLDER};
use crate::error::{Result, SiteError};
use crate::exec;

pub struct SiteService {
    store: SiteStore,
    certificates: Arc<CertificateService>,
    server: Arc<dyn ServerControl>,
    generator: ConfigGenerator,
    /// Parent of default static site roots
    www_root: PathBuf,
}

impl SiteService {
    pub fn new(
        store: SiteStore,
        certificates: Arc<CertificateService>,
        server: Arc<dyn ServerControl>,
        www_root: PathBuf,
    ) -> Self {
        let layout = server.layout();
        let generator = ConfigGenerator::new(layout.site_log_dir(), layout.auth_dir());
        Self {
            store,
            certificates,
            server,
            generator,
            www_root,
        }
    }

    pub async fn create(&self, request: CreateWebsiteRequest) -> Result<Website> {
        let domain = request.primary_domain.trim().to_string();
        if domain.is_empty() {
            return Err(SiteError::Validation("primary domain is empty".to_string()));
        }
        if self.store.find_by_domain(&domain).await?.is_some() {
            return Err(SiteError::Conflict(format!("website {} already exists", domain)));
        }
        if request.site_type == SiteType::ReverseProxy && request.proxy_pass.trim().is_empty() {
            return Err(SiteError::Validation("reverse proxy needs a target".to_string()));
        }

        let site_dir = match (request.site_type, request.site_dir) {
            (_, Some(dir)) if !dir.trim().is_empty() => dir.trim().to_string(),
            (SiteType::Static, _) => self.www_root.join(&domain).display().to_string(),
            _ => String::new(),
        };

        let now = chrono::Utc::now();
        let draft = Website {
            id: 0,
            alias: domain_to_alias(&domain),
            domains: clean_domains(&request.domains, &domain),
            primary_domain: domain,
            site_type: request.site_type,
            status: SiteStatus::Stopped,
            site_dir,
            index_file: DEFAULT_INDEX_FILES.to_string(),
            proxy_pass: request.proxy_pass.trim().to_string(),
            web_socket: false,
            ssl_enable: false,
            certificate_id: None,
            http_config: HttpMode::HttpsRedirect,
            hsts: false,
            ssl_protocols: DEFAULT_SSL_PROTOCOLS.to_string(),
            basic_auth: false,
            basic_user: String::new(),
            basic_password: String::new(),
            anti_leech: false,
            leech_referers: String::new(),
            limit_rate: String::new(),
            limit_conn: 0,
            rewrite: String::new(),
            redirects: String::new(),
            access_log: true,
            error_log: true,
            custom_nginx: String::new(),
            default_server: false,
            remark: request.remark,
            created_at: now,
            updated_at: now,
        };
        let site = self.store.insert(&draft).await?;

        if site.site_type == SiteType::Static {
            if let Err(e) = write_placeholder(Path::new(&site.site_dir), &site.primary_domain) {
                warn!(domain = %site.primary_domain, error = %e, "Failed to prepare site directory");
            }
        }

        info!(id = site.id, domain = %site.primary_domain, site_type = %site.site_type, "Website created");
        Ok(site)
    }

    /// Save the edit, then re-apply the config when the site is running.
    /// A rejected config is rolled back on disk but the saved edit stays.
    pub async fn update(&self, id: i64, request: UpdateWebsiteRequest) -> Result<Website> {
        let mut site = self.store.require(id).await?;
        let previous_alias = site.alias.clone();

        if let Some(domain) = request.primary_domain.as_deref().map(str::trim) {
            if !domain.is_empty() && domain != site.primary_domain {
                if let Some(existing) = self.store.find_by_domain(domain).await? {
                    if existing.id != site.id {
                        return Err(SiteError::Conflict(format!(
                            "website {} already exists",
                            domain
                        )));
                    }
                }
                site.primary_domain = domain.to_string();
                site.alias = domain_to_alias(domain);
            }
        }

        parse_redirects(&request.redirects)?;
        if request.ssl_enable {
            let cert_id = request.certificate_id.ok_or_else(|| {
                SiteError::Validation("SSL requires a certificate".to_string())
            })?;
            let cert = self.certificates.get(cert_id).await?;
            if cert.status != CertStatus::Applied {
                return Err(SiteError::Validation(format!(
                    "certificate {} is {}, not applied",
                    cert_id, cert.status
                )));
            }
        }

        site.domains = clean_domains(&request.domains, &site.primary_domain);
        site.site_dir = request.site_dir;
        site.index_file = request.index_file;
        site.proxy_pass = request.proxy_pass;
        site.web_socket = request.web_socket;
        site.ssl_enable = request.ssl_enable;
        site.certificate_id = request.certificate_id;
        site.http_config = request.http_config;
        site.hsts = request.hsts;
        site.ssl_protocols = request.ssl_protocols;
        site.basic_auth = request.basic_auth;
        site.basic_user = request.basic_user;
        site.anti_leech = request.anti_leech;
        site.leech_referers = request.leech_referers;
        site.limit_rate = request.limit_rate;
        site.limit_conn = request.limit_conn;
        site.rewrite = request.rewrite;
        site.redirects = request.redirects;
        site.access_log = request.access_log;
        site.error_log = request.error_log;
        site.custom_nginx = request.custom_nginx;
        site.default_server = request.default_server;
        site.remark = request.remark;

        match request.basic_password {
            Some(password) if site.basic_auth && !password.is_empty() => {
                site.basic_password = password;
            }
            _ => {}
        }
        if !site.basic_auth {
            site.basic_user.clear();
            site.basic_password.clear();
        }

        self.store.save(&site).await?;

        if site.status == SiteStatus::Running {
            let renamed = previous_alias != site.alias;
            let old_config = self.server.layout().site_config(&previous_alias);
            let replaces = renamed.then_some(old_config.as_path());
            if let Err(e) = self.apply_config_replacing(&site, replaces).await {
                warn!(id, domain = %site.primary_domain, error = %e, "Re-applying site config failed");
                return Err(e);
            }
            if renamed {
                remove_file_if_exists(&self.generator.htpasswd_path(&previous_alias));
            }
        }

        self.store.require(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let site = self.store.require(id).await?;

        if site.status == SiteStatus::Running {
            remove_file_if_exists(&self.server.layout().site_config(&site.alias));
            if let Err(e) = self.server.reload_if_running().await {
                warn!(id, error = %e, "Reload after site removal failed");
            }
        }
        remove_file_if_exists(&self.generator.htpasswd_path(&site.alias));

        self.store.delete(id).await?;
        info!(id, domain = %site.primary_domain, "Website deleted");
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Website> {
        self.store.require(id).await
    }

    /// Delete a certificate no SSL site still points at
    pub async fn delete_certificate(&self, certificate_id: i64) -> Result<()> {
        let users = self.store.using_certificate(certificate_id).await?;
        if !users.is_empty() {
            let domains: Vec<&str> = users.iter().map(|s| s.primary_domain.as_str()).collect();
            return Err(SiteError::Conflict(format!(
                "certificate {} is used by {}",
                certificate_id,
                domains.join(", ")
            )));
        }
        self.certificates.delete(certificate_id).await
    }

    pub async fn list(&self) -> Result<Vec<Website>> {
        self.store.list().await
    }

    /// Last `tail` lines of a site's access or error log, or a placeholder
    /// when nginx has not written it yet
    pub async fn site_log(&self, id: i64, kind: LogKind, tail: Option<usize>) -> Result<String> {
        let site = self.store.require(id).await?;
        let tail = tail.filter(|n| *n > 0).unwrap_or(DEFAULT_LOG_TAIL);
        let path = self.generator.log_path(&site.primary_domain, kind);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(NO_LOG_PLACEHOLDER.to_string());
            }
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].join("\n"))
    }

    /// Config text the site would be deployed with
    pub async fn preview_config(&self, id: i64) -> Result<String> {
        let site = self.store.require(id).await?;
        let cert = self.certificate_paths(&site).await?;
        Ok(self.generator.generate(&site, cert.as_ref()))
    }

    pub async fn enable(&self, id: i64) -> Result<()> {
        let layout = self.server.layout();
        if !layout.is_installed() {
            return Err(SiteError::External(format!(
                "nginx is not installed at {}",
                layout.install_dir().display()
            )));
        }

        let site = self.store.require(id).await?;
        if site.status == SiteStatus::Running {
            return Ok(());
        }

        if let Err(e) = layout.ensure_include() {
            warn!(error = %e, "Could not add site include to nginx.conf");
        }

        self.apply_config(&site).await?;
        self.store.set_status(id, SiteStatus::Running).await?;
        info!(id, domain = %site.primary_domain, "Website enabled");
        Ok(())
    }

    pub async fn disable(&self, id: i64) -> Result<()> {
        let site = self.store.require(id).await?;
        if site.status == SiteStatus::Stopped {
            return Ok(());
        }

        remove_file_if_exists(&self.server.layout().site_config(&site.alias));
        if let Err(e) = self.server.reload_if_running().await {
            warn!(id, error = %e, "Reload after disabling site failed");
        }

        self.store.set_status(id, SiteStatus::Stopped).await?;
        info!(id, domain = %site.primary_domain, "Website disabled");
        Ok(())
    }

    /// Certificate files for an SSL site, restored from the database when
    /// missing on disk
    async fn certificate_paths(&self, site: &Website) -> Result<Option<CertificatePaths>> {
        if !site.ssl_enable {
            return Ok(None);
        }
        let cert_id = site.certificate_id.ok_or_else(|| {
            SiteError::Validation(format!("{} has SSL enabled without a certificate", site.primary_domain))
        })?;
        Ok(Some(self.certificates.material_paths(cert_id).await?))
    }

    async fn apply_config(&self, site: &Website) -> Result<()> {
        self.apply_config_replacing(site, None).await
    }

    /// Write the site config and validate it with `replaces` moved out of
    /// the include directory. Both files are put back if nginx rejects the
    /// result.
    async fn apply_config_replacing(&self, site: &Website, replaces: Option<&Path>) -> Result<()> {
        let layout = self.server.layout();
        let cert = self.certificate_paths(site).await?;
        let text = self.generator.generate(site, cert.as_ref());

        fs::create_dir_all(layout.sites_dir())?;
        fs::create_dir_all(layout.site_log_dir())?;

        let path = layout.site_config(&site.alias);
        let backup = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        fs::write(&path, &text)?;

        let retired = match replaces.filter(|old| *old != path.as_path()) {
            Some(old) => match fs::read(old) {
                Ok(bytes) => {
                    if let Err(e) = fs::remove_file(old) {
                        restore(&path, backup.as_deref());
                        return Err(e.into());
                    }
                    Some((old, bytes))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    restore(&path, backup.as_deref());
                    return Err(e.into());
                }
            },
            None => None,
        };
        let roll_back = || {
            restore(&path, backup.as_deref());
            if let Some((old, bytes)) = &retired {
                restore(old, Some(bytes.as_slice()));
            }
        };

        if site.basic_auth && !site.basic_user.is_empty() && !site.basic_password.is_empty() {
            if let Err(e) = self.write_htpasswd(site).await {
                warn!(domain = %site.primary_domain, error = %e, "Failed to write htpasswd file");
            }
        }

        let test = match self.server.test_config().await {
            Ok(test) => test,
            Err(e) => {
                roll_back();
                return Err(e);
            }
        };
        if !test.success {
            roll_back();
            warn!(domain = %site.primary_domain, "nginx rejected site config, rolled back");
            return Err(SiteError::Validation(format!(
                "nginx config test failed: {}",
                test.output
            )));
        }

        self.server.reload_if_running().await
    }

    async fn write_htpasswd(&self, site: &Website) -> Result<()> {
        let input = format!("{}\n", site.basic_password);
        let output = exec::run_with_input(
            Path::new("openssl"),
            &["passwd", "-apr1", "-stdin"],
            Some(input.as_bytes()),
            exec::DEFAULT_TIMEOUT,
        )
        .await?;
        if !output.success {
            return Err(SiteError::External(output.message()));
        }
        let hash = output.stdout;

        let path = self.generator.htpasswd_path(&site.alias);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, format!("{}:{}\n", site.basic_user, hash.trim()))?;
        Ok(())
    }
}

fn clean_domains(domains: &[String], primary: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for domain in domains.iter().map(|d| d.trim()) {
        if !domain.is_empty() && domain != primary && !out.iter().any(|d| d == domain) {
            out.push(domain.to_string());
        }
    }
    out
}

fn write_placeholder(dir: &Path, domain: &str) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let index = dir.join("index.html");
    if index.exists() {
        return Ok(());
    }
    fs::write(
        index,
        format!(
            "<!DOCTYPE html>\n<html>\n<head><title>{domain}</title></head>\n<body>\n\
             <h1>Welcome to {domain}</h1>\n<p>Site is working.</p>\n</body>\n</html>",
            domain = domain
        ),
    )
}

fn restore(path: &Path, backup: Option<&[u8]>) {
    let result = match backup {
        Some(bytes) => fs::write(path, bytes),
        None => fs::remove_file(path),
    };
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to roll back site config");
    }
}

fn remove_file_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::client::testing::FakeBackend;
    use crate::acme::{AccountManager, CaType, KeyType, RegisterAccountRequest};
    use crate::certificate::{CertificateStore, CreateCertificateRequest, ProviderMode};
    use crate::dns::ProviderRegistry;
    use crate::settings::SettingsStore;
    use crate::site::nginx::tests::FakeServerControl;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Harness {
        sites: SiteService,
        certificates: Arc<CertificateService>,
        accounts: Arc<AccountManager>,
        backend: Arc<FakeBackend>,
        server: Arc<FakeServerControl>,
        _dirs: Vec<TempDir>,
    }

    async fn harness() -> Harness {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let backend = Arc::new(FakeBackend::default());
        let accounts = Arc::new(AccountManager::new(
            db.clone(),
            Arc::new(backend.clone()),
            Arc::new(ProviderRegistry::with_builtin()),
        ));
        accounts.init_db().await.unwrap();
        let settings = SettingsStore::new(db.clone());
        settings.init_db().await.unwrap();
        let cert_store = CertificateStore::new(db.clone());
        cert_store.init_db().await.unwrap();
        let site_store = SiteStore::new(db);
        site_store.init_db().await.unwrap();

        let ssl_dir = tempfile::tempdir().unwrap();
        let nginx_dir = tempfile::tempdir().unwrap();
        let www_dir = tempfile::tempdir().unwrap();

        let certificates = Arc::new(CertificateService::new(
            cert_store,
            accounts.clone(),
            settings,
            Arc::new(backend.clone()),
            ssl_dir.path().to_path_buf(),
            2,
        ));
        let server = Arc::new(FakeServerControl::installed(nginx_dir.path()));
        let sites = SiteService::new(
            site_store,
            certificates.clone(),
            server.clone(),
            www_dir.path().to_path_buf(),
        );
        Harness {
            sites,
            certificates,
            accounts,
            backend,
            server,
            _dirs: vec![ssl_dir, nginx_dir, www_dir],
        }
    }

    fn static_site(domain: &str) -> CreateWebsiteRequest {
        CreateWebsiteRequest {
            primary_domain: domain.to_string(),
            domains: vec![format!("www.{}", domain)],
            site_type: SiteType::Static,
            site_dir: None,
            proxy_pass: String::new(),
            remark: String::new(),
        }
    }

    async fn applied_certificate(h: &Harness) -> i64 {
        let cert_id = ready_certificate(h).await;
        h.certificates.apply_now(cert_id).await.unwrap();
        cert_id
    }

    /// Created but never issued
    async fn ready_certificate(h: &Harness) -> i64 {
        let account = h
            .accounts
            .create_account(RegisterAccountRequest {
                email: "ops@example.com".to_string(),
                ca_type: CaType::LetsEncrypt,
                key_type: KeyType::Ec256,
                directory_url: None,
                eab: None,
            })
            .await
            .unwrap();
        let cert = h
            .certificates
            .create(CreateCertificateRequest {
                primary_domain: "example.com".to_string(),
                san_domains: vec!["www.example.com".to_string()],
                provider: ProviderMode::Http,
                acme_account_id: account.id,
                dns_account_id: None,
                key_type: Some(KeyType::Ec256),
                auto_renew: true,
                description: String::new(),
                apply: false,
            })
            .await
            .unwrap();
        cert.id
    }

    fn config_path(h: &Harness, alias: &str) -> PathBuf {
        h.server.layout().site_config(alias)
    }

    #[tokio::test]
    async fn test_create_defaults_and_duplicate() {
        let h = harness().await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();

        assert_eq!(site.alias, "example_com");
        assert_eq!(site.status, SiteStatus::Stopped);
        assert_eq!(site.http_config, HttpMode::HttpsRedirect);
        assert_eq!(site.index_file, "index.html index.htm");
        assert_eq!(site.ssl_protocols, "TLSv1.2 TLSv1.3");
        assert!(site.access_log && site.error_log);
        assert!(Path::new(&site.site_dir).join("index.html").is_file());

        assert!(matches!(
            h.sites.create(static_site("example.com")).await,
            Err(SiteError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_enable_writes_validates_and_reloads() {
        let h = harness().await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();

        h.sites.enable(site.id).await.unwrap();

        let text = fs::read_to_string(config_path(&h, "example_com")).unwrap();
        assert!(text.contains("server_name example.com www.example.com;"));
        assert_eq!(h.server.tested.lock().unwrap().len(), 1);
        assert_eq!(h.server.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(h.sites.get(site.id).await.unwrap().status, SiteStatus::Running);

        let main = fs::read_to_string(h.server.layout().main_conf()).unwrap();
        assert!(main.contains("include conf.d/*.conf;"));

        // enabling twice is a no-op
        h.sites.enable(site.id).await.unwrap();
        assert_eq!(h.server.reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_enable_removes_new_config() {
        let h = harness().await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();
        h.server.reject_config.store(true, Ordering::SeqCst);

        let result = h.sites.enable(site.id).await;
        assert!(matches!(result, Err(SiteError::Validation(_))));
        assert!(result.unwrap_err().to_string().contains("unknown directive"));

        assert!(!config_path(&h, "example_com").exists());
        assert_eq!(h.server.reloads.load(Ordering::SeqCst), 0);
        assert_eq!(h.sites.get(site.id).await.unwrap().status, SiteStatus::Stopped);
    }

    #[tokio::test]
    async fn test_failed_enable_restores_previous_content() {
        let h = harness().await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();
        let path = config_path(&h, "example_com");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "# hand written\n").unwrap();
        h.server.reject_config.store(true, Ordering::SeqCst);

        assert!(h.sites.enable(site.id).await.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "# hand written\n");
        // the candidate was on disk while nginx -t ran
        assert!(h.server.tested.lock().unwrap()[0].contains("server_name example.com"));
    }

    #[tokio::test]
    async fn test_update_running_site_rejected_keeps_db_edit() {
        let h = harness().await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();
        h.sites.enable(site.id).await.unwrap();
        let path = config_path(&h, "example_com");
        let deployed = fs::read_to_string(&path).unwrap();

        let mut request = UpdateWebsiteRequest::from_site(&site);
        request.custom_nginx = "bogus_directive on;".to_string();
        h.server.reject_config.store(true, Ordering::SeqCst);

        assert!(matches!(
            h.sites.update(site.id, request).await,
            Err(SiteError::Validation(_))
        ));

        // the file on disk is rolled back while the edit stays in the database
        assert_eq!(fs::read_to_string(&path).unwrap(), deployed);
        let stored = h.sites.get(site.id).await.unwrap();
        assert_eq!(stored.custom_nginx, "bogus_directive on;");
        assert_eq!(stored.status, SiteStatus::Running);
        assert!(h.sites.preview_config(site.id).await.unwrap().contains("bogus_directive on;"));
    }

    #[tokio::test]
    async fn test_update_running_site_reapplies() {
        let h = harness().await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();
        h.sites.enable(site.id).await.unwrap();

        let mut request = UpdateWebsiteRequest::from_site(&site);
        request.limit_rate = "1m".to_string();
        h.sites.update(site.id, request).await.unwrap();

        let text = fs::read_to_string(config_path(&h, "example_com")).unwrap();
        assert!(text.contains("limit_rate 1m;"));
        assert_eq!(h.server.reloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_update_validates_ssl_and_redirects() {
        let h = harness().await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();

        let mut request = UpdateWebsiteRequest::from_site(&site);
        request.ssl_enable = true;
        assert!(matches!(
            h.sites.update(site.id, request).await,
            Err(SiteError::Validation(_))
        ));

        let mut request = UpdateWebsiteRequest::from_site(&site);
        request.redirects = "[{".to_string();
        assert!(matches!(
            h.sites.update(site.id, request).await,
            Err(SiteError::Validation(_))
        ));
        assert!(h.sites.get(site.id).await.unwrap().redirects.is_empty());
    }

    #[tokio::test]
    async fn test_ssl_site_restores_certificate_files() {
        let h = harness().await;
        let cert_id = applied_certificate(&h).await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();

        let mut request = UpdateWebsiteRequest::from_site(&site);
        request.ssl_enable = true;
        request.certificate_id = Some(cert_id);
        h.sites.update(site.id, request).await.unwrap();

        let ssl_dir = h.certificates.ssl_dir().await.unwrap();
        let paths = CertificatePaths::for_domain(&ssl_dir, "example.com");
        fs::remove_dir_all(&paths.cert_dir).unwrap();

        h.sites.enable(site.id).await.unwrap();
        assert!(paths.exists());

        let text = fs::read_to_string(config_path(&h, "example_com")).unwrap();
        assert_eq!(text.matches("return 301 https://$host$request_uri;").count(), 1);
        assert!(text.contains(&format!("ssl_certificate {};", paths.cert_path.display())));
    }

    #[tokio::test]
    async fn test_disable_and_delete() {
        let h = harness().await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();
        h.sites.enable(site.id).await.unwrap();

        h.sites.disable(site.id).await.unwrap();
        assert!(!config_path(&h, "example_com").exists());
        assert_eq!(h.sites.get(site.id).await.unwrap().status, SiteStatus::Stopped);
        assert_eq!(h.server.reloads.load(Ordering::SeqCst), 2);

        h.sites.delete(site.id).await.unwrap();
        assert!(matches!(h.sites.get(site.id).await, Err(SiteError::NotFound(_))));
        assert!(h.sites.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_certificate_in_use_cannot_be_deleted() {
        let h = harness().await;
        let cert_id = applied_certificate(&h).await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();

        let mut request = UpdateWebsiteRequest::from_site(&site);
        request.ssl_enable = true;
        request.certificate_id = Some(cert_id);
        h.sites.update(site.id, request).await.unwrap();

        assert!(matches!(
            h.sites.delete_certificate(cert_id).await,
            Err(SiteError::Conflict(_))
        ));
        assert!(h.certificates.get(cert_id).await.is_ok());

        h.sites.delete(site.id).await.unwrap();
        h.sites.delete_certificate(cert_id).await.unwrap();
        assert!(matches!(
            h.certificates.get(cert_id).await,
            Err(SiteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_default_server_validates_without_old_file() {
        let h = harness().await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();
        let mut request = UpdateWebsiteRequest::from_site(&site);
        request.default_server = true;
        h.sites.update(site.id, request).await.unwrap();
        h.sites.enable(site.id).await.unwrap();
        h.server.tested.lock().unwrap().clear();

        let site = h.sites.get(site.id).await.unwrap();
        let mut request = UpdateWebsiteRequest::from_site(&site);
        request.primary_domain = Some("example.org".to_string());
        let renamed = h.sites.update(site.id, request).await.unwrap();
        assert_eq!(renamed.alias, "example_org");

        // nginx -t saw one default_server block, the renamed one
        let tested = h.server.tested.lock().unwrap().clone();
        assert_eq!(tested.len(), 1);
        assert!(tested[0].contains("server_name example.org"));
        assert!(tested[0].contains("listen 80 default_server;"));

        assert!(!config_path(&h, "example_com").exists());
        assert!(config_path(&h, "example_org").is_file());
        assert_eq!(h.server.reloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejected_rename_restores_old_config() {
        let h = harness().await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();
        h.sites.enable(site.id).await.unwrap();
        let deployed = fs::read_to_string(config_path(&h, "example_com")).unwrap();
        h.server.reject_config.store(true, Ordering::SeqCst);

        let mut request = UpdateWebsiteRequest::from_site(&site);
        request.primary_domain = Some("example.org".to_string());
        assert!(matches!(
            h.sites.update(site.id, request).await,
            Err(SiteError::Validation(_))
        ));

        assert_eq!(fs::read_to_string(config_path(&h, "example_com")).unwrap(), deployed);
        assert!(!config_path(&h, "example_org").exists());
        assert_eq!(h.server.reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ssl_refuses_unissued_certificates() {
        let h = harness().await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();

        let ready = ready_certificate(&h).await;
        assert_eq!(h.certificates.get(ready).await.unwrap().status, CertStatus::Ready);
        let mut request = UpdateWebsiteRequest::from_site(&site);
        request.ssl_enable = true;
        request.certificate_id = Some(ready);
        let err = h.sites.update(site.id, request).await.unwrap_err();
        assert!(matches!(err, SiteError::Validation(_)));
        assert!(err.to_string().contains("not applied"));

        *h.backend.fail_with.lock().unwrap() = Some("rate limited".to_string());
        let failed = ready_certificate(&h).await;
        assert!(h.certificates.apply_now(failed).await.is_err());
        assert_eq!(h.certificates.get(failed).await.unwrap().status, CertStatus::Error);
        let mut request = UpdateWebsiteRequest::from_site(&site);
        request.ssl_enable = true;
        request.certificate_id = Some(failed);
        assert!(matches!(
            h.sites.update(site.id, request).await,
            Err(SiteError::Validation(_))
        ));

        let stored = h.sites.get(site.id).await.unwrap();
        assert!(!stored.ssl_enable);
        assert_eq!(stored.certificate_id, None);
    }

    #[tokio::test]
    async fn test_site_log_tail() {
        let h = harness().await;
        let site = h.sites.create(static_site("example.com")).await.unwrap();

        let log = h.sites.site_log(site.id, LogKind::Access, None).await.unwrap();
        assert_eq!(log, NO_LOG_PLACEHOLDER);

        let dir = h.server.layout().site_log_dir();
        fs::create_dir_all(&dir).unwrap();
        let lines: Vec<String> = (1..=250).map(|i| format!("GET /{} 200", i)).collect();
        fs::write(dir.join("example.com.access.log"), lines.join("\n") + "\n").unwrap();
        fs::write(dir.join("example.com.error.log"), "[error] upstream timed out\n").unwrap();

        let tail = h.sites.site_log(site.id, LogKind::Access, None).await.unwrap();
        assert_eq!(tail.lines().count(), 200);
        assert!(tail.starts_with("GET /51 200"));
        assert!(tail.ends_with("GET /250 200"));

        let tail = h.sites.site_log(site.id, LogKind::Access, Some(2)).await.unwrap();
        assert_eq!(tail, "GET /249 200\nGET /250 200");

        let errors = h.sites.site_log(site.id, LogKind::Error, Some(0)).await.unwrap();
        assert_eq!(errors, "[error] upstream timed out");

        assert!(matches!(
            h.sites.site_log(99, LogKind::Access, None).await,
            Err(SiteError::NotFound(_))
        ));
    }
}
