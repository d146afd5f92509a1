//! Configuration for sitecert-rs

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SiteError};

/// Main service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// SQLite connection string
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Base directory for certificate material and issuance logs.
    /// The `SSLDir` setting overrides it at runtime.
    #[serde(default = "default_ssl_dir")]
    pub ssl_dir: PathBuf,
    /// Web server runtime configuration
    #[serde(default)]
    pub nginx: NginxConfig,
    /// ACME issuance configuration
    #[serde(default)]
    pub acme: AcmeConfig,
}

/// Web server runtime configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NginxConfig {
    /// Install prefix containing `sbin/nginx`, `conf/` and `logs/`
    #[serde(default = "default_nginx_install_dir")]
    pub install_dir: PathBuf,
    /// Timeout applied to every external command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Parent directory of default static site roots
    #[serde(default = "default_www_root")]
    pub www_root: PathBuf,
}

/// ACME issuance configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcmeConfig {
    /// Maximum number of issuances running at the same time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_issuance: usize,
    /// Renew certificates expiring within this many days
    #[serde(default = "default_renew_before_days")]
    pub renew_before_days: i64,
    /// Interval between automatic renewal sweeps
    #[serde(default = "default_renew_interval")]
    pub renew_check_interval_secs: u64,
    /// Document root serving `/.well-known/acme-challenge/` for HTTP-01
    #[serde(default = "default_http_webroot")]
    pub http_webroot: PathBuf,
}

fn default_database_url() -> String {
    "sqlite:///var/lib/sitecert-rs/sitecert.db?mode=rwc".to_string()
}

fn default_ssl_dir() -> PathBuf {
    PathBuf::from("/var/lib/sitecert-rs/ssl")
}

fn default_nginx_install_dir() -> PathBuf {
    PathBuf::from("/usr/local/nginx")
}

fn default_www_root() -> PathBuf {
    PathBuf::from("/var/www")
}

fn default_command_timeout() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    2
}

fn default_renew_before_days() -> i64 {
    30
}

fn default_renew_interval() -> u64 {
    12 * 60 * 60
}

fn default_http_webroot() -> PathBuf {
    PathBuf::from("/var/www/acme")
}

impl Default for NginxConfig {
    fn default() -> Self {
        Self {
            install_dir: default_nginx_install_dir(),
            command_timeout_secs: default_command_timeout(),
            www_root: default_www_root(),
        }
    }
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_issuance: default_max_concurrent(),
            renew_before_days: default_renew_before_days(),
            renew_check_interval_secs: default_renew_interval(),
            http_webroot: default_http_webroot(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            ssl_dir: default_ssl_dir(),
            nginx: NginxConfig::default(),
            acme: AcmeConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SiteError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| SiteError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from an optional TOML file layered with
    /// `SITECERT_*` environment overrides (`SITECERT_ACME__RENEW_BEFORE_DAYS=10`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        let config: AppConfig = builder
            .add_source(
                config::Environment::with_prefix("SITECERT")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SiteError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(SiteError::Config("database_url is empty".to_string()));
        }
        if self.acme.max_concurrent_issuance == 0 {
            return Err(SiteError::Config(
                "acme.max_concurrent_issuance must be at least 1".to_string(),
            ));
        }
        if self.acme.renew_before_days <= 0 {
            return Err(SiteError::Config(
                "acme.renew_before_days must be positive".to_string(),
            ));
        }
        if self.acme.renew_check_interval_secs == 0 {
            return Err(SiteError::Config(
                "acme.renew_check_interval_secs must be positive".to_string(),
            ));
        }
        if !self.nginx.install_dir.is_absolute() {
            return Err(SiteError::Config(format!(
                "nginx.install_dir must be absolute: {}",
                self.nginx.install_dir.display()
            )));
        }
        Ok(())
    }
}
