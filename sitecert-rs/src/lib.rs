//! sitecert-rs: ACME certificates and nginx sites on a single host
//!
//! Issues and renews TLS certificates through ACME (HTTP-01 or DNS-01 via
//! pluggable DNS providers) and turns site definitions into nginx server
//! blocks that are validated before they go live.
//!
//! # Features
//!
//! - ACME accounts for Let's Encrypt, ZeroSSL, Buypass, Google or a custom CA
//! - DNS-01 through CloudFlare, DnsPod, GoDaddy, NameSilo, AliYun,
//!   TencentCloud and HuaweiCloud
//! - Background issuance with a per-certificate log and auto-renewal
//! - Upload of externally issued certificates
//! - nginx config generation with write, test, reload or rollback
//!
//! # Example Configuration
//!
//! ```toml
//! database_url = "sqlite:///var/lib/sitecert-rs/sitecert.db?mode=rwc"
//! ssl_dir = "/var/lib/sitecert-rs/ssl"
//!
//! [nginx]
//! install_dir = "/usr/local/nginx"
//! www_root = "/var/www"
//!
//! [acme]
//! max_concurrent_issuance = 2
//! renew_before_days = 30
//! http_webroot = "/var/www/acme"
//! ```
//!
//! Every key can be overridden from the environment, e.g.
//! `SITECERT_ACME__RENEW_BEFORE_DAYS=14`.

#[macro_use]
mod macros;

pub mod acme;
pub mod app;
pub mod certificate;
pub mod config;
pub mod dns;
pub mod error;
pub mod exec;
pub mod settings;
pub mod site;

pub use app::Services;
pub use config::AppConfig;
pub use error::{Result, SiteError};
