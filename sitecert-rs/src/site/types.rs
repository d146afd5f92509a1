//! Website definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SiteError};

pub const DEFAULT_INDEX_FILES: &str = "index.html index.htm";
pub const DEFAULT_SSL_PROTOCOLS: &str = "TLSv1.2 TLSv1.3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteType {
    Static,
    ReverseProxy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Running,
    Stopped,
}

/// Which listeners a site with SSL enabled serves on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HttpMode {
    #[serde(rename = "httpOnly")]
    HttpOnly,
    #[serde(rename = "httpsOnly")]
    HttpsOnly,
    /// Port 80 redirects to https
    #[default]
    #[serde(rename = "HTTPSRedirect")]
    HttpsRedirect,
    /// Both listeners serve content
    #[serde(rename = "HTTPAlso")]
    HttpAlso,
}

/// Per-site nginx log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Access,
    Error,
}

/// Lines returned by a log tail when none is asked for
pub const DEFAULT_LOG_TAIL: usize = 200;

str_enum!(LogKind {
    LogKind::Access => "access",
    LogKind::Error => "error",
});

str_enum!(SiteType {
    SiteType::Static => "static",
    SiteType::ReverseProxy => "reverse_proxy",
});

str_enum!(SiteStatus {
    SiteStatus::Running => "running",
    SiteStatus::Stopped => "stopped",
});

str_enum!(HttpMode {
    HttpMode::HttpOnly => "httpOnly",
    HttpMode::HttpsOnly => "httpsOnly",
    HttpMode::HttpsRedirect => "HTTPSRedirect",
    HttpMode::HttpAlso => "HTTPAlso",
});

/// One exact-match redirect. A zero status means 301.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRule {
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default)]
    pub status: u16,
}

impl RedirectRule {
    pub fn status_code(&self) -> u16 {
        if self.status == 0 {
            301
        } else {
            self.status
        }
    }
}

/// Parse a redirect rule list. Blank input means no rules.
pub fn parse_redirects(json: &str) -> Result<Vec<RedirectRule>> {
    let json = json.trim();
    if json.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json)
        .map_err(|e| SiteError::Validation(format!("invalid redirect rules: {}", e)))
}

/// Filesystem-safe name for a domain, used for config and auth file names
pub fn domain_to_alias(domain: &str) -> String {
    domain
        .replace('.', "_")
        .replace('*', "wildcard")
        .replace(':', "_")
}

/// A site served by nginx
#[derive(Debug, Clone, Serialize)]
pub struct Website {
    pub id: i64,
    pub primary_domain: String,
    /// Extra server names
    pub domains: Vec<String>,
    pub alias: String,
    pub site_type: SiteType,
    pub status: SiteStatus,

    pub site_dir: String,
    pub index_file: String,

    pub proxy_pass: String,
    pub web_socket: bool,

    pub ssl_enable: bool,
    pub certificate_id: Option<i64>,
    pub http_config: HttpMode,
    pub hsts: bool,
    pub ssl_protocols: String,

    pub basic_auth: bool,
    pub basic_user: String,
    #[serde(skip_serializing)]
    pub basic_password: String,

    pub anti_leech: bool,
    /// Comma separated referers allowed besides the server names
    pub leech_referers: String,

    pub limit_rate: String,
    pub limit_conn: u32,

    /// Newline separated rewrite directives
    pub rewrite: String,
    /// JSON array of [`RedirectRule`]
    pub redirects: String,

    pub access_log: bool,
    pub error_log: bool,
    pub custom_nginx: String,
    pub default_server: bool,
    pub remark: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Website {
    /// Primary domain followed by the distinct extra domains, in order
    pub fn server_names(&self) -> Vec<&str> {
        let mut names = vec![self.primary_domain.as_str()];
        for domain in &self.domains {
            let domain = domain.trim();
            if !domain.is_empty() && !names.contains(&domain) {
                names.push(domain);
            }
        }
        names
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWebsiteRequest {
    pub primary_domain: String,
    #[serde(default)]
    pub domains: Vec<String>,
    pub site_type: SiteType,
    /// Defaults to `{www_root}/{primary_domain}` for static sites
    pub site_dir: Option<String>,
    #[serde(default)]
    pub proxy_pass: String,
    #[serde(default)]
    pub remark: String,
}

/// Full replacement of the editable site fields
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateWebsiteRequest {
    pub primary_domain: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub site_dir: String,
    #[serde(default = "default_index_file")]
    pub index_file: String,
    #[serde(default)]
    pub proxy_pass: String,
    #[serde(default)]
    pub web_socket: bool,
    #[serde(default)]
    pub ssl_enable: bool,
    pub certificate_id: Option<i64>,
    #[serde(default)]
    pub http_config: HttpMode,
    #[serde(default)]
    pub hsts: bool,
    #[serde(default = "default_ssl_protocols")]
    pub ssl_protocols: String,
    #[serde(default)]
    pub basic_auth: bool,
    #[serde(default)]
    pub basic_user: String,
    /// Keeps the stored password when absent
    pub basic_password: Option<String>,
    #[serde(default)]
    pub anti_leech: bool,
    #[serde(default)]
    pub leech_referers: String,
    #[serde(default)]
    pub limit_rate: String,
    #[serde(default)]
    pub limit_conn: u32,
    #[serde(default)]
    pub rewrite: String,
    #[serde(default)]
    pub redirects: String,
    #[serde(default = "default_true")]
    pub access_log: bool,
    #[serde(default = "default_true")]
    pub error_log: bool,
    #[serde(default)]
    pub custom_nginx: String,
    #[serde(default)]
    pub default_server: bool,
    #[serde(default)]
    pub remark: String,
}

fn default_index_file() -> String {
    DEFAULT_INDEX_FILES.to_string()
}

fn default_ssl_protocols() -> String {
    DEFAULT_SSL_PROTOCOLS.to_string()
}

fn default_true() -> bool {
    true
}

impl UpdateWebsiteRequest {
    /// Request that leaves every field of `site` as it is
    pub fn from_site(site: &Website) -> Self {
        Self {
            primary_domain: None,
            domains: site.domains.clone(),
            site_dir: site.site_dir.clone(),
            index_file: site.index_file.clone(),
            proxy_pass: site.proxy_pass.clone(),
            web_socket: site.web_socket,
            ssl_enable: site.ssl_enable,
            certificate_id: site.certificate_id,
            http_config: site.http_config,
            hsts: site.hsts,
            ssl_protocols: site.ssl_protocols.clone(),
            basic_auth: site.basic_auth,
            basic_user: site.basic_user.clone(),
            basic_password: None,
            anti_leech: site.anti_leech,
            leech_referers: site.leech_referers.clone(),
            limit_rate: site.limit_rate.clone(),
            limit_conn: site.limit_conn,
            rewrite: site.rewrite.clone(),
            redirects: site.redirects.clone(),
            access_log: site.access_log,
            error_log: site.error_log,
            custom_nginx: site.custom_nginx.clone(),
            default_server: site.default_server,
            remark: site.remark.clone(),
        }
    }
}
