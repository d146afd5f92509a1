//! Certificate types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::acme::KeyType;

/// Issuance state of a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertStatus {
    Ready,
    Applying,
    Applied,
    Error,
}

/// How domain ownership is proven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    Dns,
    Http,
    Manual,
}

/// Where the certificate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "autoApply")]
    AutoApply,
    #[serde(rename = "upload")]
    Upload,
}

str_enum!(CertStatus {
    CertStatus::Ready => "ready",
    CertStatus::Applying => "applying",
    CertStatus::Applied => "applied",
    CertStatus::Error => "error",
});

str_enum!(ProviderMode {
    ProviderMode::Dns => "dns",
    ProviderMode::Http => "http",
    ProviderMode::Manual => "manual",
});

str_enum!(SourceType {
    SourceType::AutoApply => "autoApply",
    SourceType::Upload => "upload",
});

/// A managed certificate
#[derive(Debug, Clone, Serialize)]
pub struct Certificate {
    pub id: i64,
    pub primary_domain: String,
    /// Additional names, primary excluded
    pub san_domains: Vec<String>,
    pub provider: ProviderMode,
    pub source: SourceType,
    /// `None` for uploads
    pub key_type: Option<KeyType>,
    pub acme_account_id: Option<i64>,
    pub dns_account_id: Option<i64>,
    #[serde(skip_serializing)]
    pub pem: Option<String>,
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: CertStatus,
    pub message: String,
    pub auto_renew: bool,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Certificate {
    /// Primary domain followed by the SANs
    pub fn domains(&self) -> Vec<String> {
        std::iter::once(self.primary_domain.clone())
            .chain(self.san_domains.iter().cloned())
            .collect()
    }
}

/// Request to create an ACME-managed certificate
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCertificateRequest {
    pub primary_domain: String,
    #[serde(default)]
    pub san_domains: Vec<String>,
    pub provider: ProviderMode,
    pub acme_account_id: i64,
    pub dns_account_id: Option<i64>,
    pub key_type: Option<KeyType>,
    #[serde(default = "default_true")]
    pub auto_renew: bool,
    #[serde(default)]
    pub description: String,
    /// Start issuance right after creation
    #[serde(default)]
    pub apply: bool,
}

fn default_true() -> bool {
    true
}

/// Request to import an externally issued certificate
#[derive(Debug, Clone, Deserialize)]
pub struct UploadCertificateRequest {
    pub certificate: String,
    pub private_key: String,
    #[serde(default)]
    pub description: String,
}

/// Editable certificate fields
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCertificateRequest {
    pub auto_renew: bool,
    #[serde(default)]
    pub description: String,
    pub primary_domain: Option<String>,
    pub san_domains: Option<Vec<String>>,
}

/// On-disk locations of certificate material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub cert_dir: PathBuf,
    /// `fullchain.pem`
    pub cert_path: PathBuf,
    /// `privkey.pem`
    pub key_path: PathBuf,
}

impl CertificatePaths {
    /// `{ssl_dir}/certs/{domain}/`
    pub fn for_domain(ssl_dir: &Path, domain: &str) -> Self {
        let cert_dir = ssl_dir.join("certs").join(domain);
        Self {
            cert_path: cert_dir.join("fullchain.pem"),
            key_path: cert_dir.join("privkey.pem"),
            cert_dir,
        }
    }

    /// Check if certificate files exist
    pub fn exists(&self) -> bool {
        self.cert_path.exists() && self.key_path.exists()
    }
}

/// Split a stored comma separated SAN list
pub fn split_domains(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}
