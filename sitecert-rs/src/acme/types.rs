//! ACME and DNS account types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::AcmeError;

/// Certificate authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaType {
    LetsEncrypt,
    ZeroSsl,
    Buypass,
    Google,
    Custom,
}

impl CaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaType::LetsEncrypt => "letsencrypt",
            CaType::ZeroSsl => "zerossl",
            CaType::Buypass => "buypass",
            CaType::Google => "google",
            CaType::Custom => "custom",
        }
    }

    /// Fixed directory URL; `None` for [`CaType::Custom`]
    pub fn known_directory(&self) -> Option<&'static str> {
        match self {
            CaType::LetsEncrypt => Some("https://acme-v02.api.letsencrypt.org/directory"),
            CaType::ZeroSsl => Some("https://acme.zerossl.com/v2/DV90"),
            CaType::Buypass => Some("https://api.buypass.com/acme/directory"),
            CaType::Google => Some("https://dv.acme-v02.api.pki.goog/directory"),
            CaType::Custom => None,
        }
    }

    /// Resolve the directory URL, validating a caller-supplied one for `custom`
    pub fn directory_url(&self, custom: Option<&str>) -> Result<String, AcmeError> {
        if let Some(url) = self.known_directory() {
            return Ok(url.to_string());
        }

        let custom = custom
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                AcmeError::Directory("custom CA requires a directory URL".to_string())
            })?;
        let parsed = url::Url::parse(custom)
            .map_err(|e| AcmeError::Directory(format!("'{}': {}", custom, e)))?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(AcmeError::Directory(format!(
                "'{}': unsupported scheme {}",
                custom,
                parsed.scheme()
            )));
        }
        Ok(custom.to_string())
    }

    /// CAs that refuse registration without external account binding
    pub fn requires_eab(&self) -> bool {
        matches!(self, CaType::ZeroSsl | CaType::Google)
    }
}

impl fmt::Display for CaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for CaType {
    type Err = AcmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "letsencrypt" => Ok(CaType::LetsEncrypt),
            "zerossl" => Ok(CaType::ZeroSsl),
            "buypass" => Ok(CaType::Buypass),
            "google" => Ok(CaType::Google),
            "custom" => Ok(CaType::Custom),
            other => Err(AcmeError::Directory(format!("unknown CA type '{}'", other))),
        }
    }
}

/// Key algorithm for account and certificate keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "P256")]
    Ec256,
    #[serde(rename = "P384")]
    Ec384,
    #[serde(rename = "2048")]
    Rsa2048,
    #[serde(rename = "3072")]
    Rsa3072,
    #[serde(rename = "4096")]
    Rsa4096,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ec256 => "P256",
            KeyType::Ec384 => "P384",
            KeyType::Rsa2048 => "2048",
            KeyType::Rsa3072 => "3072",
            KeyType::Rsa4096 => "4096",
        }
    }

    /// RSA modulus size, `None` for EC keys
    pub fn rsa_bits(&self) -> Option<usize> {
        match self {
            KeyType::Rsa2048 => Some(2048),
            KeyType::Rsa3072 => Some(3072),
            KeyType::Rsa4096 => Some(4096),
            KeyType::Ec256 | KeyType::Ec384 => None,
        }
    }
}

impl Default for KeyType {
    fn default() -> Self {
        KeyType::Rsa2048
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = AcmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P256" | "EC256" => Ok(KeyType::Ec256),
            "P384" | "EC384" => Ok(KeyType::Ec384),
            "2048" | "RSA2048" => Ok(KeyType::Rsa2048),
            "3072" | "RSA3072" => Ok(KeyType::Rsa3072),
            "4096" | "RSA4096" => Ok(KeyType::Rsa4096),
            other => Err(AcmeError::KeyGeneration(format!(
                "unknown key type '{}'",
                other
            ))),
        }
    }
}

/// External account binding credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAccountBinding {
    pub kid: String,
    /// base64url encoded HMAC key
    pub hmac_key: String,
}

impl fmt::Debug for ExternalAccountBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalAccountBinding")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// Registered CA account
#[derive(Clone, Serialize)]
pub struct AcmeAccount {
    pub id: i64,
    pub email: String,
    pub ca_type: CaType,
    pub key_type: KeyType,
    /// PKCS#8 PEM, immutable after registration
    #[serde(skip_serializing)]
    pub private_key: String,
    pub directory_url: String,
    /// CA-assigned account URL (the JWS `kid`)
    pub account_url: String,
    #[serde(skip_serializing)]
    pub eab: Option<ExternalAccountBinding>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for AcmeAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcmeAccount")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("ca_type", &self.ca_type)
            .field("key_type", &self.key_type)
            .field("directory_url", &self.directory_url)
            .field("account_url", &self.account_url)
            .finish_non_exhaustive()
    }
}

/// Request to register a new CA account
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterAccountRequest {
    pub email: String,
    pub ca_type: CaType,
    #[serde(default = "default_account_key")]
    pub key_type: KeyType,
    pub directory_url: Option<String>,
    pub eab: Option<ExternalAccountBinding>,
}

fn default_account_key() -> KeyType {
    KeyType::Ec256
}

/// DNS provider account
#[derive(Debug, Clone, Serialize)]
pub struct DnsAccount {
    pub id: i64,
    pub name: String,
    /// Provider registry tag
    pub provider: String,
    #[serde(skip_serializing)]
    pub authorization: crate::dns::Credentials,
    pub created_at: DateTime<Utc>,
}

/// Request to create or replace a DNS account
#[derive(Debug, Clone, Deserialize)]
pub struct DnsAccountRequest {
    pub name: String,
    pub provider: String,
    pub authorization: crate::dns::Credentials,
}

/// Portable dump of every CA and DNS account, secrets included
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountExport {
    #[serde(default)]
    pub acme_accounts: Vec<AcmeAccountExport>,
    #[serde(default)]
    pub dns_accounts: Vec<DnsAccountExport>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcmeAccountExport {
    pub email: String,
    pub ca_type: CaType,
    pub key_type: KeyType,
    pub private_key: String,
    pub directory_url: String,
    pub account_url: String,
    #[serde(default)]
    pub eab: Option<ExternalAccountBinding>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsAccountExport {
    pub name: String,
    pub provider: String,
    pub authorization: crate::dns::Credentials,
}

/// Outcome of an import; invalid entries are skipped, not fatal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}
