//! Error types for sitecert-rs

use thiserror::Error;

use crate::acme::AcmeError;
use crate::dns::DnsProviderError;

/// Result type alias for sitecert operations
pub type Result<T> = std::result::Result<T, SiteError>;

/// Service error types
#[derive(Error, Debug)]
pub enum SiteError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input, nothing was changed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Duplicate resource or operation already in flight
    #[error("Conflict: {0}")]
    Conflict(String),

    /// External dependency failed (web server binary, config test, openssl)
    #[error("External command failed: {0}")]
    External(String),

    /// Uploaded certificates have no ACME order to renew
    #[error("Uploaded certificates cannot be renewed")]
    UploadNotRenewable,

    /// ACME protocol error
    #[error(transparent)]
    Acme(#[from] AcmeError),

    /// DNS provider error
    #[error(transparent)]
    Dns(#[from] DnsProviderError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
