//! ACME error types

use thiserror::Error;

/// Errors raised while talking to an ACME certificate authority
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Unknown CA tag or malformed custom directory URL
    #[error("Invalid CA directory: {0}")]
    Directory(String),

    /// Account registration failed, nothing was persisted
    #[error("Account registration failed: {0}")]
    Registration(String),

    /// Account has no CA-assigned URL; signed requests are refused
    #[error("ACME account has no account URL")]
    MissingAccountUrl,

    /// The backend cannot create accounts with this key type
    #[error("Unsupported account key type: {0}")]
    UnsupportedAccountKey(String),

    /// Stored account key could not be loaded
    #[error("Invalid account key: {0}")]
    AccountKey(String),

    /// Order creation failed
    #[error("Failed to create order: {0}")]
    OrderCreation(String),

    /// Challenge could not be completed
    #[error("Challenge failed for '{domain}': {message}")]
    ChallengeFailed { domain: String, message: String },

    /// Order ended in an invalid state
    #[error("Order failed: {0}")]
    OrderFailed(String),

    /// Order did not reach the expected state in time
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Finalization or certificate download failed
    #[error("Failed to finalize order: {0}")]
    Finalization(String),

    /// Certificate key pair or CSR generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Issued or uploaded certificate could not be parsed
    #[error("Certificate parse error: {0}")]
    CertificateParse(String),
}
