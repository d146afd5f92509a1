//! ACME accounts and the certificate authority client

pub mod account;
pub mod client;
pub mod error;
pub mod keys;
pub mod types;

pub use account::AccountManager;
pub use client::{
    AcmeBackend, InstantAcmeBackend, IssuanceSession, IssuedCertificate, ProgressSink,
    RegisteredAccount,
};
pub use error::AcmeError;
pub use types::{
    AccountExport, AcmeAccount, AcmeAccountExport, CaType, DnsAccount, DnsAccountExport,
    DnsAccountRequest, ExternalAccountBinding, ImportSummary, KeyType, RegisterAccountRequest,
};
