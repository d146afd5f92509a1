//! Certificate records, issuance and renewal

pub mod orchestrator;
pub mod parse;
pub mod progress;
pub mod scheduler;
pub mod store;
pub mod types;

pub use orchestrator::{write_material, CertificateService};
pub use parse::{parse_certificate, ParsedCertificate};
pub use progress::{ProgressLog, NO_LOG_PLACEHOLDER};
pub use scheduler::RenewalScheduler;
pub use store::CertificateStore;
pub use types::{
    CertStatus, Certificate, CertificatePaths, CreateCertificateRequest, ProviderMode,
    SourceType, UpdateCertificateRequest, UploadCertificateRequest,
};
