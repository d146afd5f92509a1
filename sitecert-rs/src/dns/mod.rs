//! DNS-01 challenge providers
//!
//! Provider tags map to solver constructors through [`ProviderRegistry`];
//! the issuance code only ever sees `Arc<dyn DnsSolver>`.

pub mod credentials;
pub mod propagation;
pub mod provider;
pub mod providers;
pub mod registry;

pub use credentials::Credentials;
pub use propagation::PropagationChecker;
pub use provider::{
    challenge_record_fqdn, challenge_value, DnsProviderError, DnsResult, DnsSolver,
    SolverSettings,
};
pub use registry::{ProviderDescriptor, ProviderRegistry};
