//! Website definitions, nginx config generation and activation

pub mod activator;
pub mod conf_files;
pub mod generator;
pub mod nginx;
pub mod store;
pub mod types;

pub use activator::SiteService;
pub use conf_files::{ConfFileInfo, ConfigFiles};
pub use generator::ConfigGenerator;
pub use nginx::{
    ConfigTest, NginxLayout, NginxOperation, NginxRuntime, NginxStatus, ServerControl,
};
pub use store::SiteStore;
pub use types::{
    domain_to_alias, CreateWebsiteRequest, HttpMode, LogKind, RedirectRule, SiteStatus, SiteType,
    UpdateWebsiteRequest, Website, DEFAULT_LOG_TAIL,
};
