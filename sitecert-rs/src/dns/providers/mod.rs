//! Built-in DNS provider implementations
//!
//! Available providers:
//! - [`AliYunProvider`] - Alibaba Cloud DNS (signed RPC)
//! - [`CloudFlareProvider`] - Cloudflare API v4
//! - [`DnsPodProvider`] - DNSPod legacy API
//! - [`GoDaddyProvider`] - GoDaddy domains API
//! - [`HuaweiCloudProvider`] - Huawei Cloud DNS v2 (AK/SK signing)
//! - [`NameSiloProvider`] - NameSilo API
//! - [`TencentCloudProvider`] - DNSPod API 3.0 (TC3 signing)

mod aliyun;
mod cloudflare;
mod dnspod;
mod godaddy;
mod huaweicloud;
mod namesilo;
mod signing;
mod tencentcloud;

pub use aliyun::AliYunProvider;
pub use cloudflare::CloudFlareProvider;
pub use dnspod::DnsPodProvider;
pub use godaddy::GoDaddyProvider;
pub use huaweicloud::HuaweiCloudProvider;
pub use namesilo::NameSiloProvider;
pub use tencentcloud::TencentCloudProvider;

use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use super::provider::{DnsProviderError, DnsResult, DnsSolver};
use super::registry::ProviderRegistry;

/// Timeout for provider API requests
const API_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn http_client() -> DnsResult<Client> {
    Client::builder()
        .timeout(API_TIMEOUT)
        .user_agent(concat!("sitecert-rs/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DnsProviderError::ApiRequest(format!("Failed to create HTTP client: {}", e)))
}

pub(crate) fn request_error(e: reqwest::Error) -> DnsProviderError {
    // reqwest errors may embed the request URL, which carries API keys for
    // some providers
    DnsProviderError::ApiRequest(e.without_url().to_string())
}

/// Register every built-in provider
pub fn register_builtin(registry: &mut ProviderRegistry) {
    registry.register("CloudFlare", "Cloudflare", &["email", "apiKey"], |creds| {
        let provider = CloudFlareProvider::new(
            creds.get("email").unwrap_or_default(),
            creds.require("CloudFlare", "apiKey")?,
        )?;
        Ok(Arc::new(provider) as Arc<dyn DnsSolver>)
    });

    registry.register("AliYun", "Alibaba Cloud DNS", &["accessKey", "secretKey"], |creds| {
        let provider = AliYunProvider::new(
            creds.require("AliYun", "accessKey")?,
            creds.require("AliYun", "secretKey")?,
        )?;
        Ok(Arc::new(provider) as Arc<dyn DnsSolver>)
    });

    registry.register("DnsPod", "DNSPod", &["id", "token"], |creds| {
        let provider = DnsPodProvider::new(
            creds.require("DnsPod", "id")?,
            creds.require("DnsPod", "token")?,
        )?;
        Ok(Arc::new(provider) as Arc<dyn DnsSolver>)
    });

    registry.register("GoDaddy", "GoDaddy", &["apiKey", "apiSecret"], |creds| {
        let provider = GoDaddyProvider::new(
            creds.require("GoDaddy", "apiKey")?,
            creds.require("GoDaddy", "apiSecret")?,
        )?;
        Ok(Arc::new(provider) as Arc<dyn DnsSolver>)
    });

    registry.register(
        "HuaweiCloud",
        "Huawei Cloud DNS",
        &["accessKey", "secretKey", "region"],
        |creds| {
            let provider = HuaweiCloudProvider::new(
                creds.require("HuaweiCloud", "accessKey")?,
                creds.require("HuaweiCloud", "secretKey")?,
                creds.get("region"),
            )?;
            Ok(Arc::new(provider) as Arc<dyn DnsSolver>)
        },
    );

    registry.register("NameSilo", "NameSilo", &["apiKey"], |creds| {
        let provider = NameSiloProvider::new(creds.require("NameSilo", "apiKey")?)?;
        Ok(Arc::new(provider) as Arc<dyn DnsSolver>)
    });

    registry.register(
        "TencentCloud",
        "Tencent Cloud DNS",
        &["secretID", "secretKey"],
        |creds| {
            let provider = TencentCloudProvider::new(
                creds.require("TencentCloud", "secretID")?,
                creds.require("TencentCloud", "secretKey")?,
            )?;
            Ok(Arc::new(provider) as Arc<dyn DnsSolver>)
        },
    );
}
