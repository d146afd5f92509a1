//! GoDaddy DNS provider
//!
//! API documentation: <https://developer.godaddy.com/doc/endpoint/domains>

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::fmt;
use tracing::debug;

use super::{http_client, request_error};
use crate::dns::provider::{
    challenge_record_fqdn, relative_record_name, zone_candidates, DnsProviderError, DnsResult,
    DnsSolver, SolverSettings,
};

const GODADDY_API_BASE: &str = "https://api.godaddy.com/v1";

pub struct GoDaddyProvider {
    client: Client,
    api_key: String,
    api_secret: String,
    settings: SolverSettings,
}

impl fmt::Debug for GoDaddyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoDaddyProvider").finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct TxtRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    data: &'a str,
    ttl: u32,
}

impl GoDaddyProvider {
    pub fn new(api_key: &str, api_secret: &str) -> DnsResult<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            settings: SolverSettings::default(),
        })
    }

    fn auth_header(&self) -> String {
        format!("sso-key {}:{}", self.api_key, self.api_secret)
    }

    async fn find_zone(&self, domain: &str) -> DnsResult<String> {
        for candidate in zone_candidates(domain) {
            let response = self
                .client
                .get(format!("{}/domains/{}", GODADDY_API_BASE, candidate))
                .header("Authorization", self.auth_header())
                .send()
                .await
                .map_err(request_error)?;

            match response.status() {
                s if s.is_success() => {
                    debug!(domain = %domain, zone = %candidate, "Found GoDaddy domain");
                    return Ok(candidate);
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(DnsProviderError::Authentication(
                        "GoDaddy rejected the API key".to_string(),
                    ));
                }
                _ => continue,
            }
        }

        Err(DnsProviderError::ZoneNotFound {
            domain: domain.to_string(),
        })
    }
}

#[async_trait]
impl DnsSolver for GoDaddyProvider {
    fn name(&self) -> &'static str {
        "GoDaddy"
    }

    fn settings(&self) -> SolverSettings {
        self.settings
    }

    async fn present(&self, domain: &str, value: &str) -> DnsResult<String> {
        let zone = self.find_zone(domain).await?;
        let fqdn = challenge_record_fqdn(domain);
        let name = relative_record_name(&fqdn, &zone);

        let response = self
            .client
            .patch(format!("{}/domains/{}/records", GODADDY_API_BASE, zone))
            .header("Authorization", self.auth_header())
            .json(&[TxtRecord {
                record_type: "TXT",
                name: &name,
                data: value,
                ttl: self.settings.ttl,
            }])
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DnsProviderError::RecordCreation {
                record_name: fqdn,
                message: format!("HTTP {} - {}", status, body),
            });
        }

        Ok(format!("{}/{}", zone, name))
    }

    async fn cleanup(&self, _domain: &str, handle: &str) -> DnsResult<()> {
        let (zone, name) = handle.split_once('/').ok_or_else(|| {
            DnsProviderError::RecordDeletion {
                record_id: handle.to_string(),
                message: "malformed record handle".to_string(),
            }
        })?;

        let response = self
            .client
            .delete(format!(
                "{}/domains/{}/records/TXT/{}",
                GODADDY_API_BASE, zone, name
            ))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(DnsProviderError::RecordDeletion {
            record_id: handle.to_string(),
            message: format!("HTTP {}", status),
        })
    }
}
