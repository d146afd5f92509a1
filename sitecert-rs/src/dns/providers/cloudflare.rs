//! Cloudflare DNS provider
//!
//! API documentation: <https://developers.cloudflare.com/api/>

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::{http_client, request_error};
use crate::dns::provider::{
    challenge_record_fqdn, zone_candidates, DnsProviderError, DnsResult, DnsSolver,
    SolverSettings,
};

const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Cloudflare provider authenticated with an API token
pub struct CloudFlareProvider {
    client: Client,
    email: String,
    token: String,
    settings: SolverSettings,
}

impl fmt::Debug for CloudFlareProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudFlareProvider")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
}

fn describe(errors: &[ApiMessage]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl CloudFlareProvider {
    pub fn new(email: &str, token: &str) -> DnsResult<Self> {
        Ok(Self {
            client: http_client()?,
            email: email.to_string(),
            token: token.to_string(),
            settings: SolverSettings::default(),
        })
    }

    async fn find_zone(&self, domain: &str) -> DnsResult<Zone> {
        for candidate in zone_candidates(domain) {
            let response = self
                .client
                .get(format!("{}/zones", CLOUDFLARE_API_BASE))
                .bearer_auth(&self.token)
                .query(&[("name", candidate.as_str())])
                .send()
                .await
                .map_err(request_error)?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED
                || response.status() == reqwest::StatusCode::FORBIDDEN
            {
                return Err(DnsProviderError::Authentication(
                    "Cloudflare rejected the API token".to_string(),
                ));
            }

            let body: ApiResponse<Vec<Zone>> = response.json().await.map_err(request_error)?;
            if !body.success {
                return Err(DnsProviderError::ApiRequest(describe(&body.errors)));
            }
            if let Some(zone) = body.result.and_then(|zones| zones.into_iter().next()) {
                debug!(domain = %domain, zone = %zone.name, "Found Cloudflare zone");
                return Ok(zone);
            }
        }

        Err(DnsProviderError::ZoneNotFound {
            domain: domain.to_string(),
        })
    }
}

#[async_trait]
impl DnsSolver for CloudFlareProvider {
    fn name(&self) -> &'static str {
        "CloudFlare"
    }

    fn settings(&self) -> SolverSettings {
        self.settings
    }

    async fn present(&self, domain: &str, value: &str) -> DnsResult<String> {
        let zone = self.find_zone(domain).await?;
        let fqdn = challenge_record_fqdn(domain);

        let response = self
            .client
            .post(format!("{}/zones/{}/dns_records", CLOUDFLARE_API_BASE, zone.id))
            .bearer_auth(&self.token)
            .json(&CreateRecord {
                record_type: "TXT",
                name: &fqdn,
                content: value,
                ttl: self.settings.ttl,
            })
            .send()
            .await
            .map_err(request_error)?;

        let body: ApiResponse<DnsRecord> = response.json().await.map_err(request_error)?;
        match body.result {
            Some(record) if body.success => Ok(format!("{}/{}", zone.id, record.id)),
            _ => Err(DnsProviderError::RecordCreation {
                record_name: fqdn,
                message: describe(&body.errors),
            }),
        }
    }

    async fn cleanup(&self, _domain: &str, handle: &str) -> DnsResult<()> {
        let (zone_id, record_id) = handle.split_once('/').ok_or_else(|| {
            DnsProviderError::RecordDeletion {
                record_id: handle.to_string(),
                message: "malformed record handle".to_string(),
            }
        })?;

        let response = self
            .client
            .delete(format!(
                "{}/zones/{}/dns_records/{}",
                CLOUDFLARE_API_BASE, zone_id, record_id
            ))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(DnsProviderError::RecordDeletion {
            record_id: record_id.to_string(),
            message: format!("HTTP {}", status),
        })
    }
}
