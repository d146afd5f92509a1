//! Tencent Cloud DNS provider (DNSPod API 3.0, TC3-HMAC-SHA256 signing)
//!
//! API documentation: <https://www.tencentcloud.com/document/api/1157/49025>

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use tracing::debug;

use super::signing::{hmac_sha256, sha256_hex};
use super::{http_client, request_error};
use crate::dns::provider::{
    challenge_record_fqdn, relative_record_name, zone_candidates, DnsProviderError, DnsResult,
    DnsSolver, SolverSettings,
};

const TENCENT_HOST: &str = "dnspod.tencentcloudapi.com";
const TENCENT_SERVICE: &str = "dnspod";
const TENCENT_VERSION: &str = "2021-03-23";
const CONTENT_TYPE: &str = "application/json; charset=utf-8";

pub struct TencentCloudProvider {
    client: Client,
    secret_id: String,
    secret_key: String,
    settings: SolverSettings,
}

impl fmt::Debug for TencentCloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TencentCloudProvider").finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Response")]
    response: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message")]
    message: String,
}

impl TencentCloudProvider {
    pub fn new(secret_id: &str, secret_key: &str) -> DnsResult<Self> {
        Ok(Self {
            client: http_client()?,
            secret_id: secret_id.to_string(),
            secret_key: secret_key.to_string(),
            settings: SolverSettings::default(),
        })
    }

    /// `Authorization` header for a JSON POST signed at `timestamp`
    fn authorization(&self, payload: &str, timestamp: i64) -> String {
        let date = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let signed_headers = "content-type;host";
        let canonical_request = format!(
            "POST\n/\n\ncontent-type:{}\nhost:{}\n\n{}\n{}",
            CONTENT_TYPE,
            TENCENT_HOST,
            signed_headers,
            sha256_hex(payload.as_bytes())
        );

        let scope = format!("{}/{}/tc3_request", date, TENCENT_SERVICE);
        let string_to_sign = format!(
            "TC3-HMAC-SHA256\n{}\n{}\n{}",
            timestamp,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let secret_date = hmac_sha256(format!("TC3{}", self.secret_key).as_bytes(), &date);
        let secret_service = hmac_sha256(&secret_date, TENCENT_SERVICE);
        let secret_signing = hmac_sha256(&secret_service, "tc3_request");
        let signature = hex::encode(hmac_sha256(&secret_signing, &string_to_sign));

        format!(
            "TC3-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.secret_id, scope, signed_headers, signature
        )
    }

    /// Call `action`; `Err` inside `Ok` carries the API's own error
    async fn call(
        &self,
        action: &str,
        body: serde_json::Value,
    ) -> DnsResult<Result<serde_json::Value, ApiError>> {
        let payload = body.to_string();
        let timestamp = Utc::now().timestamp();

        let envelope: Envelope = self
            .client
            .post(format!("https://{}/", TENCENT_HOST))
            .header("Content-Type", CONTENT_TYPE)
            .header("Host", TENCENT_HOST)
            .header("X-TC-Action", action)
            .header("X-TC-Version", TENCENT_VERSION)
            .header("X-TC-Timestamp", timestamp.to_string())
            .header("Authorization", self.authorization(&payload, timestamp))
            .body(payload)
            .send()
            .await
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)?;

        Ok(split_response(envelope.response))
    }

    async fn find_zone(&self, domain: &str) -> DnsResult<String> {
        for candidate in zone_candidates(domain) {
            match self
                .call("DescribeDomain", json!({ "Domain": candidate }))
                .await?
            {
                Ok(_) => {
                    debug!(domain = %domain, zone = %candidate, "Found Tencent Cloud domain");
                    return Ok(candidate);
                }
                Err(e) if e.code.starts_with("AuthFailure") => {
                    return Err(DnsProviderError::Authentication(e.message));
                }
                Err(_) => continue,
            }
        }

        Err(DnsProviderError::ZoneNotFound {
            domain: domain.to_string(),
        })
    }
}

fn split_response(response: serde_json::Value) -> Result<serde_json::Value, ApiError> {
    match response.get("Error") {
        Some(error) => Err(serde_json::from_value(error.clone()).unwrap_or(ApiError {
            code: "Unknown".to_string(),
            message: error.to_string(),
        })),
        None => Ok(response),
    }
}

#[async_trait]
impl DnsSolver for TencentCloudProvider {
    fn name(&self) -> &'static str {
        "TencentCloud"
    }

    fn settings(&self) -> SolverSettings {
        self.settings
    }

    async fn present(&self, domain: &str, value: &str) -> DnsResult<String> {
        let zone = self.find_zone(domain).await?;
        let fqdn = challenge_record_fqdn(domain);
        let sub_domain = relative_record_name(&fqdn, &zone);

        let created = self
            .call(
                "CreateRecord",
                json!({
                    "Domain": zone,
                    "SubDomain": sub_domain,
                    "RecordType": "TXT",
                    "RecordLine": "默认",
                    "Value": value,
                    "TTL": self.settings.ttl,
                }),
            )
            .await?;

        match created {
            Ok(response) => match response.get("RecordId").and_then(|id| id.as_u64()) {
                Some(id) => Ok(format!("{}/{}", zone, id)),
                None => Err(DnsProviderError::RecordCreation {
                    record_name: fqdn,
                    message: "response carries no RecordId".to_string(),
                }),
            },
            Err(e) => Err(DnsProviderError::RecordCreation {
                record_name: fqdn,
                message: format!("{}: {}", e.code, e.message),
            }),
        }
    }

    async fn cleanup(&self, _domain: &str, handle: &str) -> DnsResult<()> {
        let (zone, record_id) = handle
            .split_once('/')
            .and_then(|(zone, id)| id.parse::<u64>().ok().map(|id| (zone, id)))
            .ok_or_else(|| DnsProviderError::RecordDeletion {
                record_id: handle.to_string(),
                message: "malformed record handle".to_string(),
            })?;

        match self
            .call("DeleteRecord", json!({ "Domain": zone, "RecordId": record_id }))
            .await?
        {
            Ok(_) => Ok(()),
            Err(e) if e.code == "InvalidParameter.RecordIdInvalid" => Ok(()),
            Err(e) => Err(DnsProviderError::RecordDeletion {
                record_id: record_id.to_string(),
                message: format!("{}: {}", e.code, e.message),
            }),
        }
    }
}
