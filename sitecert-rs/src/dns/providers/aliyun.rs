//! Alibaba Cloud DNS provider (Alidns RPC API, signature version 1.0)
//!
//! API documentation: <https://www.alibabacloud.com/help/en/dns/api-alidns-2015-01-09-overview>

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use tracing::debug;

use super::signing::{canonical_query, hmac_sha1, percent_encode};
use super::{http_client, request_error};
use crate::dns::provider::{
    challenge_record_fqdn, relative_record_name, zone_candidates, DnsProviderError, DnsResult,
    DnsSolver, SolverSettings,
};

const ALIDNS_ENDPOINT: &str = "https://alidns.aliyuncs.com/";
const ALIDNS_VERSION: &str = "2015-01-09";

pub struct AliYunProvider {
    client: Client,
    access_key: String,
    secret_key: String,
    settings: SolverSettings,
}

impl fmt::Debug for AliYunProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliYunProvider").finish_non_exhaustive()
    }
}

/// Body of a failed call
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainInfo {
    domain_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordCreated {
    record_id: String,
}

impl AliYunProvider {
    pub fn new(access_key: &str, secret_key: &str) -> DnsResult<Self> {
        Ok(Self {
            client: http_client()?,
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            settings: SolverSettings::default(),
        })
    }

    /// Full query string for `action`, including the `Signature` parameter
    fn signed_query(
        &self,
        action: &str,
        params: &[(&str, &str)],
        timestamp: DateTime<Utc>,
        nonce: &str,
    ) -> String {
        let mut all: Vec<(String, String)> = vec![
            ("Action".into(), action.into()),
            ("Format".into(), "JSON".into()),
            ("Version".into(), ALIDNS_VERSION.into()),
            ("AccessKeyId".into(), self.access_key.clone()),
            ("SignatureMethod".into(), "HMAC-SHA1".into()),
            ("SignatureVersion".into(), "1.0".into()),
            ("SignatureNonce".into(), nonce.into()),
            (
                "Timestamp".into(),
                timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            ),
        ];
        all.extend(params.iter().map(|(k, v)| (k.to_string(), v.to_string())));

        let query = canonical_query(&all);
        let string_to_sign = format!("GET&{}&{}", percent_encode("/"), percent_encode(&query));
        let key = format!("{}&", self.secret_key);
        let signature = STANDARD.encode(hmac_sha1(key.as_bytes(), &string_to_sign));

        format!("{}&Signature={}", query, percent_encode(&signature))
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> DnsResult<Result<T, ApiError>> {
        let nonce = format!("{:016x}", rand::thread_rng().gen::<u64>());
        let query = self.signed_query(action, params, Utc::now(), &nonce);

        let response = self
            .client
            .get(format!("{}?{}", ALIDNS_ENDPOINT, query))
            .send()
            .await
            .map_err(request_error)?;

        if response.status().is_success() {
            Ok(Ok(response.json().await.map_err(request_error)?))
        } else {
            Ok(Err(response.json().await.unwrap_or_default()))
        }
    }

    async fn find_zone(&self, domain: &str) -> DnsResult<String> {
        for candidate in zone_candidates(domain) {
            match self
                .call::<DomainInfo>("DescribeDomainInfo", &[("DomainName", candidate.as_str())])
                .await?
            {
                Ok(info) => {
                    debug!(domain = %domain, zone = %info.domain_name, "Found Alidns domain");
                    return Ok(info.domain_name);
                }
                Err(e) if is_auth_failure(&e.code) => {
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

fn is_auth_failure(code: &str) -> bool {
    code.starts_with("InvalidAccessKeyId")
        || code.starts_with("SignatureDoesNotMatch")
        || code == "Forbidden.RAM"
}

#[async_trait]
impl DnsSolver for AliYunProvider {
    fn name(&self) -> &'static str {
        "AliYun"
    }

    fn settings(&self) -> SolverSettings {
        self.settings
    }

    async fn present(&self, domain: &str, value: &str) -> DnsResult<String> {
        let zone = self.find_zone(domain).await?;
        let fqdn = challenge_record_fqdn(domain);
        let rr = relative_record_name(&fqdn, &zone);
        let ttl = self.settings.ttl.to_string();

        let created = self
            .call::<RecordCreated>(
                "AddDomainRecord",
                &[
                    ("DomainName", zone.as_str()),
                    ("RR", rr.as_str()),
                    ("Type", "TXT"),
                    ("Value", value),
                    ("TTL", ttl.as_str()),
                ],
            )
            .await?;

        match created {
            Ok(record) => Ok(record.record_id),
            Err(e) => Err(DnsProviderError::RecordCreation {
                record_name: fqdn,
                message: format!("{}: {}", e.code, e.message),
            }),
        }
    }

    async fn cleanup(&self, _domain: &str, handle: &str) -> DnsResult<()> {
        let removed = self
            .call::<serde_json::Value>("DeleteDomainRecord", &[("RecordId", handle)])
            .await?;

        match removed {
            Ok(_) => Ok(()),
            Err(e) if e.code == "DomainRecordNotBelongToUser" || e.code.contains("NotExist") => {
                Ok(())
            }
            Err(e) => Err(DnsProviderError::RecordDeletion {
                record_id: handle.to_string(),
                message: format!("{}: {}", e.code, e.message),
            }),
        }
    }
}
