//! Huawei Cloud DNS provider (DNS API v2, AK/SK `SDK-HMAC-SHA256` signing)
//!
//! API documentation: <https://support.huaweicloud.com/intl/en-us/api-dns/dns_api_64001.html>

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use tracing::debug;

use super::signing::{canonical_query, hmac_sha256, sha256_hex};
use super::{http_client, request_error};
use crate::dns::provider::{
    challenge_record_fqdn, zone_candidates, DnsProviderError, DnsResult, DnsSolver,
    SolverSettings,
};

/// Region used when the account does not name one
pub const DEFAULT_REGION: &str = "cn-north-1";

const CONTENT_TYPE: &str = "application/json";

pub struct HuaweiCloudProvider {
    client: Client,
    access_key: String,
    secret_key: String,
    host: String,
    settings: SolverSettings,
}

impl fmt::Debug for HuaweiCloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HuaweiCloudProvider")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ZoneList {
    #[serde(default)]
    zones: Vec<Zone>,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RecordSet {
    id: String,
}

/// A request ready to be signed
struct Signable<'a> {
    method: &'a Method,
    path: &'a str,
    query: &'a [(String, String)],
    body: &'a str,
}

impl HuaweiCloudProvider {
    pub fn new(access_key: &str, secret_key: &str, region: Option<&str>) -> DnsResult<Self> {
        let region = region.filter(|r| !r.trim().is_empty()).unwrap_or(DEFAULT_REGION);
        Ok(Self {
            client: http_client()?,
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            host: format!("dns.{}.myhuaweicloud.com", region.trim()),
            settings: SolverSettings::default(),
        })
    }

    /// `Authorization` header value for `request` stamped with `sdk_date`
    fn authorization(&self, request: &Signable<'_>, sdk_date: &str) -> String {
        let signed_headers = "content-type;host;x-sdk-date";
        // The canonical URI always ends with a slash
        let uri = if request.path.ends_with('/') {
            request.path.to_string()
        } else {
            format!("{}/", request.path)
        };
        let canonical_request = format!(
            "{}\n{}\n{}\ncontent-type:{}\nhost:{}\nx-sdk-date:{}\n\n{}\n{}",
            request.method.as_str(),
            uri,
            canonical_query(request.query),
            CONTENT_TYPE,
            self.host,
            sdk_date,
            signed_headers,
            sha256_hex(request.body.as_bytes())
        );
        let string_to_sign = format!(
            "SDK-HMAC-SHA256\n{}\n{}",
            sdk_date,
            sha256_hex(canonical_request.as_bytes())
        );
        let signature = hex::encode(hmac_sha256(self.secret_key.as_bytes(), &string_to_sign));

        format!(
            "SDK-HMAC-SHA256 Access={}, SignedHeaders={}, Signature={}",
            self.access_key, signed_headers, signature
        )
    }

    async fn send(&self, request: Signable<'_>) -> DnsResult<reqwest::Response> {
        let sdk_date = sdk_date(Utc::now());
        let authorization = self.authorization(&request, &sdk_date);

        let mut url = format!("https://{}{}", self.host, request.path);
        if !request.query.is_empty() {
            url = format!("{}?{}", url, canonical_query(request.query));
        }

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Sdk-Date", &sdk_date)
            .header("Authorization", authorization);
        if !request.body.is_empty() {
            builder = builder.body(request.body.to_string());
        }

        let response = builder.send().await.map_err(request_error)?;
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(DnsProviderError::Authentication(
                "Huawei Cloud rejected the access key".to_string(),
            ));
        }
        Ok(response)
    }

    async fn find_zone(&self, domain: &str) -> DnsResult<Zone> {
        for candidate in zone_candidates(domain) {
            let query = vec![
                ("type".to_string(), "public".to_string()),
                ("name".to_string(), candidate.clone()),
            ];
            let response = self
                .send(Signable {
                    method: &Method::GET,
                    path: "/v2/zones",
                    query: &query,
                    body: "",
                })
                .await?;
            if !response.status().is_success() {
                continue;
            }

            let list: ZoneList = response.json().await.map_err(request_error)?;
            let wanted = format!("{}.", candidate);
            if let Some(zone) = list.zones.into_iter().find(|z| z.name == wanted) {
                debug!(domain = %domain, zone = %zone.name, "Found Huawei Cloud zone");
                return Ok(zone);
            }
        }

        Err(DnsProviderError::ZoneNotFound {
            domain: domain.to_string(),
        })
    }
}

/// `X-Sdk-Date` format: `20240101T000000Z`
fn sdk_date(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

#[async_trait]
impl DnsSolver for HuaweiCloudProvider {
    fn name(&self) -> &'static str {
        "HuaweiCloud"
    }

    fn settings(&self) -> SolverSettings {
        self.settings
    }

    async fn present(&self, domain: &str, value: &str) -> DnsResult<String> {
        let zone = self.find_zone(domain).await?;
        let fqdn = challenge_record_fqdn(domain);

        let body = json!({
            "name": format!("{}.", fqdn),
            "type": "TXT",
            "ttl": self.settings.ttl,
            "records": [format!("\"{}\"", value)],
        })
        .to_string();
        let path = format!("/v2/zones/{}/recordsets", zone.id);

        let response = self
            .send(Signable {
                method: &Method::POST,
                path: &path,
                query: &[],
                body: &body,
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DnsProviderError::RecordCreation {
                record_name: fqdn,
                message: format!("HTTP {} - {}", status, text),
            });
        }

        let record: RecordSet = response.json().await.map_err(request_error)?;
        Ok(format!("{}/{}", zone.id, record.id))
    }

    async fn cleanup(&self, _domain: &str, handle: &str) -> DnsResult<()> {
        let (zone_id, record_id) = handle.split_once('/').ok_or_else(|| {
            DnsProviderError::RecordDeletion {
                record_id: handle.to_string(),
                message: "malformed record handle".to_string(),
            }
        })?;
        let path = format!("/v2/zones/{}/recordsets/{}", zone_id, record_id);

        let response = self
            .send(Signable {
                method: &Method::DELETE,
                path: &path,
                query: &[],
                body: "",
            })
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(DnsProviderError::RecordDeletion {
            record_id: record_id.to_string(),
            message: format!("HTTP {}", status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_region_selects_endpoint() {
        let default = HuaweiCloudProvider::new("ak", "sk", None).unwrap();
        assert_eq!(default.host, "dns.cn-north-1.myhuaweicloud.com");

        let custom = HuaweiCloudProvider::new("ak", "sk", Some("ap-southeast-1")).unwrap();
        assert_eq!(custom.host, "dns.ap-southeast-1.myhuaweicloud.com");

        let blank = HuaweiCloudProvider::new("ak", "sk", Some(" ")).unwrap();
        assert_eq!(blank.host, "dns.cn-north-1.myhuaweicloud.com");
    }

    #[test]
    fn test_authorization_header() {
        let provider = HuaweiCloudProvider::new("AK123", "very-secret", None).unwrap();
        let query = vec![("type".to_string(), "public".to_string())];
        let request = Signable {
            method: &Method::GET,
            path: "/v2/zones",
            query: &query,
            body: "",
        };
        let date = sdk_date(Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap());
        assert_eq!(date, "20240501T083000Z");

        let header = provider.authorization(&request, &date);
        assert!(header.starts_with(
            "SDK-HMAC-SHA256 Access=AK123, SignedHeaders=content-type;host;x-sdk-date, Signature="
        ));
        assert_eq!(header.rsplit("Signature=").next().unwrap().len(), 64);
        assert!(!header.contains("very-secret"));
        assert_eq!(header, provider.authorization(&request, &date));
    }

    #[test]
    fn test_debug_hides_keys() {
        let provider = HuaweiCloudProvider::new("AK123", "very-secret", None).unwrap();
        let printed = format!("{:?}", provider);
        assert!(!printed.contains("very-secret"));
        assert!(!printed.contains("AK123"));
    }
}
