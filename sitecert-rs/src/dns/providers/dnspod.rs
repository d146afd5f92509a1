//! DNSPod provider (legacy `dnsapi.cn` API, `login_token` auth)

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use tracing::debug;

use super::{http_client, request_error};
use crate::dns::provider::{
    challenge_record_fqdn, relative_record_name, zone_candidates, DnsProviderError, DnsResult,
    DnsSolver, SolverSettings,
};

const DNSPOD_API_BASE: &str = "https://dnsapi.cn";

pub struct DnsPodProvider {
    client: Client,
    /// `{id},{token}`
    login_token: String,
    settings: SolverSettings,
}

impl fmt::Debug for DnsPodProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsPodProvider").finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct Status {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct DomainInfo {
    status: Status,
    domain: Option<DomainEntry>,
}

#[derive(Debug, Deserialize)]
struct DomainEntry {
    id: serde_json::Value,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RecordCreated {
    status: Status,
    record: Option<RecordEntry>,
}

#[derive(Debug, Deserialize)]
struct RecordEntry {
    id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StatusOnly {
    status: Status,
}

/// DNSPod ids come back as either numbers or strings
fn id_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl DnsPodProvider {
    pub fn new(id: &str, token: &str) -> DnsResult<Self> {
        Ok(Self {
            client: http_client()?,
            login_token: format!("{},{}", id, token),
            settings: SolverSettings::default(),
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> DnsResult<T> {
        let mut form: Vec<(&str, &str)> = vec![
            ("login_token", self.login_token.as_str()),
            ("format", "json"),
            ("lang", "en"),
        ];
        form.extend_from_slice(params);

        self.client
            .post(format!("{}/{}", DNSPOD_API_BASE, action))
            .form(&form)
            .send()
            .await
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)
    }

    async fn find_domain(&self, domain: &str) -> DnsResult<(String, String)> {
        for candidate in zone_candidates(domain) {
            let info: DomainInfo = self.call("Domain.Info", &[("domain", candidate.as_str())]).await?;
            match info.status.code.as_str() {
                "1" => {
                    if let Some(entry) = info.domain {
                        debug!(domain = %domain, zone = %entry.name, "Found DNSPod domain");
                        return Ok((id_string(&entry.id), entry.name));
                    }
                }
                "-1" => {
                    return Err(DnsProviderError::Authentication(info.status.message));
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
impl DnsSolver for DnsPodProvider {
    fn name(&self) -> &'static str {
        "DnsPod"
    }

    fn settings(&self) -> SolverSettings {
        self.settings
    }

    async fn present(&self, domain: &str, value: &str) -> DnsResult<String> {
        let (domain_id, zone) = self.find_domain(domain).await?;
        let fqdn = challenge_record_fqdn(domain);
        let sub_domain = relative_record_name(&fqdn, &zone);
        let ttl = self.settings.ttl.to_string();

        let created: RecordCreated = self
            .call(
                "Record.Create",
                &[
                    ("domain_id", domain_id.as_str()),
                    ("sub_domain", sub_domain.as_str()),
                    ("record_type", "TXT"),
                    ("record_line", "默认"),
                    ("value", value),
                    ("ttl", ttl.as_str()),
                ],
            )
            .await?;

        match created.record {
            Some(record) if created.status.code == "1" => {
                Ok(format!("{}/{}", domain_id, id_string(&record.id)))
            }
            _ => Err(DnsProviderError::RecordCreation {
                record_name: fqdn,
                message: created.status.message,
            }),
        }
    }

    async fn cleanup(&self, _domain: &str, handle: &str) -> DnsResult<()> {
        let (domain_id, record_id) = handle.split_once('/').ok_or_else(|| {
            DnsProviderError::RecordDeletion {
                record_id: handle.to_string(),
                message: "malformed record handle".to_string(),
            }
        })?;

        let removed: StatusOnly = self
            .call(
                "Record.Remove",
                &[("domain_id", domain_id), ("record_id", record_id)],
            )
            .await?;

        // 8: record id invalid, already gone
        match removed.status.code.as_str() {
            "1" | "8" => Ok(()),
            _ => Err(DnsProviderError::RecordDeletion {
                record_id: record_id.to_string(),
                message: removed.status.message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record_created() {
        let created: RecordCreated = serde_json::from_str(
            r#"{"status":{"code":"1","message":"Action completed successful"},"record":{"id":"16894439","name":"_acme-challenge","status":"enable"}}"#,
        )
        .unwrap();
        assert_eq!(created.status.code, "1");
        assert_eq!(id_string(&created.record.unwrap().id), "16894439");
    }

    #[test]
    fn test_numeric_domain_id() {
        let info: DomainInfo = serde_json::from_str(
            r#"{"status":{"code":"1","message":"ok"},"domain":{"id":2317346,"name":"example.com"}}"#,
        )
        .unwrap();
        assert_eq!(id_string(&info.domain.unwrap().id), "2317346");
    }

    #[test]
    fn test_debug_hides_login_token() {
        let provider = DnsPodProvider::new("12345", "secret-token").unwrap();
        assert!(!format!("{:?}", provider).contains("secret-token"));
    }
}
