//! NameSilo DNS provider

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

const NAMESILO_API_BASE: &str = "https://www.namesilo.com/api";

/// Reply code for a successful operation
const CODE_SUCCESS: u64 = 300;
/// Reply code for an invalid API key
const CODE_INVALID_KEY: u64 = 110;

pub struct NameSiloProvider {
    client: Client,
    api_key: String,
    settings: SolverSettings,
}

impl fmt::Debug for NameSiloProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameSiloProvider").finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    reply: Reply,
}

#[derive(Debug, Deserialize)]
struct Reply {
    code: serde_json::Value,
    #[serde(default)]
    detail: String,
    record_id: Option<String>,
}

impl Reply {
    fn code(&self) -> u64 {
        match &self.code {
            serde_json::Value::Number(n) => n.as_u64().unwrap_or_default(),
            serde_json::Value::String(s) => s.parse().unwrap_or_default(),
            _ => 0,
        }
    }
}

impl NameSiloProvider {
    pub fn new(api_key: &str) -> DnsResult<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.to_string(),
            settings: SolverSettings::default(),
        })
    }

    async fn call(&self, operation: &str, params: &[(&str, &str)]) -> DnsResult<Reply> {
        let mut query: Vec<(&str, &str)> = vec![
            ("version", "1"),
            ("type", "json"),
            ("key", self.api_key.as_str()),
        ];
        query.extend_from_slice(params);

        let envelope: Envelope = self
            .client
            .get(format!("{}/{}", NAMESILO_API_BASE, operation))
            .query(&query)
            .send()
            .await
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)?;

        if envelope.reply.code() == CODE_INVALID_KEY {
            return Err(DnsProviderError::Authentication(envelope.reply.detail));
        }
        Ok(envelope.reply)
    }

    async fn find_zone(&self, domain: &str) -> DnsResult<String> {
        for candidate in zone_candidates(domain) {
            let reply = self.call("dnsListRecords", &[("domain", candidate.as_str())]).await?;
            if reply.code() == CODE_SUCCESS {
                debug!(domain = %domain, zone = %candidate, "Found NameSilo domain");
                return Ok(candidate);
            }
        }

        Err(DnsProviderError::ZoneNotFound {
            domain: domain.to_string(),
        })
    }
}

#[async_trait]
impl DnsSolver for NameSiloProvider {
    fn name(&self) -> &'static str {
        "NameSilo"
    }

    fn settings(&self) -> SolverSettings {
        self.settings
    }

    async fn present(&self, domain: &str, value: &str) -> DnsResult<String> {
        let zone = self.find_zone(domain).await?;
        let fqdn = challenge_record_fqdn(domain);
        let host = relative_record_name(&fqdn, &zone);
        let ttl = self.settings.ttl.to_string();

        let reply = self
            .call(
                "dnsAddRecord",
                &[
                    ("domain", zone.as_str()),
                    ("rrtype", "TXT"),
                    ("rrhost", host.as_str()),
                    ("rrvalue", value),
                    ("rrttl", ttl.as_str()),
                ],
            )
            .await?;

        match reply.record_id {
            Some(id) if reply.code() == CODE_SUCCESS => Ok(format!("{}/{}", zone, id)),
            _ => Err(DnsProviderError::RecordCreation {
                record_name: fqdn,
                message: reply.detail,
            }),
        }
    }

    async fn cleanup(&self, _domain: &str, handle: &str) -> DnsResult<()> {
        let (zone, record_id) = handle.split_once('/').ok_or_else(|| {
            DnsProviderError::RecordDeletion {
                record_id: handle.to_string(),
                message: "malformed record handle".to_string(),
            }
        })?;

        let reply = self
            .call("dnsDeleteRecord", &[("domain", zone), ("rrid", record_id)])
            .await?;
        if reply.code() == CODE_SUCCESS {
            return Ok(());
        }
        Err(DnsProviderError::RecordDeletion {
            record_id: record_id.to_string(),
            message: reply.detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_code_number_or_string() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"request":{"operation":"dnsAddRecord"},"reply":{"code":300,"detail":"success","record_id":"1a2b3c"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.reply.code(), CODE_SUCCESS);
        assert_eq!(envelope.reply.record_id.as_deref(), Some("1a2b3c"));

        let envelope: Envelope =
            serde_json::from_str(r#"{"reply":{"code":"110","detail":"Invalid API Key"}}"#)
                .unwrap();
        assert_eq!(envelope.reply.code(), CODE_INVALID_KEY);
    }
}
