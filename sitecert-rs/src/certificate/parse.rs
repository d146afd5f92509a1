//! X.509 certificate inspection

use chrono::{DateTime, Utc};
use x509_parser::extensions::GeneralName;
use x509_parser::pem::parse_x509_pem;

use crate::acme::AcmeError;

/// Names and validity window of a leaf certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    /// Subject CN, or the first DNS SAN when the CN is empty
    pub primary_domain: String,
    /// DNS SANs other than the primary domain
    pub san_domains: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

fn timestamp(ts: i64) -> Result<DateTime<Utc>, AcmeError> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| AcmeError::CertificateParse(format!("timestamp {} out of range", ts)))
}

/// Parse the first certificate of a PEM bundle
pub fn parse_certificate(pem: &str) -> Result<ParsedCertificate, AcmeError> {
    let (_, pem) = parse_x509_pem(pem.as_bytes())
        .map_err(|e| AcmeError::CertificateParse(format!("invalid PEM: {}", e)))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| AcmeError::CertificateParse(format!("invalid certificate: {}", e)))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut dns_names = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                dns_names.push(dns.to_string());
            }
        }
    }

    let primary_domain = if common_name.is_empty() {
        dns_names.first().cloned().unwrap_or_default()
    } else {
        common_name
    };
    if primary_domain.is_empty() {
        return Err(AcmeError::CertificateParse(
            "certificate names no domain".to_string(),
        ));
    }

    let mut san_domains: Vec<String> = Vec::new();
    for name in dns_names {
        if name != primary_domain && !san_domains.contains(&name) {
            san_domains.push(name);
        }
    }

    let validity = cert.validity();
    let not_before = timestamp(validity.not_before.timestamp())?;
    let not_after = timestamp(validity.not_after.timestamp())?;
    if not_after <= not_before {
        return Err(AcmeError::CertificateParse(
            "certificate expires before it becomes valid".to_string(),
        ));
    }

    Ok(ParsedCertificate {
        primary_domain,
        san_domains,
        not_before,
        not_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{date_time_ymd, CertificateParams, DistinguishedName, DnType, KeyPair};

    fn issue(cn: Option<&str>, sans: &[&str]) -> String {
        let mut params =
            CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>())
                .unwrap();
        params.distinguished_name = DistinguishedName::new();
        if let Some(cn) = cn {
            params.distinguished_name.push(DnType::CommonName, cn);
        }
        params.not_before = date_time_ymd(2025, 1, 1);
        params.not_after = date_time_ymd(2025, 4, 1);
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn test_primary_from_common_name() {
        let pem = issue(
            Some("example.com"),
            &["example.com", "www.example.com", "api.example.com"],
        );
        let parsed = parse_certificate(&pem).unwrap();
        assert_eq!(parsed.primary_domain, "example.com");
        assert_eq!(parsed.san_domains, vec!["www.example.com", "api.example.com"]);

        assert_eq!(parsed.not_before.to_rfc3339(), "2025-01-01T00:00:00+00:00");
        assert_eq!((parsed.not_after - parsed.not_before).num_days(), 90);
    }

    #[test]
    fn test_primary_falls_back_to_first_san() {
        let pem = issue(None, &["a.example.com", "b.example.com"]);
        let parsed = parse_certificate(&pem).unwrap();
        assert_eq!(parsed.primary_domain, "a.example.com");
        assert_eq!(parsed.san_domains, vec!["b.example.com"]);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_certificate("not a certificate").is_err());
        assert!(parse_certificate(
            "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n"
        )
        .is_err());
    }
}
