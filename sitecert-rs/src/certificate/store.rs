//! Certificate persistence

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::types::{CertStatus, Certificate, ProviderMode, SourceType, split_domains};
use crate::acme::account::parse_timestamp;
use crate::error::{Result, SiteError};

/// Columns written when a certificate row is created
pub struct NewCertificate<'a> {
    pub primary_domain: &'a str,
    pub san_domains: &'a [String],
    pub provider: ProviderMode,
    pub source: SourceType,
    pub key_type: Option<&'a str>,
    pub acme_account_id: Option<i64>,
    pub dns_account_id: Option<i64>,
    pub pem: Option<&'a str>,
    pub private_key: Option<&'a str>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: CertStatus,
    pub auto_renew: bool,
    pub description: &'a str,
}

#[derive(Clone)]
pub struct CertificateStore {
    db: SqlitePool,
}

impl CertificateStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS certificates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                primary_domain TEXT NOT NULL,
                domains TEXT NOT NULL DEFAULT '',
                provider TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT 'autoApply',
                key_type TEXT,
                acme_account_id INTEGER,
                dns_account_id INTEGER,
                pem TEXT,
                private_key TEXT,
                issued_at TEXT,
                expires_at TEXT,
                status TEXT NOT NULL DEFAULT 'ready',
                message TEXT NOT NULL DEFAULT '',
                auto_renew BOOLEAN NOT NULL DEFAULT 1,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_certificates_renewal
            ON certificates(status, auto_renew, expires_at)
            "#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    pub async fn insert(&self, cert: NewCertificate<'_>) -> Result<Certificate> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO certificates (
                primary_domain, domains, provider, source, key_type, acme_account_id,
                dns_account_id, pem, private_key, issued_at, expires_at, status,
                message, auto_renew, description, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '', ?, ?, ?, ?)
            "#,
        )
        .bind(cert.primary_domain)
        .bind(cert.san_domains.join(","))
        .bind(cert.provider.as_str())
        .bind(cert.source.as_str())
        .bind(cert.key_type)
        .bind(cert.acme_account_id)
        .bind(cert.dns_account_id)
        .bind(cert.pem)
        .bind(cert.private_key)
        .bind(cert.issued_at.map(|d| d.to_rfc3339()))
        .bind(cert.expires_at.map(|d| d.to_rfc3339()))
        .bind(cert.status.as_str())
        .bind(cert.auto_renew)
        .bind(cert.description)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;

        let id = result.last_insert_rowid();
        self.get(id)
            .await?
            .ok_or_else(|| SiteError::NotFound(format!("certificate {}", id)))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Certificate>> {
        let row = sqlx::query("SELECT * FROM certificates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(row_to_certificate).transpose()
    }

    /// Like [`get`](Self::get) but missing rows are `NotFound`
    pub async fn require(&self, id: i64) -> Result<Certificate> {
        self.get(id)
            .await?
            .ok_or_else(|| SiteError::NotFound(format!("certificate {}", id)))
    }

    pub async fn list(&self) -> Result<Vec<Certificate>> {
        let rows = sqlx::query("SELECT * FROM certificates ORDER BY id")
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(row_to_certificate).collect()
    }

    pub async fn set_status(&self, id: i64, status: CertStatus, message: &str) -> Result<()> {
        sqlx::query("UPDATE certificates SET status = ?, message = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(message)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Store issued material and mark the certificate applied
    pub async fn record_issued(
        &self,
        id: i64,
        pem: &str,
        private_key: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE certificates
            SET pem = ?, private_key = ?, issued_at = ?, expires_at = ?,
                status = 'applied', message = '', updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(pem)
        .bind(private_key)
        .bind(issued_at.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn update_meta(
        &self,
        id: i64,
        auto_renew: bool,
        description: &str,
        primary_domain: &str,
        san_domains: &[String],
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE certificates
            SET auto_renew = ?, description = ?, primary_domain = ?, domains = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(auto_renew)
        .bind(description)
        .bind(primary_domain)
        .bind(san_domains.join(","))
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM certificates WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Applied, auto-renewing ACME certificates expiring before `cutoff`
    pub async fn due_for_renewal(&self, cutoff: DateTime<Utc>) -> Result<Vec<Certificate>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM certificates
            WHERE status = 'applied' AND auto_renew = 1 AND source = 'autoApply'
              AND expires_at IS NOT NULL AND expires_at < ?
            ORDER BY expires_at
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(row_to_certificate).collect()
    }
}

fn optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

fn row_to_certificate(row: SqliteRow) -> Result<Certificate> {
    let domains: String = row.try_get("domains")?;
    let provider: String = row.try_get("provider")?;
    let source: String = row.try_get("source")?;
    let key_type: Option<String> = row.try_get("key_type")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Certificate {
        id: row.try_get("id")?,
        primary_domain: row.try_get("primary_domain")?,
        san_domains: split_domains(&domains),
        provider: provider.parse()?,
        source: source.parse()?,
        key_type: key_type.map(|k| k.parse()).transpose()?,
        acme_account_id: row.try_get("acme_account_id")?,
        dns_account_id: row.try_get("dns_account_id")?,
        pem: row.try_get("pem")?,
        private_key: row.try_get("private_key")?,
        issued_at: optional_timestamp(row.try_get("issued_at")?)?,
        expires_at: optional_timestamp(row.try_get("expires_at")?)?,
        status: status.parse()?,
        message: row.try_get("message")?,
        auto_renew: row.try_get("auto_renew")?,
        description: row.try_get("description")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
