//! ACME and DNS account storage

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{info, warn};

use super::client::{AcmeBackend, RegisteredAccount};
use super::error::AcmeError;
use super::keys;
use super::types::{
    AccountExport, AcmeAccount, AcmeAccountExport, CaType, DnsAccount, DnsAccountExport,
    DnsAccountRequest, ExternalAccountBinding, ImportSummary, KeyType, RegisterAccountRequest,
};
use crate::dns::{Credentials, ProviderRegistry};
use crate::error::{Result, SiteError};

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| SiteError::Validation(format!("bad timestamp '{}': {}", value, e)))
}

/// Manages CA accounts and DNS provider accounts
pub struct AccountManager {
    db: SqlitePool,
    backend: Arc<dyn AcmeBackend>,
    registry: Arc<ProviderRegistry>,
}

impl AccountManager {
    pub fn new(db: SqlitePool, backend: Arc<dyn AcmeBackend>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            db,
            backend,
            registry,
        }
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS acme_accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                ca_type TEXT NOT NULL,
                key_type TEXT NOT NULL,
                private_key TEXT NOT NULL,
                directory_url TEXT NOT NULL,
                account_url TEXT NOT NULL,
                eab_kid TEXT,
                eab_hmac_key TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dns_accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                provider TEXT NOT NULL,
                authorization TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Register with the CA without persisting anything.
    ///
    /// Returns the account key PEM and the CA-assigned account URL.
    pub async fn register(
        &self,
        email: &str,
        key_type: KeyType,
        ca_type: CaType,
        custom_directory_url: Option<&str>,
        eab: Option<&ExternalAccountBinding>,
    ) -> Result<RegisteredAccount> {
        if !email.contains('@') {
            return Err(SiteError::Validation(format!("invalid email '{}'", email)));
        }
        let directory_url = ca_type.directory_url(custom_directory_url)?;
        if ca_type.requires_eab() && eab.is_none() {
            return Err(AcmeError::Registration(format!(
                "{} requires external account binding (kid + HMAC key)",
                ca_type
            ))
            .into());
        }

        if !self.backend.supports_account_key(key_type) {
            return Err(SiteError::Validation(format!(
                "account key type {} is not supported by the ACME client",
                key_type
            )));
        }

        info!(ca = %ca_type, key_type = %key_type, "Registering ACME account");
        let registered = self
            .backend
            .register(email, key_type, &directory_url, eab)
            .await?;
        Ok(registered)
    }

    /// Register and persist a new account. Nothing is stored when
    /// registration fails.
    pub async fn create_account(&self, request: RegisterAccountRequest) -> Result<AcmeAccount> {
        let registered = self
            .register(
                &request.email,
                request.key_type,
                request.ca_type,
                request.directory_url.as_deref(),
                request.eab.as_ref(),
            )
            .await
            .map_err(|e| {
                warn!(email = %request.email, error = %e, "ACME registration failed");
                e
            })?;
        let directory_url = request.ca_type.directory_url(request.directory_url.as_deref())?;

        let id = self
            .insert_account(&AcmeAccountExport {
                email: request.email,
                ca_type: request.ca_type,
                key_type: request.key_type,
                private_key: registered.private_key_pem,
                directory_url,
                account_url: registered.account_url,
                eab: request.eab,
            })
            .await?;

        self.get_account(id)
            .await?
            .ok_or_else(|| SiteError::NotFound("Failed to retrieve created account".to_string()))
    }

    /// Persist an account whose key must match its declared key type
    async fn insert_account(&self, account: &AcmeAccountExport) -> Result<i64> {
        let actual = keys::key_type_of_pem(&account.private_key)?;
        if actual != account.key_type {
            return Err(SiteError::Validation(format!(
                "account key is {} but {} was declared",
                actual, account.key_type
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO acme_accounts (
                email, ca_type, key_type, private_key, directory_url, account_url,
                eab_kid, eab_hmac_key, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.email)
        .bind(account.ca_type.as_str())
        .bind(account.key_type.as_str())
        .bind(&account.private_key)
        .bind(&account.directory_url)
        .bind(&account.account_url)
        .bind(account.eab.as_ref().map(|e| e.kid.clone()))
        .bind(account.eab.as_ref().map(|e| e.hmac_key.clone()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_account(&self, id: i64) -> Result<Option<AcmeAccount>> {
        let row = sqlx::query("SELECT * FROM acme_accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(|r| self.row_to_account(r)).transpose()
    }

    pub async fn list_accounts(&self) -> Result<Vec<AcmeAccount>> {
        let rows = sqlx::query("SELECT * FROM acme_accounts ORDER BY id")
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(|r| self.row_to_account(r)).collect()
    }

    pub async fn delete_account(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM acme_accounts WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SiteError::NotFound(format!("ACME account {}", id)));
        }
        Ok(())
    }

    fn check_provider(&self, request: &DnsAccountRequest) -> Result<()> {
        if request.name.trim().is_empty() {
            return Err(SiteError::Validation("DNS account name is empty".to_string()));
        }
        // Build once so missing credential fields surface now rather than
        // at issuance time
        self.registry.resolve(&request.provider, &request.authorization)?;
        Ok(())
    }

    pub async fn create_dns_account(&self, request: DnsAccountRequest) -> Result<DnsAccount> {
        let id = self.insert_dns_account(&request).await?;
        info!(provider = %request.provider, "DNS account created");
        self.get_dns_account(id)
            .await?
            .ok_or_else(|| SiteError::NotFound("Failed to retrieve created DNS account".to_string()))
    }

    async fn insert_dns_account(&self, request: &DnsAccountRequest) -> Result<i64> {
        self.check_provider(request)?;

        let result = sqlx::query(
            r#"
            INSERT INTO dns_accounts (name, provider, authorization, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(request.name.trim())
        .bind(&request.provider)
        .bind(request.authorization.to_json())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn update_dns_account(&self, id: i64, request: DnsAccountRequest) -> Result<DnsAccount> {
        self.check_provider(&request)?;

        let result = sqlx::query(
            "UPDATE dns_accounts SET name = ?, provider = ?, authorization = ? WHERE id = ?",
        )
        .bind(request.name.trim())
        .bind(&request.provider)
        .bind(request.authorization.to_json())
        .bind(id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SiteError::NotFound(format!("DNS account {}", id)));
        }

        self.get_dns_account(id)
            .await?
            .ok_or_else(|| SiteError::NotFound(format!("DNS account {}", id)))
    }

    pub async fn get_dns_account(&self, id: i64) -> Result<Option<DnsAccount>> {
        let row = sqlx::query("SELECT * FROM dns_accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(|r| self.row_to_dns_account(r)).transpose()
    }

    pub async fn list_dns_accounts(&self) -> Result<Vec<DnsAccount>> {
        let rows = sqlx::query("SELECT * FROM dns_accounts ORDER BY id")
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(|r| self.row_to_dns_account(r)).collect()
    }

    pub async fn delete_dns_account(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM dns_accounts WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SiteError::NotFound(format!("DNS account {}", id)));
        }
        Ok(())
    }

    /// Every CA and DNS account, secrets included
    pub async fn export(&self) -> Result<AccountExport> {
        let acme_accounts = self
            .list_accounts()
            .await?
            .into_iter()
            .map(|a| AcmeAccountExport {
                email: a.email,
                ca_type: a.ca_type,
                key_type: a.key_type,
                private_key: a.private_key,
                directory_url: a.directory_url,
                account_url: a.account_url,
                eab: a.eab,
            })
            .collect();
        let dns_accounts = self
            .list_dns_accounts()
            .await?
            .into_iter()
            .map(|d| DnsAccountExport {
                name: d.name,
                provider: d.provider,
                authorization: d.authorization,
            })
            .collect();

        Ok(AccountExport {
            acme_accounts,
            dns_accounts,
        })
    }

    /// Add every valid account from `data` as a new row. Invalid entries
    /// are logged and skipped.
    pub async fn import(&self, data: AccountExport) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();

        for account in &data.acme_accounts {
            match self.insert_account(account).await {
                Ok(_) => summary.imported += 1,
                Err(e) => {
                    warn!(email = %account.email, error = %e, "Skipping imported ACME account");
                    summary.skipped += 1;
                }
            }
        }
        for account in data.dns_accounts {
            let request = DnsAccountRequest {
                name: account.name,
                provider: account.provider,
                authorization: account.authorization,
            };
            match self.insert_dns_account(&request).await {
                Ok(_) => summary.imported += 1,
                Err(e) => {
                    warn!(name = %request.name, error = %e, "Skipping imported DNS account");
                    summary.skipped += 1;
                }
            }
        }

        info!(imported = summary.imported, skipped = summary.skipped, "Accounts imported");
        Ok(summary)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    fn row_to_account(&self, row: SqliteRow) -> Result<AcmeAccount> {
        let ca_type: String = row.try_get("ca_type")?;
        let key_type: String = row.try_get("key_type")?;
        let eab_kid: Option<String> = row.try_get("eab_kid")?;
        let eab_hmac_key: Option<String> = row.try_get("eab_hmac_key")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(AcmeAccount {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            ca_type: ca_type.parse()?,
            key_type: key_type.parse()?,
            private_key: row.try_get("private_key")?,
            directory_url: row.try_get("directory_url")?,
            account_url: row.try_get("account_url")?,
            eab: eab_kid
                .zip(eab_hmac_key)
                .map(|(kid, hmac_key)| ExternalAccountBinding { kid, hmac_key }),
            created_at: parse_timestamp(&created_at)?,
        })
    }

    fn row_to_dns_account(&self, row: SqliteRow) -> Result<DnsAccount> {
        let authorization: String = row.try_get("authorization")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(DnsAccount {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            provider: row.try_get("provider")?,
            authorization: Credentials::from_json(&authorization)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::client::testing::FakeBackend;

    async fn setup() -> (AccountManager, Arc<FakeBackend>) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let backend = Arc::new(FakeBackend::default());
        let manager = AccountManager::new(
            pool,
            Arc::new(backend.clone()),
            Arc::new(ProviderRegistry::with_builtin()),
        );
        manager.init_db().await.unwrap();
        (manager, backend)
    }

    fn request(email: &str, ca_type: CaType) -> RegisterAccountRequest {
        RegisterAccountRequest {
            email: email.to_string(),
            ca_type,
            key_type: KeyType::Ec256,
            directory_url: None,
            eab: None,
        }
    }

    #[tokio::test]
    async fn test_create_account_persists_key_and_url() {
        let (manager, _) = setup().await;

        let account = manager
            .create_account(request("ops@example.com", CaType::LetsEncrypt))
            .await
            .unwrap();
        assert_eq!(
            account.directory_url,
            "https://acme-v02.api.letsencrypt.org/directory"
        );
        assert_eq!(account.account_url, "https://acme-v02.api.letsencrypt.org/acct/1");
        assert!(account.private_key.contains("PRIVATE KEY"));

        let listed = manager.list_accounts().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].email, "ops@example.com");
    }

    #[tokio::test]
    async fn test_account_key_matches_requested_type() {
        let (manager, _) = setup().await;

        let mut rsa = request("ops@example.com", CaType::LetsEncrypt);
        rsa.key_type = KeyType::Rsa2048;
        let account = manager.create_account(rsa).await.unwrap();
        assert_eq!(account.key_type, KeyType::Rsa2048);
        assert_eq!(keys::key_type_of_pem(&account.private_key).unwrap(), KeyType::Rsa2048);

        let mut p384 = request("ops@example.com", CaType::LetsEncrypt);
        p384.key_type = KeyType::Ec384;
        let account = manager.create_account(p384).await.unwrap();
        let stored = manager.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.key_type, KeyType::Ec384);
        assert_eq!(keys::key_type_of_pem(&stored.private_key).unwrap(), KeyType::Ec384);
    }

    #[tokio::test]
    async fn test_unsupported_account_key_rejected() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let manager = AccountManager::new(
            pool,
            Arc::new(crate::acme::InstantAcmeBackend::new(std::env::temp_dir())),
            Arc::new(ProviderRegistry::with_builtin()),
        );
        manager.init_db().await.unwrap();

        let mut rsa = request("ops@example.com", CaType::LetsEncrypt);
        rsa.key_type = KeyType::Rsa4096;
        let result = manager.create_account(rsa).await;
        assert!(matches!(result, Err(SiteError::Validation(_))));
        assert!(manager.list_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_import_roundtrip() {
        let (source, _) = setup().await;
        let created = source
            .create_account(request("ops@example.com", CaType::LetsEncrypt))
            .await
            .unwrap();
        source
            .create_dns_account(DnsAccountRequest {
                name: "main".to_string(),
                provider: "NameSilo".to_string(),
                authorization: Credentials::new().with("apiKey", "ns-key"),
            })
            .await
            .unwrap();

        let json = serde_json::to_string(&source.export().await.unwrap()).unwrap();
        assert!(json.contains("acmeAccounts"));
        let data: AccountExport = serde_json::from_str(&json).unwrap();

        let (target, _) = setup().await;
        let summary = target.import(data).await.unwrap();
        assert_eq!(summary, ImportSummary { imported: 2, skipped: 0 });

        let accounts = target.list_accounts().await.unwrap();
        assert_eq!(accounts[0].private_key, created.private_key);
        assert_eq!(accounts[0].account_url, created.account_url);
        let dns = target.list_dns_accounts().await.unwrap();
        assert_eq!(dns[0].authorization.get("apiKey"), Some("ns-key"));
    }

    #[tokio::test]
    async fn test_import_skips_invalid_entries() {
        let (manager, _) = setup().await;
        let key = keys::generate_key(KeyType::Ec256).unwrap().pem;

        let data = AccountExport {
            acme_accounts: vec![
                AcmeAccountExport {
                    email: "ok@example.com".to_string(),
                    ca_type: CaType::LetsEncrypt,
                    key_type: KeyType::Ec256,
                    private_key: key.clone(),
                    directory_url: "https://acme-v02.api.letsencrypt.org/directory".to_string(),
                    account_url: "https://acme-v02.api.letsencrypt.org/acct/9".to_string(),
                    eab: None,
                },
                AcmeAccountExport {
                    email: "liar@example.com".to_string(),
                    ca_type: CaType::LetsEncrypt,
                    key_type: KeyType::Rsa4096,
                    private_key: key,
                    directory_url: "https://acme-v02.api.letsencrypt.org/directory".to_string(),
                    account_url: "https://acme-v02.api.letsencrypt.org/acct/10".to_string(),
                    eab: None,
                },
            ],
            dns_accounts: vec![DnsAccountExport {
                name: "r53".to_string(),
                provider: "Route53".to_string(),
                authorization: Credentials::new(),
            }],
        };

        let summary = manager.import(data).await.unwrap();
        assert_eq!(summary, ImportSummary { imported: 1, skipped: 2 });
        assert_eq!(manager.list_accounts().await.unwrap()[0].email, "ok@example.com");
        assert!(manager.list_dns_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_registration_persists_nothing() {
        let (manager, _) = setup().await;

        let result = manager
            .create_account(request("ops@rejected.test", CaType::Buypass))
            .await;
        assert!(matches!(result, Err(SiteError::Acme(AcmeError::Registration(_)))));
        assert!(manager.list_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_eab_required_for_zerossl() {
        let (manager, _) = setup().await;

        let result = manager
            .create_account(request("ops@example.com", CaType::ZeroSsl))
            .await;
        assert!(result.is_err());

        let mut with_eab = request("ops@example.com", CaType::ZeroSsl);
        with_eab.eab = Some(ExternalAccountBinding {
            kid: "kid-1".to_string(),
            hmac_key: "c2VjcmV0".to_string(),
        });
        let account = manager.create_account(with_eab).await.unwrap();
        assert_eq!(account.eab.unwrap().kid, "kid-1");
    }

    #[tokio::test]
    async fn test_custom_ca_needs_directory() {
        let (manager, _) = setup().await;

        let result = manager
            .register("ops@example.com", KeyType::Ec256, CaType::Custom, None, None)
            .await;
        assert!(matches!(result, Err(SiteError::Acme(AcmeError::Directory(_)))));

        let registered = manager
            .register(
                "ops@example.com",
                KeyType::Ec256,
                CaType::Custom,
                Some("https://ca.internal/directory"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(registered.account_url, "https://ca.internal/acct/1");
    }

    #[tokio::test]
    async fn test_dns_account_crud() {
        let (manager, _) = setup().await;

        let created = manager
            .create_dns_account(DnsAccountRequest {
                name: "main".to_string(),
                provider: "CloudFlare".to_string(),
                authorization: Credentials::new()
                    .with("email", "ops@example.com")
                    .with("apiKey", "cf-token"),
            })
            .await
            .unwrap();
        assert_eq!(created.authorization.get("apiKey"), Some("cf-token"));

        let updated = manager
            .update_dns_account(
                created.id,
                DnsAccountRequest {
                    name: "renamed".to_string(),
                    provider: "NameSilo".to_string(),
                    authorization: Credentials::new().with("apiKey", "ns-key"),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.provider, "NameSilo");

        manager.delete_dns_account(created.id).await.unwrap();
        assert!(manager.list_dns_accounts().await.unwrap().is_empty());
        assert!(matches!(
            manager.delete_dns_account(created.id).await,
            Err(SiteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dns_account_rejects_unknown_provider() {
        let (manager, _) = setup().await;

        let result = manager
            .create_dns_account(DnsAccountRequest {
                name: "x".to_string(),
                provider: "Route53".to_string(),
                authorization: Credentials::new(),
            })
            .await;
        assert!(matches!(result, Err(SiteError::Dns(_))));
    }
}
