//! Website persistence

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::types::{SiteStatus, Website};
use crate::acme::account::parse_timestamp;
use crate::certificate::types::split_domains;
use crate::error::{Result, SiteError};

#[derive(Clone)]
pub struct SiteStore {
    db: SqlitePool,
}

impl SiteStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS websites (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                primary_domain TEXT NOT NULL UNIQUE,
                domains TEXT NOT NULL DEFAULT '',
                alias TEXT NOT NULL UNIQUE,
                site_type TEXT NOT NULL DEFAULT 'static',
                status TEXT NOT NULL DEFAULT 'stopped',
                site_dir TEXT NOT NULL DEFAULT '',
                index_file TEXT NOT NULL DEFAULT 'index.html index.htm',
                proxy_pass TEXT NOT NULL DEFAULT '',
                web_socket BOOLEAN NOT NULL DEFAULT 0,
                ssl_enable BOOLEAN NOT NULL DEFAULT 0,
                certificate_id INTEGER,
                http_config TEXT NOT NULL DEFAULT 'HTTPSRedirect',
                hsts BOOLEAN NOT NULL DEFAULT 0,
                ssl_protocols TEXT NOT NULL DEFAULT 'TLSv1.2 TLSv1.3',
                basic_auth BOOLEAN NOT NULL DEFAULT 0,
                basic_user TEXT NOT NULL DEFAULT '',
                basic_password TEXT NOT NULL DEFAULT '',
                anti_leech BOOLEAN NOT NULL DEFAULT 0,
                leech_referers TEXT NOT NULL DEFAULT '',
                limit_rate TEXT NOT NULL DEFAULT '',
                limit_conn INTEGER NOT NULL DEFAULT 0,
                rewrite TEXT NOT NULL DEFAULT '',
                redirects TEXT NOT NULL DEFAULT '',
                access_log BOOLEAN NOT NULL DEFAULT 1,
                error_log BOOLEAN NOT NULL DEFAULT 1,
                custom_nginx TEXT NOT NULL DEFAULT '',
                default_server BOOLEAN NOT NULL DEFAULT 0,
                remark TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Insert `site`, ignoring its id and timestamps
    pub async fn insert(&self, site: &Website) -> Result<Website> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO websites (
                primary_domain, domains, alias, site_type, status, site_dir, index_file,
                proxy_pass, web_socket, ssl_enable, certificate_id, http_config, hsts,
                ssl_protocols, basic_auth, basic_user, basic_password, anti_leech,
                leech_referers, limit_rate, limit_conn, rewrite, redirects, access_log,
                error_log, custom_nginx, default_server, remark, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&site.primary_domain)
        .bind(site.domains.join(","))
        .bind(&site.alias)
        .bind(site.site_type.as_str())
        .bind(site.status.as_str())
        .bind(&site.site_dir)
        .bind(&site.index_file)
        .bind(&site.proxy_pass)
        .bind(site.web_socket)
        .bind(site.ssl_enable)
        .bind(site.certificate_id)
        .bind(site.http_config.as_str())
        .bind(site.hsts)
        .bind(&site.ssl_protocols)
        .bind(site.basic_auth)
        .bind(&site.basic_user)
        .bind(&site.basic_password)
        .bind(site.anti_leech)
        .bind(&site.leech_referers)
        .bind(&site.limit_rate)
        .bind(i64::from(site.limit_conn))
        .bind(&site.rewrite)
        .bind(&site.redirects)
        .bind(site.access_log)
        .bind(site.error_log)
        .bind(&site.custom_nginx)
        .bind(site.default_server)
        .bind(&site.remark)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;

        self.require(result.last_insert_rowid()).await
    }

    /// Persist every editable field of `site`
    pub async fn save(&self, site: &Website) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE websites SET
                primary_domain = ?, domains = ?, alias = ?, site_dir = ?, index_file = ?,
                proxy_pass = ?, web_socket = ?, ssl_enable = ?, certificate_id = ?,
                http_config = ?, hsts = ?, ssl_protocols = ?, basic_auth = ?, basic_user = ?,
                basic_password = ?, anti_leech = ?, leech_referers = ?, limit_rate = ?,
                limit_conn = ?, rewrite = ?, redirects = ?, access_log = ?, error_log = ?,
                custom_nginx = ?, default_server = ?, remark = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&site.primary_domain)
        .bind(site.domains.join(","))
        .bind(&site.alias)
        .bind(&site.site_dir)
        .bind(&site.index_file)
        .bind(&site.proxy_pass)
        .bind(site.web_socket)
        .bind(site.ssl_enable)
        .bind(site.certificate_id)
        .bind(site.http_config.as_str())
        .bind(site.hsts)
        .bind(&site.ssl_protocols)
        .bind(site.basic_auth)
        .bind(&site.basic_user)
        .bind(&site.basic_password)
        .bind(site.anti_leech)
        .bind(&site.leech_referers)
        .bind(&site.limit_rate)
        .bind(i64::from(site.limit_conn))
        .bind(&site.rewrite)
        .bind(&site.redirects)
        .bind(site.access_log)
        .bind(site.error_log)
        .bind(&site.custom_nginx)
        .bind(site.default_server)
        .bind(&site.remark)
        .bind(Utc::now().to_rfc3339())
        .bind(site.id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn set_status(&self, id: i64, status: SiteStatus) -> Result<()> {
        sqlx::query("UPDATE websites SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Website>> {
        let row = sqlx::query("SELECT * FROM websites WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(row_to_website).transpose()
    }

    pub async fn require(&self, id: i64) -> Result<Website> {
        self.get(id)
            .await?
            .ok_or_else(|| SiteError::NotFound(format!("website {}", id)))
    }

    pub async fn find_by_domain(&self, domain: &str) -> Result<Option<Website>> {
        let row = sqlx::query("SELECT * FROM websites WHERE primary_domain = ?")
            .bind(domain)
            .fetch_optional(&self.db)
            .await?;

        row.map(row_to_website).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Website>> {
        let rows = sqlx::query("SELECT * FROM websites ORDER BY id")
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(row_to_website).collect()
    }

    /// Sites that serve the given certificate
    pub async fn using_certificate(&self, certificate_id: i64) -> Result<Vec<Website>> {
        let rows = sqlx::query(
            "SELECT * FROM websites WHERE ssl_enable = 1 AND certificate_id = ? ORDER BY id",
        )
        .bind(certificate_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(row_to_website).collect()
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM websites WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

fn row_to_website(row: SqliteRow) -> Result<Website> {
    let domains: String = row.try_get("domains")?;
    let site_type: String = row.try_get("site_type")?;
    let status: String = row.try_get("status")?;
    let http_config: String = row.try_get("http_config")?;
    let limit_conn: i64 = row.try_get("limit_conn")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Website {
        id: row.try_get("id")?,
        primary_domain: row.try_get("primary_domain")?,
        domains: split_domains(&domains),
        alias: row.try_get("alias")?,
        site_type: site_type.parse()?,
        status: status.parse()?,
        site_dir: row.try_get("site_dir")?,
        index_file: row.try_get("index_file")?,
        proxy_pass: row.try_get("proxy_pass")?,
        web_socket: row.try_get("web_socket")?,
        ssl_enable: row.try_get("ssl_enable")?,
        certificate_id: row.try_get("certificate_id")?,
        http_config: http_config.parse()?,
        hsts: row.try_get("hsts")?,
        ssl_protocols: row.try_get("ssl_protocols")?,
        basic_auth: row.try_get("basic_auth")?,
        basic_user: row.try_get("basic_user")?,
        basic_password: row.try_get("basic_password")?,
        anti_leech: row.try_get("anti_leech")?,
        leech_referers: row.try_get("leech_referers")?,
        limit_rate: row.try_get("limit_rate")?,
        limit_conn: u32::try_from(limit_conn).unwrap_or(0),
        rewrite: row.try_get("rewrite")?,
        redirects: row.try_get("redirects")?,
        access_log: row.try_get("access_log")?,
        error_log: row.try_get("error_log")?,
        custom_nginx: row.try_get("custom_nginx")?,
        default_server: row.try_get("default_server")?,
        remark: row.try_get("remark")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
