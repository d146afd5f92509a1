//! nginx server block generation
//!
//! Output depends only on the site, the certificate paths and the two
//! directories held by [`ConfigGenerator`].

use std::fmt::Write;
use std::path::{Path, PathBuf};

use super::types::{
    parse_redirects, HttpMode, LogKind, SiteType, Website, DEFAULT_INDEX_FILES,
    DEFAULT_SSL_PROTOCOLS,
};
use crate::certificate::CertificatePaths;

const SSL_CIPHERS: &str = "ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:\
ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:\
ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305";

#[derive(Debug, Clone)]
pub struct ConfigGenerator {
    /// Per-site access and error logs
    log_dir: PathBuf,
    /// `{alias}.htpasswd` files
    auth_dir: PathBuf,
}

impl ConfigGenerator {
    pub fn new(log_dir: impl Into<PathBuf>, auth_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            auth_dir: auth_dir.into(),
        }
    }

    pub fn htpasswd_path(&self, alias: &str) -> PathBuf {
        self.auth_dir.join(format!("{}.htpasswd", alias))
    }

    pub fn log_path(&self, domain: &str, kind: LogKind) -> PathBuf {
        log_file(&self.log_dir, domain, kind)
    }

    /// Render the server blocks for `site`. HTTPS is only emitted when the
    /// site has SSL enabled and certificate paths are given.
    pub fn generate(&self, site: &Website, cert: Option<&CertificatePaths>) -> String {
        let mut out = String::new();
        let server_name = site.server_names().join(" ");

        let tls = if site.ssl_enable { cert } else { None };
        let mode = site.http_config;

        let redirect_http = tls.is_some() && mode == HttpMode::HttpsRedirect;
        let serve_http = tls.is_none() || matches!(mode, HttpMode::HttpOnly | HttpMode::HttpAlso);
        let serve_https = tls.is_some() && mode != HttpMode::HttpOnly;

        if redirect_http {
            out.push_str("server {\n");
            write_listen(&mut out, "80", site.default_server);
            let _ = writeln!(out, "    server_name {};", server_name);
            out.push_str("    return 301 https://$host$request_uri;\n");
            out.push_str("}\n\n");
        }

        if serve_http {
            out.push_str("server {\n");
            write_listen(&mut out, "80", site.default_server);
            let _ = writeln!(out, "    server_name {};", server_name);
            out.push('\n');
            self.write_body(&mut out, site);
            out.push_str("}\n");
            if serve_https {
                out.push('\n');
            }
        }

        if let (true, Some(paths)) = (serve_https, tls) {
            out.push_str("server {\n");
            write_listen(&mut out, "443 ssl", site.default_server);
            let _ = writeln!(out, "    server_name {};", server_name);
            out.push('\n');
            write_tls(&mut out, site, paths);
            self.write_body(&mut out, site);
            out.push_str("}\n");
        }

        out
    }

    fn write_body(&self, out: &mut String, site: &Website) {
        let domain = &site.primary_domain;
        if site.access_log {
            let path = self.log_path(domain, LogKind::Access);
            let _ = writeln!(out, "    access_log {};", path.display());
        } else {
            out.push_str("    access_log off;\n");
        }
        if site.error_log {
            let path = self.log_path(domain, LogKind::Error);
            let _ = writeln!(out, "    error_log {};", path.display());
        } else {
            out.push_str("    error_log /dev/null;\n");
        }
        out.push('\n');

        if site.basic_auth && !site.basic_user.is_empty() {
            out.push_str("    auth_basic \"Restricted\";\n");
            let _ = writeln!(
                out,
                "    auth_basic_user_file {};",
                self.htpasswd_path(&site.alias).display()
            );
            out.push('\n');
        }

        if site.anti_leech {
            let mut referers = String::from("none blocked server_names");
            for referer in site.leech_referers.split(',').map(str::trim) {
                if !referer.is_empty() {
                    referers.push(' ');
                    referers.push_str(referer);
                }
            }
            let _ = writeln!(out, "    valid_referers {};", referers);
            out.push_str("    if ($invalid_referer) {\n");
            out.push_str("        return 403;\n");
            out.push_str("    }\n\n");
        }

        let limit_rate = site.limit_rate.trim();
        if !limit_rate.is_empty() {
            let _ = writeln!(out, "    limit_rate {};", limit_rate);
        }
        if site.limit_conn > 0 {
            let _ = writeln!(out, "    limit_conn perip {};", site.limit_conn);
        }
        if !limit_rate.is_empty() || site.limit_conn > 0 {
            out.push('\n');
        }

        // Rules that fail to parse were rejected on save; render nothing for them
        let rules: Vec<_> = parse_redirects(&site.redirects)
            .unwrap_or_default()
            .into_iter()
            .filter(|r| !r.source.is_empty() && !r.target.is_empty())
            .collect();
        if !rules.is_empty() {
            out.push_str("    # Redirects\n");
            for rule in &rules {
                let _ = writeln!(out, "    location = {} {{", rule.source);
                let _ = writeln!(out, "        return {} {};", rule.status_code(), rule.target);
                out.push_str("    }\n");
            }
            out.push('\n');
        }

        match site.site_type {
            SiteType::Static => write_static(out, site),
            SiteType::ReverseProxy => write_proxy(out, site),
        }

        let rewrites: Vec<&str> = site
            .rewrite
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if !rewrites.is_empty() {
            out.push_str("    # Rewrite rules\n");
            for line in rewrites {
                let _ = writeln!(out, "    {}", line);
            }
            out.push('\n');
        }

        if !site.custom_nginx.is_empty() {
            out.push_str("    # Custom directives\n");
            for line in site.custom_nginx.lines().filter(|l| !l.is_empty()) {
                let _ = writeln!(out, "    {}", line);
            }
            out.push('\n');
        }
    }
}

fn log_file(dir: &Path, domain: &str, kind: LogKind) -> PathBuf {
    dir.join(format!("{}.{}.log", domain, kind))
}

fn write_listen(out: &mut String, port: &str, default_server: bool) {
    let suffix = if default_server { " default_server" } else { "" };
    let _ = writeln!(out, "    listen {}{};", port, suffix);
    let _ = writeln!(out, "    listen [::]:{}{};", port, suffix);
}

fn write_tls(out: &mut String, site: &Website, paths: &CertificatePaths) {
    let _ = writeln!(out, "    ssl_certificate {};", paths.cert_path.display());
    let _ = writeln!(out, "    ssl_certificate_key {};", paths.key_path.display());
    let protocols = match site.ssl_protocols.trim() {
        "" => DEFAULT_SSL_PROTOCOLS,
        p => p,
    };
    let _ = writeln!(out, "    ssl_protocols {};", protocols);
    let _ = writeln!(out, "    ssl_ciphers {};", SSL_CIPHERS);
    out.push_str("    ssl_prefer_server_ciphers on;\n");
    out.push_str("    ssl_session_cache shared:SSL:10m;\n");
    out.push_str("    ssl_session_timeout 10m;\n");
    if site.hsts {
        out.push_str(
            "    add_header Strict-Transport-Security \"max-age=31536000; includeSubDomains\" always;\n",
        );
    }
    out.push('\n');
}

fn write_static(out: &mut String, site: &Website) {
    let root = if site.site_dir.trim().is_empty() {
        format!("/var/www/{}", site.primary_domain)
    } else {
        site.site_dir.clone()
    };
    let index = match site.index_file.trim() {
        "" => DEFAULT_INDEX_FILES,
        i => i,
    };
    let _ = writeln!(out, "    root {};", root);
    let _ = writeln!(out, "    index {};", index);
    out.push('\n');
    out.push_str("    location / {\n");
    out.push_str("        try_files $uri $uri/ =404;\n");
    out.push_str("    }\n\n");
}

fn write_proxy(out: &mut String, site: &Website) {
    let target = site.proxy_pass.trim();
    if target.is_empty() {
        return;
    }
    out.push_str("    location / {\n");
    let _ = writeln!(out, "        proxy_pass {};", target);
    out.push_str("        proxy_set_header Host $host;\n");
    out.push_str("        proxy_set_header X-Real-IP $remote_addr;\n");
    out.push_str("        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n");
    out.push_str("        proxy_set_header X-Forwarded-Proto $scheme;\n");
    out.push_str("        proxy_http_version 1.1;\n");
    if site.web_socket {
        out.push_str("        proxy_set_header Upgrade $http_upgrade;\n");
        out.push_str("        proxy_set_header Connection \"upgrade\";\n");
        out.push_str("        proxy_read_timeout 86400s;\n");
        out.push_str("        proxy_send_timeout 86400s;\n");
    }
    out.push_str("    }\n\n");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::site::types::SiteStatus;
    use chrono::Utc;

    pub(crate) fn site(domain: &str, site_type: SiteType) -> Website {
        Website {
            id: 1,
            primary_domain: domain.to_string(),
            domains: Vec::new(),
            alias: crate::site::types::domain_to_alias(domain),
            site_type,
            status: SiteStatus::Stopped,
            site_dir: String::new(),
            index_file: DEFAULT_INDEX_FILES.to_string(),
            proxy_pass: String::new(),
            web_socket: false,
            ssl_enable: false,
            certificate_id: None,
            http_config: HttpMode::HttpsRedirect,
            hsts: false,
            ssl_protocols: DEFAULT_SSL_PROTOCOLS.to_string(),
            basic_auth: false,
            basic_user: String::new(),
            basic_password: String::new(),
            anti_leech: false,
            leech_referers: String::new(),
            limit_rate: String::new(),
            limit_conn: 0,
            rewrite: String::new(),
            redirects: String::new(),
            access_log: true,
            error_log: true,
            custom_nginx: String::new(),
            default_server: false,
            remark: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn generator() -> ConfigGenerator {
        ConfigGenerator::new("/usr/local/nginx/logs/sites", "/usr/local/nginx/conf/auth")
    }

    fn paths() -> CertificatePaths {
        CertificatePaths::for_domain(Path::new("/srv/ssl"), "example.com")
    }

    fn ssl_site(mode: HttpMode) -> Website {
        let mut site = site("example.com", SiteType::Static);
        site.ssl_enable = true;
        site.certificate_id = Some(3);
        site.http_config = mode;
        site
    }

    #[test]
    fn test_static_site_without_ssl() {
        let mut site = site("example.com", SiteType::Static);
        site.domains = vec![
            "www.example.com".to_string(),
            "example.com".to_string(),
            "www.example.com".to_string(),
        ];
        let text = generator().generate(&site, None);
        let expected = "\
server {
    listen 80;
    listen [::]:80;
    server_name example.com www.example.com;

    access_log /usr/local/nginx/logs/sites/example.com.access.log;
    error_log /usr/local/nginx/logs/sites/example.com.error.log;

    root /var/www/example.com;
    index index.html index.htm;

    location / {
        try_files $uri $uri/ =404;
    }

}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_ssl_disabled_never_listens_on_443() {
        let mut site = ssl_site(HttpMode::HttpsOnly);
        site.ssl_enable = false;
        let text = generator().generate(&site, Some(&paths()));
        assert!(!text.contains("listen 443"));
        assert!(!text.contains("ssl_certificate"));
        assert_eq!(text.matches("server {").count(), 1);
    }

    #[test]
    fn test_https_redirect_blocks() {
        let text = generator().generate(&ssl_site(HttpMode::HttpsRedirect), Some(&paths()));
        assert_eq!(text.matches("server {").count(), 2);
        assert_eq!(text.matches("return 301 https://$host$request_uri;").count(), 1);
        assert_eq!(text.matches("ssl_certificate ").count(), 1);
        assert!(text.contains("ssl_certificate /srv/ssl/certs/example.com/fullchain.pem;"));
        assert!(text.contains("ssl_certificate_key /srv/ssl/certs/example.com/privkey.pem;"));
        assert!(text.contains("ssl_protocols TLSv1.2 TLSv1.3;"));
        assert!(!text.contains("Strict-Transport-Security"));
        // the redirect block does not serve content
        let redirect_block = text.split("}\n\n").next().unwrap();
        assert!(!redirect_block.contains("root "));
    }

    #[test]
    fn test_block_selection_by_mode() {
        let gen = generator();
        let cases = [
            (HttpMode::HttpOnly, 1, false),
            (HttpMode::HttpsOnly, 1, true),
            (HttpMode::HttpAlso, 2, true),
        ];
        for (mode, blocks, has_tls) in cases {
            let text = gen.generate(&ssl_site(mode), Some(&paths()));
            assert_eq!(text.matches("server {").count(), blocks, "{:?}", mode);
            assert_eq!(text.contains("listen 443 ssl;"), has_tls, "{:?}", mode);
            assert_eq!(text.matches("root /var/www/example.com;").count(), blocks, "{:?}", mode);
            assert!(!text.contains("return 301 https"), "{:?}", mode);
        }
    }

    #[test]
    fn test_hsts_protocols_and_default_server() {
        let mut site = ssl_site(HttpMode::HttpAlso);
        site.hsts = true;
        site.ssl_protocols = "TLSv1.3".to_string();
        site.default_server = true;
        let text = generator().generate(&site, Some(&paths()));
        assert!(text.contains(
            "add_header Strict-Transport-Security \"max-age=31536000; includeSubDomains\" always;"
        ));
        assert!(text.contains("ssl_protocols TLSv1.3;"));
        assert!(text.contains("listen 80 default_server;"));
        assert!(text.contains("listen [::]:443 ssl default_server;"));
    }

    #[test]
    fn test_reverse_proxy_with_websocket() {
        let mut site = site("a.example.com", SiteType::ReverseProxy);
        site.proxy_pass = "http://127.0.0.1:8080".to_string();
        site.web_socket = true;
        let text = generator().generate(&site, None);

        assert_eq!(text.matches("server {").count(), 1);
        assert!(text.contains("    listen 80;\n"));
        assert!(text.contains("    location / {\n        proxy_pass http://127.0.0.1:8080;\n"));
        for header in [
            "proxy_http_version 1.1;",
            "proxy_set_header Upgrade $http_upgrade;",
            "proxy_set_header Connection \"upgrade\";",
            "proxy_read_timeout 86400s;",
            "proxy_send_timeout 86400s;",
        ] {
            assert_eq!(text.matches(header).count(), 1, "{}", header);
        }
    }

    #[test]
    fn test_redirect_rule_before_site_block() {
        let mut site = site("example.com", SiteType::Static);
        site.redirects =
            r#"[{"source":"/old","target":"https://new.example.com","type":301}]"#.to_string();
        let text = generator().generate(&site, None);

        assert_eq!(text.matches("location = /old {").count(), 1);
        assert!(text.contains("    location = /old {\n        return 301 https://new.example.com;\n    }\n"));
        let redirect_at = text.find("location = /old").unwrap();
        let site_at = text.find("root /var/www/example.com;").unwrap();
        assert!(redirect_at < site_at);
    }

    #[test]
    fn test_body_ordering() {
        let mut site = site("example.com", SiteType::Static);
        site.basic_auth = true;
        site.basic_user = "admin".to_string();
        site.anti_leech = true;
        site.leech_referers = "a.example.org, b.example.org".to_string();
        site.limit_rate = "512k".to_string();
        site.limit_conn = 10;
        site.redirects = r#"[{"source":"/a","target":"/b","type":0}]"#.to_string();
        site.rewrite = "rewrite ^/x$ /y last;\n\n".to_string();
        site.custom_nginx = "client_max_body_size 10m;".to_string();
        site.access_log = false;
        site.error_log = false;
        let text = generator().generate(&site, None);

        let order = [
            "access_log off;",
            "error_log /dev/null;",
            "auth_basic_user_file /usr/local/nginx/conf/auth/example_com.htpasswd;",
            "valid_referers none blocked server_names a.example.org b.example.org;",
            "limit_rate 512k;",
            "limit_conn perip 10;",
            "return 301 /b;",
            "root /var/www/example.com;",
            "rewrite ^/x$ /y last;",
            "client_max_body_size 10m;",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|needle| text.find(needle).unwrap_or_else(|| panic!("missing {}", needle)))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", text);
    }

    #[test]
    fn test_generate_is_deterministic() {
        let mut site = ssl_site(HttpMode::HttpsRedirect);
        site.redirects = r#"[{"source":"/a","target":"/b","type":302}]"#.to_string();
        let gen = generator();
        assert_eq!(
            gen.generate(&site, Some(&paths())),
            gen.generate(&site, Some(&paths()))
        );
    }

    #[test]
    fn test_invalid_redirects_render_nothing() {
        let mut site = site("example.com", SiteType::Static);
        site.redirects = "not json".to_string();
        assert!(!generator().generate(&site, None).contains("Redirects"));
    }
}
