//! sitecert-rs: certificate and nginx site manager
//!
//! ```bash
//! sitecert-rs --config /etc/sitecert-rs.toml account register --email ops@example.com
//! sitecert-rs cert create --domain example.com --san www.example.com --account 1 --apply
//! sitecert-rs site create --domain example.com
//! sitecert-rs site enable 1
//! sitecert-rs nginx status
//! sitecert-rs serve
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sitecert_rs::acme::{
    AccountExport, CaType, DnsAccountRequest, ExternalAccountBinding, KeyType,
    RegisterAccountRequest,
};
use sitecert_rs::app::nginx_runtime;
use sitecert_rs::certificate::{CreateCertificateRequest, ProviderMode, UploadCertificateRequest};
use sitecert_rs::dns::Credentials;
use sitecert_rs::site::{ConfigFiles, CreateWebsiteRequest, LogKind, NginxOperation, SiteType};
use sitecert_rs::{AppConfig, Services};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sitecert-rs")]
#[command(about = "ACME certificates and nginx sites", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the auto-renewal scheduler until interrupted
    Serve,
    /// ACME accounts
    #[command(subcommand)]
    Account(AccountCommand),
    /// DNS provider accounts
    #[command(subcommand)]
    DnsAccount(DnsAccountCommand),
    /// Certificates
    #[command(subcommand)]
    Cert(CertCommand),
    /// Websites
    #[command(subcommand)]
    Site(SiteCommand),
    /// nginx process control and config files
    #[command(subcommand)]
    Nginx(NginxCommand),
}

#[derive(Subcommand)]
enum NginxCommand {
    /// Install, process and config test state
    Status,
    /// Validate the configuration
    Test,
    Start,
    Stop,
    /// Graceful shutdown
    Quit,
    Reload,
    /// Reopen log files
    Reopen,
    /// Show or replace nginx.conf
    #[command(subcommand)]
    MainConf(MainConfCommand),
    /// Files under the conf directory
    #[command(subcommand)]
    Conf(ConfCommand),
}

#[derive(Subcommand)]
enum MainConfCommand {
    Show,
    /// Replace nginx.conf with the file's content, rolled back if nginx -t fails
    Save {
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfCommand {
    /// Files in the site include directory
    List,
    Show { name: String },
    /// Write a file under the conf directory, rolled back if nginx -t fails
    Save {
        /// Target path, absolute or relative to the conf directory
        #[arg(long)]
        path: String,
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Register an account with a CA
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "letsencrypt")]
        ca: CaType,
        #[arg(long, default_value = "P256")]
        key_type: KeyType,
        /// Directory URL for the custom CA type
        #[arg(long)]
        directory_url: Option<String>,
        #[arg(long, requires = "eab_hmac_key")]
        eab_kid: Option<String>,
        #[arg(long, requires = "eab_kid")]
        eab_hmac_key: Option<String>,
    },
    List,
    Delete { id: i64 },
    /// Write ACME and DNS accounts as JSON. The output holds private keys.
    Export {
        /// Destination file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Add accounts from an export, skipping invalid entries
    Import { file: PathBuf },
}

#[derive(Subcommand)]
enum DnsAccountCommand {
    /// Add a DNS account; credentials as field=value pairs
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        provider: String,
        #[arg(long = "credential", value_parser = parse_pair)]
        credentials: Vec<(String, String)>,
    },
    List,
    Delete { id: i64 },
    /// Supported providers and their credential fields
    Providers,
}

#[derive(Args)]
struct CreateCertArgs {
    #[arg(long)]
    domain: String,
    #[arg(long = "san")]
    sans: Vec<String>,
    #[arg(long, default_value = "http")]
    provider: ProviderMode,
    /// ACME account id
    #[arg(long)]
    account: i64,
    #[arg(long)]
    dns_account: Option<i64>,
    #[arg(long)]
    key_type: Option<KeyType>,
    #[arg(long)]
    no_auto_renew: bool,
    #[arg(long, default_value = "")]
    description: String,
    /// Issue right away and wait for the result
    #[arg(long)]
    apply: bool,
}

#[derive(Subcommand)]
enum CertCommand {
    Create(CreateCertArgs),
    /// Import a PEM certificate and private key
    Upload {
        #[arg(long)]
        cert: PathBuf,
        #[arg(long)]
        key: PathBuf,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Issue and wait for the result
    Apply { id: i64 },
    /// Renew and wait for the result
    Renew { id: i64 },
    /// Show the issuance log
    Log { id: i64 },
    List,
    Delete { id: i64 },
    /// Show or change the SSL base directory
    SslDir { path: Option<String> },
}

#[derive(Subcommand)]
enum SiteCommand {
    Create {
        #[arg(long)]
        domain: String,
        #[arg(long = "alias-domain")]
        domains: Vec<String>,
        #[arg(long = "type", default_value = "static")]
        site_type: SiteType,
        #[arg(long)]
        site_dir: Option<String>,
        #[arg(long, default_value = "")]
        proxy_pass: String,
        #[arg(long, default_value = "")]
        remark: String,
    },
    Enable { id: i64 },
    Disable { id: i64 },
    /// Print the generated nginx config
    Preview { id: i64 },
    /// Tail the access or error log
    Log {
        id: i64,
        #[arg(long, default_value = "access")]
        kind: LogKind,
        /// Number of lines, 200 when omitted
        #[arg(long)]
        tail: Option<usize>,
    },
    List,
    Delete { id: i64 },
}

fn parse_pair(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected field=value, got '{}'", value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sitecert_rs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let command = match cli.command {
        Commands::Nginx(command) => return nginx(&config, command).await,
        command => command,
    };

    let services = Services::connect(&config).await?;

    match command {
        Commands::Serve => {
            info!("Starting sitecert-rs v{}", env!("CARGO_PKG_VERSION"));
            let scheduler = services.renewal_scheduler(&config);
            if let Err(e) = scheduler.run_once().await {
                warn!("Initial renewal check failed: {}", e);
            }
            let handle = scheduler.start();
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            handle.abort();
        }
        Commands::Account(command) => account(&services, command).await?,
        Commands::DnsAccount(command) => dns_account(&services, command).await?,
        Commands::Cert(command) => cert(&services, command).await?,
        Commands::Site(command) => site(&services, command).await?,
        Commands::Nginx(_) => {}
    }

    Ok(())
}

async fn account(services: &Services, command: AccountCommand) -> anyhow::Result<()> {
    match command {
        AccountCommand::Register {
            email,
            ca,
            key_type,
            directory_url,
            eab_kid,
            eab_hmac_key,
        } => {
            let eab = match (eab_kid, eab_hmac_key) {
                (Some(kid), Some(hmac_key)) => Some(ExternalAccountBinding { kid, hmac_key }),
                _ => None,
            };
            let account = services
                .accounts
                .create_account(RegisterAccountRequest {
                    email,
                    ca_type: ca,
                    key_type,
                    directory_url,
                    eab,
                })
                .await?;
            println!("Registered account {} ({})", account.id, account.account_url);
        }
        AccountCommand::List => {
            println!("{:<6} {:<30} {:<12} {:<6}", "ID", "Email", "CA", "Key");
            for account in services.accounts.list_accounts().await? {
                println!(
                    "{:<6} {:<30} {:<12} {:<6}",
                    account.id, account.email, account.ca_type, account.key_type
                );
            }
        }
        AccountCommand::Delete { id } => {
            services.accounts.delete_account(id).await?;
            println!("Deleted account {}", id);
        }
        AccountCommand::Export { out } => {
            let export = services.accounts.export().await?;
            let json = serde_json::to_string_pretty(&export)?;
            match out {
                Some(path) => {
                    write_private(&path, &json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!(
                        "Exported {} ACME and {} DNS accounts to {}",
                        export.acme_accounts.len(),
                        export.dns_accounts.len(),
                        path.display()
                    );
                }
                None => println!("{}", json),
            }
        }
        AccountCommand::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let data: AccountExport = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", file.display()))?;
            let summary = services.accounts.import(data).await?;
            println!("Imported {}, skipped {}", summary.imported, summary.skipped);
        }
    }
    Ok(())
}

/// Write a file readable by the owner only
fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    std::io::Write::write_all(&mut file, content.as_bytes())
}

async fn nginx(config: &AppConfig, command: NginxCommand) -> anyhow::Result<()> {
    let runtime = nginx_runtime(config);
    let operation = match command {
        NginxCommand::Status => {
            let status = runtime.status().await?;
            println!("Install dir: {}", status.install_dir.display());
            println!("Installed:   {}", status.installed);
            println!("Version:     {}", status.version.as_deref().unwrap_or("-"));
            match status.pid {
                Some(pid) => println!("Running:     {} (pid {})", status.running, pid),
                None => println!("Running:     {}", status.running),
            }
            let config_ok = match status.config_ok {
                Some(true) => "ok",
                Some(false) => "failed",
                None => "-",
            };
            println!("Config test: {}", config_ok);
            return Ok(());
        }
        NginxCommand::MainConf(command) => {
            let files = ConfigFiles::new(Arc::new(runtime));
            match command {
                MainConfCommand::Show => print!("{}", files.main_conf()?),
                MainConfCommand::Save { file } => {
                    let content = std::fs::read_to_string(&file)
                        .with_context(|| format!("reading {}", file.display()))?;
                    files.save_main_conf(&content).await?;
                    println!("nginx.conf saved");
                }
            }
            return Ok(());
        }
        NginxCommand::Conf(command) => {
            let files = ConfigFiles::new(Arc::new(runtime));
            match command {
                ConfCommand::List => {
                    println!("{:<40} {:>10}", "Name", "Size");
                    for file in files.list()? {
                        println!("{:<40} {:>10}", file.name, file.size);
                    }
                }
                ConfCommand::Show { name } => print!("{}", files.read(&name)?),
                ConfCommand::Save { path, file } => {
                    let content = std::fs::read_to_string(&file)
                        .with_context(|| format!("reading {}", file.display()))?;
                    let saved = files.save(&path, &content).await?;
                    println!("Saved {}", saved.display());
                }
            }
            return Ok(());
        }
        NginxCommand::Test => NginxOperation::Test,
        NginxCommand::Start => NginxOperation::Start,
        NginxCommand::Stop => NginxOperation::Stop,
        NginxCommand::Quit => NginxOperation::Quit,
        NginxCommand::Reload => NginxOperation::Reload,
        NginxCommand::Reopen => NginxOperation::Reopen,
    };
    runtime.operate(operation).await?;
    println!("nginx {}: ok", operation);
    Ok(())
}

async fn dns_account(services: &Services, command: DnsAccountCommand) -> anyhow::Result<()> {
    match command {
        DnsAccountCommand::Add {
            name,
            provider,
            credentials,
        } => {
            let authorization = credentials
                .iter()
                .fold(Credentials::new(), |c, (k, v)| c.with(k, v));
            let account = services
                .accounts
                .create_dns_account(DnsAccountRequest {
                    name,
                    provider,
                    authorization,
                })
                .await?;
            println!("Added DNS account {}", account.id);
        }
        DnsAccountCommand::List => {
            println!("{:<6} {:<24} {:<12}", "ID", "Name", "Provider");
            for account in services.accounts.list_dns_accounts().await? {
                println!("{:<6} {:<24} {:<12}", account.id, account.name, account.provider);
            }
        }
        DnsAccountCommand::Delete { id } => {
            services.accounts.delete_dns_account(id).await?;
            println!("Deleted DNS account {}", id);
        }
        DnsAccountCommand::Providers => {
            for provider in services.accounts.registry().supported() {
                println!("{:<12} {:<20} {}", provider.tag, provider.label, provider.fields.join(", "));
            }
        }
    }
    Ok(())
}

async fn cert(services: &Services, command: CertCommand) -> anyhow::Result<()> {
    let certificates = &services.certificates;
    match command {
        CertCommand::Create(args) => {
            let cert = certificates
                .create(CreateCertificateRequest {
                    primary_domain: args.domain,
                    san_domains: args.sans,
                    provider: args.provider,
                    acme_account_id: args.account,
                    dns_account_id: args.dns_account,
                    key_type: args.key_type,
                    auto_renew: !args.no_auto_renew,
                    description: args.description,
                    apply: false,
                })
                .await?;
            println!("Created certificate {}", cert.id);
            if args.apply {
                let cert = certificates.apply_now(cert.id).await?;
                println!("Certificate {} is {}", cert.id, cert.status);
            }
        }
        CertCommand::Upload {
            cert,
            key,
            description,
        } => {
            let request = UploadCertificateRequest {
                certificate: std::fs::read_to_string(&cert)
                    .with_context(|| format!("reading {}", cert.display()))?,
                private_key: std::fs::read_to_string(&key)
                    .with_context(|| format!("reading {}", key.display()))?,
                description,
            };
            let cert = certificates.upload(request).await?;
            println!("Uploaded certificate {} for {}", cert.id, cert.primary_domain);
        }
        CertCommand::Apply { id } => {
            let cert = certificates.apply_now(id).await?;
            println!("Certificate {} is {}", cert.id, cert.status);
        }
        CertCommand::Renew { id } => {
            let cert = certificates.renew_now(id).await?;
            println!("Certificate {} is {}", cert.id, cert.status);
        }
        CertCommand::Log { id } => {
            print!("{}", certificates.get_log(id).await?);
        }
        CertCommand::List => {
            println!("{:<6} {:<30} {:<10} {:<10} {:<12}", "ID", "Domain", "Provider", "Status", "Expires");
            for cert in certificates.list().await? {
                let expires = cert
                    .expires_at
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<6} {:<30} {:<10} {:<10} {:<12}",
                    cert.id, cert.primary_domain, cert.provider, cert.status, expires
                );
            }
        }
        CertCommand::Delete { id } => {
            services.sites.delete_certificate(id).await?;
            println!("Deleted certificate {}", id);
        }
        CertCommand::SslDir { path } => {
            if let Some(path) = path {
                certificates.update_ssl_dir(&path).await?;
            }
            println!("{}", certificates.ssl_dir().await?.display());
        }
    }
    Ok(())
}

async fn site(services: &Services, command: SiteCommand) -> anyhow::Result<()> {
    let sites = &services.sites;
    match command {
        SiteCommand::Create {
            domain,
            domains,
            site_type,
            site_dir,
            proxy_pass,
            remark,
        } => {
            let site = sites
                .create(CreateWebsiteRequest {
                    primary_domain: domain,
                    domains,
                    site_type,
                    site_dir,
                    proxy_pass,
                    remark,
                })
                .await?;
            println!("Created website {} ({})", site.id, site.alias);
        }
        SiteCommand::Enable { id } => {
            sites.enable(id).await?;
            println!("Website {} is running", id);
        }
        SiteCommand::Disable { id } => {
            sites.disable(id).await?;
            println!("Website {} is stopped", id);
        }
        SiteCommand::Preview { id } => {
            print!("{}", sites.preview_config(id).await?);
        }
        SiteCommand::Log { id, kind, tail } => {
            println!("{}", sites.site_log(id, kind, tail).await?);
        }
        SiteCommand::List => {
            println!("{:<6} {:<30} {:<14} {:<8} {:<4}", "ID", "Domain", "Type", "Status", "SSL");
            for site in sites.list().await? {
                println!(
                    "{:<6} {:<30} {:<14} {:<8} {:<4}",
                    site.id,
                    site.primary_domain,
                    site.site_type,
                    site.status,
                    if site.ssl_enable { "on" } else { "off" }
                );
            }
        }
        SiteCommand::Delete { id } => {
            sites.delete(id).await?;
            println!("Deleted website {}", id);
        }
    }
    Ok(())
}
