//! nginx install layout and process control

use async_trait::async_trait;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Result, SiteError};
use crate::exec;

/// Directive that pulls per-site configs into `nginx.conf`
const SITE_INCLUDE: &str = "include conf.d/*.conf;";

/// Paths under an nginx install prefix
#[derive(Debug, Clone)]
pub struct NginxLayout {
    install_dir: PathBuf,
}

impl NginxLayout {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
        }
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn binary(&self) -> PathBuf {
        self.install_dir.join("sbin").join("nginx")
    }

    pub fn conf_dir(&self) -> PathBuf {
        self.install_dir.join("conf")
    }

    pub fn main_conf(&self) -> PathBuf {
        self.conf_dir().join("nginx.conf")
    }

    pub fn sites_dir(&self) -> PathBuf {
        self.conf_dir().join("conf.d")
    }

    pub fn auth_dir(&self) -> PathBuf {
        self.conf_dir().join("auth")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.install_dir.join("logs")
    }

    pub fn site_log_dir(&self) -> PathBuf {
        self.log_dir().join("sites")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.log_dir().join("nginx.pid")
    }

    pub fn site_config(&self, alias: &str) -> PathBuf {
        self.sites_dir().join(format!("{}.conf", alias))
    }

    pub fn is_installed(&self) -> bool {
        self.binary().is_file()
    }

    /// Add the per-site include to `nginx.conf` if missing
    pub fn ensure_include(&self) -> Result<()> {
        let path = self.main_conf();
        let content = fs::read_to_string(&path)?;
        if let Some(updated) = insert_include(&content)? {
            fs::write(&path, updated)?;
            info!(path = %path.display(), "Added site include to nginx.conf");
        }
        Ok(())
    }
}

/// Insert [`SITE_INCLUDE`] before the closing brace of the `http` block.
/// Returns `None` when the include is already present.
pub fn insert_include(content: &str) -> Result<Option<String>> {
    if content.contains(SITE_INCLUDE) || content.contains("include conf/conf.d/*.conf;") {
        return Ok(None);
    }

    let start = content
        .find("http {")
        .or_else(|| content.find("http{"))
        .ok_or_else(|| SiteError::Config("nginx.conf has no http block".to_string()))?;

    let mut depth = 0usize;
    let mut close = None;
    for (i, c) in content[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    close = Some(start + i);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close
        .ok_or_else(|| SiteError::Config("nginx.conf http block is not closed".to_string()))?;

    Ok(Some(format!(
        "{}\n    {}\n{}",
        &content[..close],
        SITE_INCLUDE,
        &content[close..]
    )))
}

/// Result of `nginx -t`
#[derive(Debug, Clone)]
pub struct ConfigTest {
    pub success: bool,
    pub output: String,
}

/// Operations on the nginx master process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NginxOperation {
    Test,
    Start,
    Stop,
    Quit,
    Reload,
    Reopen,
}

str_enum!(NginxOperation {
    NginxOperation::Test => "test",
    NginxOperation::Start => "start",
    NginxOperation::Stop => "stop",
    NginxOperation::Quit => "quit",
    NginxOperation::Reload => "reload",
    NginxOperation::Reopen => "reopen",
});

/// Snapshot of the local nginx install
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NginxStatus {
    pub installed: bool,
    pub running: bool,
    pub pid: Option<u32>,
    /// e.g. `1.26.2`
    pub version: Option<String>,
    pub install_dir: PathBuf,
    /// Outcome of `nginx -t`; unknown when not installed
    pub config_ok: Option<bool>,
}

/// Version out of `nginx -v` output such as `nginx version: nginx/1.26.2`
pub fn parse_version(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.split_once("nginx/"))
        .map(|(_, rest)| rest.split_whitespace().next().unwrap_or("").to_string())
        .filter(|v| !v.is_empty())
}

/// What the site activator needs from the web server
#[async_trait]
pub trait ServerControl: Send + Sync {
    fn layout(&self) -> &NginxLayout;

    /// Validate the full configuration
    async fn test_config(&self) -> Result<ConfigTest>;

    /// Reload when a master process is running, otherwise do nothing
    async fn reload_if_running(&self) -> Result<()>;
}

/// Controls a local nginx through its binary
#[derive(Debug, Clone)]
pub struct NginxRuntime {
    layout: NginxLayout,
    timeout: Duration,
}

impl NginxRuntime {
    pub fn new(layout: NginxLayout, timeout: Duration) -> Self {
        Self { layout, timeout }
    }

    /// PID from the PID file and whether that process is alive
    pub fn read_pid(&self) -> Option<(u32, bool)> {
        let text = fs::read_to_string(self.layout.pid_path()).ok()?;
        let pid: u32 = text.trim().parse().ok().filter(|p| *p > 0)?;
        Some((pid, process_alive(pid)))
    }

    pub fn is_running(&self) -> bool {
        matches!(self.read_pid(), Some((_, true)))
    }

    async fn nginx(&self, extra: &[&str]) -> Result<exec::CommandOutput> {
        let prefix = self.layout.install_dir().to_string_lossy().into_owned();
        let mut args = vec!["-p", prefix.as_str()];
        args.extend_from_slice(extra);
        exec::run(&self.layout.binary(), &args, self.timeout).await
    }

    fn require_installed(&self) -> Result<()> {
        if self.layout.is_installed() {
            Ok(())
        } else {
            Err(SiteError::External(format!(
                "nginx is not installed at {}",
                self.layout.install_dir().display()
            )))
        }
    }

    async fn signal(&self, signal: &str) -> Result<()> {
        if !self.is_running() {
            return Err(SiteError::Conflict("nginx is not running".to_string()));
        }
        let output = self.nginx(&["-s", signal]).await?;
        if !output.success {
            return Err(SiteError::External(format!(
                "signal {} failed: {}",
                signal,
                output.message()
            )));
        }
        info!(signal, "nginx signal sent");
        Ok(())
    }

    async fn require_valid_config(&self) -> Result<()> {
        let test = self.test_config().await?;
        if test.success {
            Ok(())
        } else {
            Err(SiteError::Validation(format!(
                "nginx config test failed: {}",
                test.output
            )))
        }
    }

    pub async fn status(&self) -> Result<NginxStatus> {
        let mut status = NginxStatus {
            installed: self.layout.is_installed(),
            running: false,
            pid: None,
            version: None,
            install_dir: self.layout.install_dir().to_path_buf(),
            config_ok: None,
        };
        if !status.installed {
            return Ok(status);
        }

        // `nginx -v` prints to stderr
        match self.nginx(&["-v"]).await {
            Ok(output) => {
                status.version =
                    parse_version(&output.stderr).or_else(|| parse_version(&output.stdout));
            }
            Err(e) => warn!(error = %e, "Could not read nginx version"),
        }

        if let Some((pid, alive)) = self.read_pid() {
            status.running = alive;
            status.pid = alive.then_some(pid);
        }

        status.config_ok = match self.test_config().await {
            Ok(test) => Some(test.success),
            Err(e) => {
                warn!(error = %e, "nginx config test did not run");
                None
            }
        };
        Ok(status)
    }

    pub async fn operate(&self, operation: NginxOperation) -> Result<()> {
        self.require_installed()?;
        match operation {
            NginxOperation::Test => self.require_valid_config().await,
            NginxOperation::Start => {
                if self.is_running() {
                    return Err(SiteError::Conflict("nginx is already running".to_string()));
                }
                self.require_valid_config().await?;
                let output = self.nginx(&[]).await?;
                if !output.success {
                    return Err(SiteError::External(format!(
                        "start failed: {}",
                        output.message()
                    )));
                }
                info!("nginx started");
                Ok(())
            }
            NginxOperation::Reload => {
                if !self.is_running() {
                    return Err(SiteError::Conflict("nginx is not running".to_string()));
                }
                self.require_valid_config().await?;
                self.signal("reload").await
            }
            NginxOperation::Stop => self.signal("stop").await,
            NginxOperation::Quit => self.signal("quit").await,
            NginxOperation::Reopen => self.signal("reopen").await,
        }
    }
}

#[async_trait]
impl ServerControl for NginxRuntime {
    fn layout(&self) -> &NginxLayout {
        &self.layout
    }

    async fn test_config(&self) -> Result<ConfigTest> {
        self.require_installed()?;
        let output = self.nginx(&["-t"]).await?;
        debug!(success = output.success, "nginx config test finished");
        Ok(ConfigTest {
            success: output.success,
            output: output.message(),
        })
    }

    async fn reload_if_running(&self) -> Result<()> {
        if !self.layout.is_installed() || !self.layout.pid_path().exists() {
            return Ok(());
        }
        let output = self.nginx(&["-s", "reload"]).await?;
        if !output.success {
            return Err(SiteError::External(format!(
                "reload failed: {}",
                output.message()
            )));
        }
        info!("nginx reloaded");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}
