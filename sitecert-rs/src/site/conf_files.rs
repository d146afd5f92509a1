//! Hand edits to `nginx.conf` and the files under the conf directory
//!
//! Saves go through the same write, `nginx -t`, reload cycle as generated
//! site configs, and roll back when the test fails.

use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::nginx::ServerControl;
use crate::error::{Result, SiteError};

/// One entry of the site include directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfFileInfo {
    pub name: String,
    pub size: u64,
}

pub struct ConfigFiles {
    server: Arc<dyn ServerControl>,
}

impl ConfigFiles {
    pub fn new(server: Arc<dyn ServerControl>) -> Self {
        Self { server }
    }

    fn require_installed(&self) -> Result<()> {
        let layout = self.server.layout();
        if layout.is_installed() {
            Ok(())
        } else {
            Err(SiteError::External(format!(
                "nginx is not installed at {}",
                layout.install_dir().display()
            )))
        }
    }

    pub fn main_conf(&self) -> Result<String> {
        self.require_installed()?;
        Ok(fs::read_to_string(self.server.layout().main_conf())?)
    }

    pub async fn save_main_conf(&self, content: &str) -> Result<()> {
        self.require_installed()?;
        let path = self.server.layout().main_conf();
        self.write_tested(&path, content).await
    }

    /// Regular files in the site include directory, sorted by name
    pub fn list(&self) -> Result<Vec<ConfFileInfo>> {
        self.require_installed()?;
        let entries = match fs::read_dir(self.server.layout().sites_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            files.push(ConfFileInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Content of a file in the site include directory. Only the final
    /// component of `name` is used.
    pub fn read(&self, name: &str) -> Result<String> {
        self.require_installed()?;
        let base = Path::new(name)
            .file_name()
            .ok_or_else(|| SiteError::Validation(format!("invalid file name '{}'", name)))?;
        let path = self.server.layout().sites_dir().join(base);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SiteError::NotFound(format!("config file {}", base.to_string_lossy())))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write any file under the conf directory. Relative paths are taken
    /// from the conf directory.
    pub async fn save(&self, path: &str, content: &str) -> Result<PathBuf> {
        self.require_installed()?;
        let target = contained_path(&self.server.layout().conf_dir(), Path::new(path))?;
        self.write_tested(&target, content).await?;
        Ok(target)
    }

    async fn write_tested(&self, path: &Path, content: &str) -> Result<()> {
        let backup = match fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, content)?;

        let test = match self.server.test_config().await {
            Ok(test) => test,
            Err(e) => {
                roll_back(path, backup.as_deref());
                return Err(e);
            }
        };
        if !test.success {
            roll_back(path, backup.as_deref());
            warn!(path = %path.display(), "nginx rejected edited config, rolled back");
            return Err(SiteError::Validation(format!(
                "nginx config test failed: {}",
                test.output
            )));
        }

        info!(path = %path.display(), "nginx config file saved");
        self.server.reload_if_running().await
    }
}

/// `path` resolved against `root`, refused unless it stays inside it.
/// `..` components are rejected outright and the deepest existing ancestor
/// is resolved so a symlinked directory cannot lead outside.
fn contained_path(root: &Path, path: &Path) -> Result<PathBuf> {
    let outside = || SiteError::Validation(format!("{} is outside {}", path.display(), root.display()));

    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(outside());
    }
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    if !joined.starts_with(root) || joined == root {
        return Err(outside());
    }

    if let Ok(real_root) = root.canonicalize() {
        let existing = joined
            .ancestors()
            .skip(1)
            .find(|p| p.exists())
            .unwrap_or(root);
        if !existing.canonicalize()?.starts_with(&real_root) {
            return Err(outside());
        }
    }
    Ok(joined)
}

fn roll_back(path: &Path, backup: Option<&[u8]>) {
    let result = match backup {
        Some(bytes) => fs::write(path, bytes),
        None => fs::remove_file(path),
    };
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to roll back config file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::nginx::tests::FakeServerControl;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn files() -> (ConfigFiles, Arc<FakeServerControl>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let server = Arc::new(FakeServerControl::installed(dir.path()));
        (ConfigFiles::new(server.clone()), server, dir)
    }

    #[test]
    fn test_contained_path() {
        let root = Path::new("/usr/local/nginx/conf");
        assert_eq!(
            contained_path(root, Path::new("conf.d/a.conf")).unwrap(),
            root.join("conf.d/a.conf")
        );
        assert_eq!(
            contained_path(root, Path::new("/usr/local/nginx/conf/mime.types")).unwrap(),
            root.join("mime.types")
        );
        for bad in [
            "/etc/passwd",
            "../sbin/nginx",
            "/usr/local/nginx/conf/../logs/x",
            "/usr/local/nginx/conf",
            "/usr/local/nginx/conf2/x.conf",
        ] {
            assert!(
                matches!(contained_path(root, Path::new(bad)), Err(SiteError::Validation(_))),
                "{} should be refused",
                bad
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_dir_cannot_escape() {
        let dir = tempfile::tempdir().unwrap();
        let server = FakeServerControl::installed(dir.path());
        let outside = tempfile::tempdir().unwrap();
        let root = server.layout().conf_dir();
        std::os::unix::fs::symlink(outside.path(), root.join("escape")).unwrap();

        for path in ["escape/x.conf", "escape/new/dir/x.conf"] {
            assert!(matches!(
                contained_path(&root, Path::new(path)),
                Err(SiteError::Validation(_))
            ));
        }
        assert!(contained_path(&root, Path::new("new/dir/x.conf")).is_ok());
    }

    #[tokio::test]
    async fn test_main_conf_save_and_rollback() {
        let (files, server, _dir) = files();
        let initial = files.main_conf().unwrap();
        assert!(initial.contains("listen 8080;"));

        files
            .save_main_conf("events {}\nhttp {\n    include conf.d/*.conf;\n}\n")
            .await
            .unwrap();
        assert!(files.main_conf().unwrap().contains("include conf.d/*.conf;"));
        assert_eq!(server.reloads.load(Ordering::SeqCst), 1);

        server.reject_config.store(true, Ordering::SeqCst);
        let result = files.save_main_conf("http {").await;
        assert!(matches!(result, Err(SiteError::Validation(_))));
        assert!(files.main_conf().unwrap().contains("include conf.d/*.conf;"));
        assert_eq!(server.reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conf_files_list_read_save() {
        let (files, server, _dir) = files();
        assert!(files.list().unwrap().is_empty());

        let upstream = "upstream app { server 127.0.0.1:3000; }\n";
        let saved = files.save("conf.d/upstream.conf", upstream).await.unwrap();
        assert_eq!(saved, server.layout().sites_dir().join("upstream.conf"));
        fs::create_dir_all(server.layout().sites_dir().join("nested")).unwrap();

        let listed = files.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "upstream.conf");
        assert_eq!(listed[0].size, upstream.len() as u64);

        // directory parts of the name are dropped
        assert!(files.read("../../upstream.conf").unwrap().starts_with("upstream app"));
        assert!(matches!(files.read("missing.conf"), Err(SiteError::NotFound(_))));

        assert!(matches!(
            files.save("../nginx.conf.bak", "x").await,
            Err(SiteError::Validation(_))
        ));
        assert!(!server.layout().install_dir().join("nginx.conf.bak").exists());
    }

    #[tokio::test]
    async fn test_rejected_new_file_is_removed() {
        let (files, server, _dir) = files();
        server.reject_config.store(true, Ordering::SeqCst);

        assert!(files.save("conf.d/broken.conf", "bogus;").await.is_err());
        assert!(!server.layout().sites_dir().join("broken.conf").exists());
    }

    #[tokio::test]
    async fn test_requires_install() {
        let dir = tempfile::tempdir().unwrap();
        let server = Arc::new(FakeServerControl::installed(dir.path()));
        fs::remove_file(server.layout().binary()).unwrap();
        let files = ConfigFiles::new(server);

        assert!(matches!(files.main_conf(), Err(SiteError::External(_))));
        assert!(matches!(files.list(), Err(SiteError::External(_))));
        assert!(matches!(files.save_main_conf("").await, Err(SiteError::External(_))));
    }
}
