//! Per-certificate issuance log
//!
//! Each Apply/Renew run truncates `{ssl_dir}/logs/{domain}-ssl-{id}.log`
//! and appends one timestamped line per step.

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::acme::ProgressSink;

/// Shown by [`read_log`] before the first run
pub const NO_LOG_PLACEHOLDER: &str = "No log records yet";

pub struct ProgressLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl ProgressLog {
    pub fn path_for(ssl_dir: &Path, primary_domain: &str, cert_id: i64) -> PathBuf {
        ssl_dir
            .join("logs")
            .join(format!("{}-ssl-{}.log", primary_domain, cert_id))
    }

    /// Open and truncate the log. If the file cannot be opened, lines still
    /// go to tracing.
    pub fn create(path: PathBuf) -> Self {
        let file = path
            .parent()
            .map(fs::create_dir_all)
            .transpose()
            .and_then(|_| {
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&path)
            });

        let file = match file {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open issuance log");
                None
            }
        };

        Self {
            path,
            file: Mutex::new(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressSink for ProgressLog {
    fn record(&self, message: &str) {
        info!(log = %self.path.display(), "{}", message);

        let line = format!("{} {}\n", Local::now().format("%Y/%m/%d %H:%M:%S"), message);
        if let Ok(mut guard) = self.file.lock() {
            if let Some(file) = guard.as_mut() {
                if let Err(e) = file.write_all(line.as_bytes()) {
                    warn!(path = %self.path.display(), error = %e, "Failed to write issuance log");
                }
            }
        }
    }
}

/// Full log text, or [`NO_LOG_PLACEHOLDER`] when no run happened yet
pub fn read_log(path: &Path) -> std::io::Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NO_LOG_PLACEHOLDER.to_string()),
        Err(e) => Err(e),
    }
}
