//! External command execution with a hard timeout

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SiteError};

/// Default timeout applied to external commands
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured result of an external command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// The diagnostic text: stderr when present, stdout otherwise
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Run `program args...` and capture its output, failing if it does not
/// exit within `timeout`. A non-zero exit is not an error at this level.
pub async fn run(program: &Path, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    run_with_input(program, args, None, timeout).await
}

/// Like [`run`], feeding `input` to the child's stdin. Secrets go here
/// rather than into `args`, which are logged.
pub async fn run_with_input(
    program: &Path,
    args: &[&str],
    input: Option<&[u8]>,
    timeout: Duration,
) -> Result<CommandOutput> {
    debug!(program = %program.display(), ?args, "Running external command");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let work = async {
        let mut child = cmd.spawn()?;
        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input).await?;
        }
        Ok::<_, std::io::Error>(child.wait_with_output().await?)
    };

    let output = tokio::time::timeout(timeout, work)
        .await
        .map_err(|_| {
            SiteError::External(format!(
                "{} timed out after {}s",
                program.display(),
                timeout.as_secs()
            ))
        })?
        .map_err(|e| SiteError::External(format!("{}: {}", program.display(), e)))?;

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Like [`run`], but a non-zero exit becomes `SiteError::External`
pub async fn run_checked(program: &Path, args: &[&str], timeout: Duration) -> Result<String> {
    let output = run(program, args, timeout).await?;
    if !output.success {
        return Err(SiteError::External(output.message()));
    }
    Ok(output.message())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_prefers_stderr() {
        let output = CommandOutput {
            success: false,
            stdout: "ok\n".to_string(),
            stderr: "nginx: [emerg] unexpected \"}\"\n".to_string(),
        };
        assert_eq!(output.message(), "nginx: [emerg] unexpected \"}\"");

        let output = CommandOutput {
            success: true,
            stdout: "ok\n".to_string(),
            stderr: "  ".to_string(),
        };
        assert_eq!(output.message(), "ok");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output() {
        let output = run(Path::new("sh"), &["-c", "echo hello; exit 3"], DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_times_out() {
        let result = run(Path::new("sleep"), &["5"], Duration::from_millis(100)).await;
        assert!(matches!(result, Err(SiteError::External(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_input() {
        let output = run_with_input(Path::new("cat"), &[], Some(b"secret\n"), DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "secret\n");
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let result = run_checked(
            Path::new("/nonexistent/bin/nginx"),
            &["-t"],
            DEFAULT_TIMEOUT,
        )
        .await;
        assert!(matches!(result, Err(SiteError::External(_))));
    }
}
