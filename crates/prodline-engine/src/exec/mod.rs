//! Child process execution: short captured commands for provisioning
//! steps, and fully monitored operator runs.

pub mod monitor;
pub mod process;

use std::path::Path;

use anyhow::{Context, Result};
use tokio::process::Command;

pub use process::{ExecutionRequest, ProcessExecutor};

/// Captured outcome of a short provisioning command.
#[derive(Debug)]
pub struct CapturedOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output for failure diagnostics.
    pub fn diagnostic(&self) -> String {
        format!("stdout: {}\nstderr: {}", self.stdout.trim(), self.stderr.trim())
    }
}

/// Run a command to completion, capturing stdout and stderr. Used for
/// provisioning steps (environment installs, source checkouts), not for
/// operator execution.
///
/// # Errors
///
/// Returns an error when the command cannot be spawned; a nonzero exit
/// is reported through `CapturedOutput`, not as an error.
pub async fn capture(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
) -> Result<CapturedOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .await
        .with_context(|| format!("Failed to spawn '{program}'"))?;

    Ok(CapturedOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_collects_stdout() {
        let out = capture("sh", &["-c".into(), "echo hello".into()], None)
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_capture_reports_nonzero_exit() {
        let out = capture("sh", &["-c".into(), "echo oops >&2; exit 7".into()], None)
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 7);
        assert!(out.diagnostic().contains("oops"));
    }

    #[tokio::test]
    async fn test_capture_missing_program_errors() {
        let result = capture("definitely-not-a-binary-xyz", &[], None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_capture_honors_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let out = capture("sh", &["-c".into(), "pwd".into()], Some(dir.path()))
            .await
            .unwrap();
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        let expected = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(reported, expected);
    }
}
