//! Source checkout collaborator: materializes an operator's code at a
//! fixed tag.

use std::path::Path;

use anyhow::{bail, Context, Result};

pub trait SourceFetcher: Send + Sync {
    /// Ensure `dest` holds the code of `repo` at `tag`.
    fn checkout(&self, repo: &str, tag: &str, dest: &Path) -> Result<()>;
}

/// Default implementation shelling out to `git clone --depth 1`.
/// An existing destination is reused without re-cloning, so repeated
/// runs share checkouts.
#[derive(Debug, Default)]
pub struct GitCli;

impl SourceFetcher for GitCli {
    fn checkout(&self, repo: &str, tag: &str, dest: &Path) -> Result<()> {
        if dest.exists() {
            tracing::info!(dest = %dest.display(), "Operator code already present, skipping clone");
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        tracing::info!(repo, tag, "Cloning operator code");
        let output = std::process::Command::new("git")
            .args(["clone", "--depth", "1", "--branch", tag, repo])
            .arg(dest)
            .output()
            .context("Failed to spawn git")?;

        if !output.status.success() {
            bail!(
                "git clone failed for {repo}@{tag}:\n{}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_checkout_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("op");
        std::fs::create_dir_all(&dest).unwrap();
        // No git invocation happens for an existing path, so a bogus
        // repo must still succeed.
        GitCli.checkout("git@nowhere:none.git", "v0", &dest).unwrap();
    }

    #[test]
    fn test_clone_failure_reports_repo_and_tag() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("op");
        let err = GitCli
            .checkout("/nonexistent/repo.git", "v1.2.3", &dest)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("/nonexistent/repo.git"), "got: {msg}");
        assert!(msg.contains("v1.2.3"), "got: {msg}");
    }
}
