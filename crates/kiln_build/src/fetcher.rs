//! Source fetching.

use crate::command::{self, CommandError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Produces a local checkout of a repository branch
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Clone `repo_url` at `branch` into `target`, or bring an existing
    /// checkout at `target` up to date with that branch.
    ///
    /// # Errors
    ///
    /// Returns error if any source-control command fails
    async fn clone_or_update(
        &self,
        repo_url: &str,
        branch: &str,
        target: &Path,
    ) -> Result<(), CommandError>;

    /// Revision identifier of the checkout at `checkout`
    ///
    /// # Errors
    ///
    /// Returns error if the revision cannot be read
    async fn revision(&self, checkout: &Path) -> Result<String, CommandError>;
}

/// [`SourceFetcher`] backed by the `git` command line
#[derive(Debug, Clone)]
pub struct GitFetcher {
    /// Git executable
    program: PathBuf,
}

impl GitFetcher {
    /// Use `git` from `PATH`
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific git executable
    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn git(&self, dir: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.program);
        // Never block on a credential prompt.
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn clone_repo(
        &self,
        repo_url: &str,
        branch: &str,
        target: &Path,
    ) -> Result<(), CommandError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| {
                    CommandError::io(format!("failed to create {}", parent.display()), e)
                })?;
        }

        let mut cmd = self.git(None);
        cmd.arg("clone")
            .arg("-b")
            .arg(branch)
            .arg("--")
            .arg(repo_url)
            .arg(target);
        command::run(cmd).await?;
        Ok(())
    }

    async fn update_repo(
        &self,
        repo_url: &str,
        branch: &str,
        checkout: &Path,
    ) -> Result<(), CommandError> {
        // The artifact's repository may have been edited since the clone.
        let mut remote = self.git(Some(checkout));
        remote.args(["remote", "set-url", "origin", repo_url]);
        command::run(remote).await?;

        let mut fetch = self.git(Some(checkout));
        fetch.args(["fetch", "origin"]);
        command::run(fetch).await?;

        let mut switch = self.git(Some(checkout));
        switch.args(["checkout", branch]);
        command::run(switch).await?;

        let mut pull = self.git(Some(checkout));
        pull.args(["pull", "origin", branch]);
        command::run(pull).await?;
        Ok(())
    }
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `path` already holds a git checkout
#[must_use]
pub fn is_checkout(path: &Path) -> bool {
    path.join(".git").exists()
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn clone_or_update(
        &self,
        repo_url: &str,
        branch: &str,
        target: &Path,
    ) -> Result<(), CommandError> {
        if is_checkout(target) {
            tracing::debug!(
                path = %target.display(),
                branch,
                repo_url,
                "updating existing checkout"
            );
            self.update_repo(repo_url, branch, target).await
        } else {
            tracing::debug!(path = %target.display(), branch, repo_url, "cloning repository");
            self.clone_repo(repo_url, branch, target).await
        }
    }

    async fn revision(&self, checkout: &Path) -> Result<String, CommandError> {
        let mut cmd = self.git(Some(checkout));
        cmd.args(["rev-parse", "HEAD"]);
        let out = command::run(cmd).await?;
        Ok(out.stdout.trim().to_string())
    }
}
