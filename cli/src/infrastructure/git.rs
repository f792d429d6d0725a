//! Git operations
//!
//! Clones environment repositories and records promotion commits using the
//! system `git` binary. [`Gitter`] is the seam the orchestrator depends on.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::GitError;
use crate::tools::{get_tool_path, tools};

/// Git operations needed to raise a promotion pull request
#[async_trait]
pub trait Gitter: Send + Sync {
    /// Clone `url` into `dir`, optionally sparse with the given patterns
    async fn clone_repo(&self, url: &str, dir: &Path, sparse: &[String]) -> Result<(), GitError>;

    /// Full SHA of HEAD
    async fn current_sha(&self, dir: &Path) -> Result<String, GitError>;

    /// Whether the working tree has uncommitted changes
    async fn has_changes(&self, dir: &Path) -> Result<bool, GitError>;

    /// Create and switch to a new branch
    async fn create_branch(&self, dir: &Path, branch: &str) -> Result<(), GitError>;

    /// Stage everything and commit
    async fn add_and_commit(&self, dir: &Path, message: &str) -> Result<(), GitError>;

    async fn force_push(&self, dir: &Path, branch: &str) -> Result<(), GitError>;

    async fn add_remote(&self, dir: &Path, name: &str, url: &str) -> Result<(), GitError>;

    async fn pull_rebase(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), GitError>;

    /// URL of the `origin` remote, `None` if there is none
    async fn origin_url(&self, dir: &Path) -> Result<Option<String>, GitError>;
}

/// Client for git operations through the git CLI
pub struct GitClient {
    /// Committer identity used for promotion commits
    user_name: Option<String>,
    user_email: Option<String>,
}

impl Default for GitClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GitClient {
    /// Create a new git client
    pub fn new() -> Self {
        Self {
            user_name: None,
            user_email: None,
        }
    }

    /// Commit as the given identity rather than the global git config
    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self.user_email = Some(email.into());
        self
    }

    fn command(&self, dir: Option<&Path>) -> Command {
        let mut cmd = Command::new(get_tool_path(tools::GIT));
        if let Some(name) = &self.user_name {
            cmd.arg("-c").arg(format!("user.name={}", name));
        }
        if let Some(email) = &self.user_email {
            cmd.arg("-c").arg(format!("user.email={}", email));
        }
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Run git with `args`, returning trimmed stdout
    async fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
        let mut cmd = self.command(dir);
        cmd.args(args);

        let command = format!("git {}", redact(args).join(" "));
        debug!("Running {}", command);

        let output = cmd.output().await.map_err(|e| GitError::CommandFailed {
            command: command.clone(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::CommandFailed {
                command,
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Hide credentials embedded in clone URLs
fn redact(args: &[&str]) -> Vec<String> {
    args.iter()
        .map(|arg| match url::Url::parse(arg) {
            Ok(mut url) if url.password().is_some() => {
                let _ = url.set_password(Some("****"));
                url.to_string()
            }
            _ => arg.to_string(),
        })
        .collect()
}

#[async_trait]
impl Gitter for GitClient {
    async fn clone_repo(&self, url: &str, dir: &Path, sparse: &[String]) -> Result<(), GitError> {
        let target = dir.to_string_lossy().into_owned();
        let target = target.as_str();
        if sparse.is_empty() {
            self.run(None, &["clone", url, target]).await?;
        } else {
            self.run(
                None,
                &["clone", "--filter=blob:none", "--sparse", url, target],
            )
            .await?;
            let mut args = vec!["sparse-checkout", "set", "--no-cone"];
            args.extend(sparse.iter().map(String::as_str));
            self.run(Some(dir), &args).await?;
        }
        info!("Cloned {} into {}", redact(&[url])[0], dir.display());
        Ok(())
    }

    async fn current_sha(&self, dir: &Path) -> Result<String, GitError> {
        let sha = self
            .run(Some(dir), &["rev-parse", "HEAD"])
            .await
            .map_err(|e| GitError::ShaFailed(e.to_string()))?;
        if sha.is_empty() {
            return Err(GitError::ShaFailed("Empty SHA returned".to_string()));
        }
        Ok(sha)
    }

    async fn has_changes(&self, dir: &Path) -> Result<bool, GitError> {
        let status = self.run(Some(dir), &["status", "--porcelain"]).await?;
        Ok(!status.is_empty())
    }

    async fn create_branch(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        self.run(Some(dir), &["checkout", "-b", branch]).await?;
        Ok(())
    }

    async fn add_and_commit(&self, dir: &Path, message: &str) -> Result<(), GitError> {
        self.run(Some(dir), &["add", "--all"]).await?;
        self.run(Some(dir), &["commit", "-m", message]).await?;
        Ok(())
    }

    async fn force_push(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        let refspec = format!("HEAD:refs/heads/{}", branch);
        self.run(Some(dir), &["push", "--force", "origin", refspec.as_str()])
            .await?;
        Ok(())
    }

    async fn add_remote(&self, dir: &Path, name: &str, url: &str) -> Result<(), GitError> {
        self.run(Some(dir), &["remote", "add", name, url]).await?;
        Ok(())
    }

    async fn pull_rebase(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        self.run(Some(dir), &["pull", "--rebase", remote, branch])
            .await?;
        Ok(())
    }

    async fn origin_url(&self, dir: &Path) -> Result<Option<String>, GitError> {
        if !dir.join(".git").exists() {
            return Err(GitError::NotARepository {
                path: dir.display().to_string(),
            });
        }
        match self
            .run(Some(dir), &["config", "--get", "remote.origin.url"])
            .await
        {
            Ok(url) if !url.is_empty() => Ok(Some(url)),
            Ok(_) => Ok(None),
            // `git config --get` exits non-zero when the key is unset
            Err(GitError::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Random branch name for a promotion
pub fn promote_branch_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("promote-{}", &id[..12])
}
