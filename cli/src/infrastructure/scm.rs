//! Git provider seam
//!
//! Everything promotion needs from a git provider: pull requests, labels,
//! commit statuses, comments and forks. Repositories are addressed by their
//! `owner/name` full name.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::git_url::GitRepository;
use crate::domain::pull_request::{CommitStatus, PullRequest, PullRequestInput};
use crate::error::ScmError;

/// A repository on the git provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScmRepository {
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
    pub fork: bool,
}

#[async_trait]
pub trait ScmClient: Send + Sync {
    /// Login of the authenticated user
    async fn current_user(&self) -> Result<String, ScmError>;

    async fn find_repository(&self, repo: &str) -> Result<Option<ScmRepository>, ScmError>;

    /// Fork `repo` into the authenticated user's account
    async fn fork_repository(&self, repo: &str) -> Result<ScmRepository, ScmError>;

    /// Open pull requests carrying every one of `labels`
    async fn list_open_pull_requests(
        &self,
        repo: &str,
        labels: &[String],
    ) -> Result<Vec<PullRequest>, ScmError>;

    async fn find_pull_request(&self, repo: &str, number: u64) -> Result<PullRequest, ScmError>;

    async fn create_pull_request(
        &self,
        repo: &str,
        input: &PullRequestInput,
    ) -> Result<PullRequest, ScmError>;

    async fn update_pull_request(
        &self,
        repo: &str,
        number: u64,
        input: &PullRequestInput,
    ) -> Result<PullRequest, ScmError>;

    async fn add_labels(&self, repo: &str, number: u64, labels: &[String]) -> Result<(), ScmError>;

    async fn merge_pull_request(
        &self,
        repo: &str,
        number: u64,
        commit_title: &str,
    ) -> Result<(), ScmError>;

    /// Statuses reported for a commit, newest first
    async fn list_statuses(&self, repo: &str, sha: &str) -> Result<Vec<CommitStatus>, ScmError>;

    async fn create_issue_comment(
        &self,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ScmError>;
}

/// Creates clients for the git server hosting a repository
pub trait ScmFactory: Send + Sync {
    fn client_for(&self, repo: &GitRepository) -> Result<Arc<dyn ScmClient>, ScmError>;
}

/// Kinds of git provider promote can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitKind {
    GitHub,
}

impl GitKind {
    /// Provider for a `--git-kind` value, detected from the host when empty
    pub fn resolve(kind: &str, host: &str) -> Result<Self, ScmError> {
        match kind.to_ascii_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "" if host == "github.com" || host.contains("github") => Ok(Self::GitHub),
            "" => Err(ScmError::Unsupported {
                kind: format!("unknown provider for host {}", host),
            }),
            other => Err(ScmError::Unsupported {
                kind: other.to_string(),
            }),
        }
    }
}
