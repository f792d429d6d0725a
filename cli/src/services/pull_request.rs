//! Pull request orchestration
//!
//! Clones an environment repository, lets a [`ChangeSet`] mutate it, then
//! commits, pushes and raises (or refreshes) the pull request carrying the
//! change.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::git_url::{authenticated_url, GitRepository};
use crate::domain::pull_request::{
    select_existing, trim_link, PullRequest, PullRequestInput, UPDATEBOT_LABEL,
};
use crate::infrastructure::git::{promote_branch_name, Gitter};
use crate::infrastructure::scm::ScmClient;

/// Paths an environment repository needs for promotion, for sparse clones
pub const SPARSE_CHECKOUT_PATTERNS: &[&str] =
    &[".jx", "helmfile.yaml", "helmfiles", "env", "config-root"];

const DEFAULT_BASE_BRANCH: &str = "master";
const UPSTREAM_REMOTE: &str = "upstream";

/// Mutation run inside a fresh clone of an environment repository
#[async_trait]
pub trait ChangeSet: Send + Sync {
    async fn apply(&self, dir: &Path) -> Result<()>;
}

/// What pull request to raise
#[derive(Debug, Clone, Default)]
pub struct PullRequestOptions {
    pub git_url: String,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    /// Ask the merge bot to merge once checks pass
    pub auto_merge: bool,
    pub draft: bool,
    /// Push to a fork owned by the current user
    pub fork: bool,
    pub sparse_checkout: bool,
    /// Update an open pull request carrying the same labels
    pub reuse: bool,
    pub git_user: String,
    pub git_token: String,
}

impl PullRequestOptions {
    /// Labels to put on the pull request
    pub fn all_labels(&self) -> Vec<String> {
        let mut labels = self.labels.clone();
        if self.auto_merge && !labels.iter().any(|l| l == UPDATEBOT_LABEL) {
            labels.push(UPDATEBOT_LABEL.to_string());
        }
        labels
    }

    fn sparse_patterns(&self) -> Vec<String> {
        if self.sparse_checkout {
            SPARSE_CHECKOUT_PATTERNS.iter().map(|p| p.to_string()).collect()
        } else {
            Vec::new()
        }
    }
}

/// Raises promotion pull requests
pub struct PullRequestOrchestrator<'a> {
    scm: &'a dyn ScmClient,
    git: &'a dyn Gitter,
}

impl<'a> PullRequestOrchestrator<'a> {
    pub fn new(scm: &'a dyn ScmClient, git: &'a dyn Gitter) -> Self {
        Self { scm, git }
    }

    /// Raise or refresh the pull request for `change`
    ///
    /// `existing` is a pull request to push onto instead of opening a new
    /// one. Returns `None` when the change leaves the repository untouched
    /// and there is no pull request to report.
    pub async fn create_or_update(
        &self,
        options: &PullRequestOptions,
        existing: Option<PullRequest>,
        change: &dyn ChangeSet,
    ) -> Result<Option<PullRequest>> {
        let start = Instant::now();
        let upstream = GitRepository::parse(&options.git_url)?;
        let repo = upstream.full_name();
        let labels = options.all_labels();

        let existing = match existing {
            Some(pr) => Some(pr),
            None if options.reuse => self.find_existing(&repo, &labels).await?,
            None => None,
        };
        if let Some(pr) = &existing {
            info!(number = pr.number, "Reusing pull request {}", pr.link);
        }

        let base = self
            .scm
            .find_repository(&repo)
            .await
            .with_context(|| format!("Failed to find repository {}", repo))?
            .map(|r| r.default_branch)
            .filter(|branch| !branch.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_BRANCH.to_string());

        let scratch = tempfile::Builder::new()
            .prefix("promote-")
            .tempdir()
            .context("Failed to create temporary directory")?;
        let dir = scratch.path().join(&upstream.name);

        let head_owner = self
            .clone_repository(options, &upstream, &base, &dir)
            .await?;

        let before = self.git.current_sha(&dir).await?;
        change
            .apply(&dir)
            .await
            .with_context(|| format!("Failed to apply promotion to {}", repo))?;
        let after = self.git.current_sha(&dir).await?;
        let dirty = self.git.has_changes(&dir).await?;

        if before == after && !dirty {
            info!("No changes to promote in {}", repo);
            return Ok(existing);
        }

        let branch = match &existing {
            Some(pr) => pr.head.name.clone(),
            None => promote_branch_name(),
        };
        self.git.create_branch(&dir, &branch).await?;
        if dirty {
            let message = format!("{}\n\n{}", options.title, options.body);
            self.git.add_and_commit(&dir, message.trim_end()).await?;
        }
        self.git
            .force_push(&dir, &branch)
            .await
            .with_context(|| format!("Failed to push branch {} to {}", branch, repo))?;

        let input = PullRequestInput {
            title: options.title.clone(),
            body: options.body.clone(),
            head: match &head_owner {
                Some(owner) => format!("{}:{}", owner, branch),
                None => branch.clone(),
            },
            base,
            draft: options.draft,
        };

        let pr = match &existing {
            Some(pr) => self
                .scm
                .update_pull_request(&repo, pr.number, &input)
                .await
                .with_context(|| format!("Failed to update pull request {}", pr.link))?,
            None => self
                .scm
                .create_pull_request(&repo, &input)
                .await
                .with_context(|| format!("Failed to create pull request on {}", repo))?,
        };

        let mut pr = self.ensure_labels(&repo, pr, &labels).await?;
        pr.link = trim_link(&pr.link);

        debug!(
            "Pull request {} ready in {:.1}s",
            pr.link,
            start.elapsed().as_secs_f64()
        );
        Ok(Some(pr))
    }

    async fn find_existing(&self, repo: &str, labels: &[String]) -> Result<Option<PullRequest>> {
        let candidates = self
            .scm
            .list_open_pull_requests(repo, labels)
            .await
            .with_context(|| format!("Failed to list pull requests of {}", repo))?
            .into_iter()
            .filter(|pr| pr.base.repository.is_empty() || pr.base.repository == repo)
            .collect();
        Ok(select_existing(candidates, labels))
    }

    /// Clone the repository, through a fork when asked
    ///
    /// Returns the fork owner when pushing to a fork.
    async fn clone_repository(
        &self,
        options: &PullRequestOptions,
        upstream: &GitRepository,
        base: &str,
        dir: &Path,
    ) -> Result<Option<String>> {
        let sparse = options.sparse_patterns();
        let upstream_url = authenticated_url(
            &upstream.clone_url(),
            &options.git_user,
            &options.git_token,
        )?;

        if !options.fork {
            self.git
                .clone_repo(&upstream_url, dir, &sparse)
                .await
                .with_context(|| format!("Failed to clone {}", upstream.clone_url()))?;
            return Ok(None);
        }

        let user = self
            .scm
            .current_user()
            .await
            .context("Failed to find the current git user")?;
        let fork_name = upstream.with_owner(&user).full_name();
        let fork = match self.scm.find_repository(&fork_name).await? {
            Some(fork) => fork,
            None => {
                info!("Forking {} to {}", upstream.full_name(), fork_name);
                self.scm
                    .fork_repository(&upstream.full_name())
                    .await
                    .with_context(|| format!("Failed to fork {}", upstream.full_name()))?
            }
        };
        let fork_url = if fork.clone_url.is_empty() {
            upstream.with_owner(&user).clone_url()
        } else {
            fork.clone_url.clone()
        };

        self.git
            .clone_repo(
                &authenticated_url(&fork_url, &options.git_user, &options.git_token)?,
                dir,
                &sparse,
            )
            .await
            .with_context(|| format!("Failed to clone fork {}", fork_url))?;
        self.git.add_remote(dir, UPSTREAM_REMOTE, &upstream_url).await?;
        self.git
            .pull_rebase(dir, UPSTREAM_REMOTE, base)
            .await
            .with_context(|| format!("Failed to rebase fork on {}", upstream.full_name()))?;
        Ok(Some(user))
    }

    /// Add any of `labels` the pull request lacks
    async fn ensure_labels(
        &self,
        repo: &str,
        pr: PullRequest,
        labels: &[String],
    ) -> Result<PullRequest> {
        let missing: Vec<String> = labels
            .iter()
            .filter(|label| !pr.has_label(label))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(pr);
        }
        self.scm
            .add_labels(repo, pr.number, &missing)
            .await
            .with_context(|| format!("Failed to label pull request {}", pr.link))?;
        self.scm
            .find_pull_request(repo, pr.number)
            .await
            .with_context(|| format!("Failed to reread pull request {}", pr.link))
    }
}
