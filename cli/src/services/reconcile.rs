//! Promotion reconciliation
//!
//! Polls a promotion pull request until it is merged and, when asked, until
//! the pipeline triggered by the merge commit reports success. Merges the
//! pull request once its checks pass, unless a merge queue owns it, and
//! re-raises it when it conflicts with its base.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::domain::pull_request::{CommitStatus, PullRequest, StatusState, TIDE_CONTEXT};
use crate::error::PromotionError;
use crate::infrastructure::activity::{ActivityTracker, GitStatus};
use crate::infrastructure::scm::ScmClient;

/// Commit title used when promote merges the pull request itself
pub const MERGE_COMMIT_TITLE: &str = "promote automatically merged promotion PR";

/// How long and how to wait
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Stop as soon as the pull request is merged
    pub no_wait_after_merge: bool,
    /// Merge the pull request once its checks pass
    pub merge: bool,
    /// Wait for the pipeline triggered by the merge commit
    pub wait_for_pipeline: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60 * 60),
            poll_interval: Duration::from_secs(20),
            no_wait_after_merge: false,
            merge: true,
            wait_for_pipeline: false,
        }
    }
}

/// Re-raises a pull request that conflicts with its base
#[async_trait]
pub trait Rebaser: Send + Sync {
    async fn rebase(&self, pr: &PullRequest) -> Result<Option<PullRequest>>;
}

/// Told once a promotion has been applied
#[async_trait]
pub trait PromotionNotifier: Send + Sync {
    async fn promoted(&self);
}

#[derive(Debug, Default)]
struct Logged {
    merged_without_sha: bool,
    build_pending: bool,
    no_pipeline_status: bool,
}

/// Waits on one promotion pull request
pub struct Reconciler<'a> {
    scm: &'a dyn ScmClient,
    repo: String,
    environments: Vec<String>,
    options: ReconcileOptions,
    tracker: &'a ActivityTracker,
    rebaser: &'a dyn Rebaser,
    notifier: &'a dyn PromotionNotifier,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        scm: &'a dyn ScmClient,
        repo: impl Into<String>,
        environments: Vec<String>,
        options: ReconcileOptions,
        tracker: &'a ActivityTracker,
        rebaser: &'a dyn Rebaser,
        notifier: &'a dyn PromotionNotifier,
    ) -> Self {
        Self {
            scm,
            repo: repo.into(),
            environments,
            options,
            tracker,
            rebaser,
            notifier,
        }
    }

    /// Poll until the promotion succeeds, fails or times out
    pub async fn wait(&self, pr: PullRequest) -> Result<PullRequest, PromotionError> {
        let result = self.poll(pr).await;
        match &result {
            Ok(pr) => {
                info!(number = pr.number, "Promotion through {} succeeded", pr.link);
                self.tracker.succeeded(&self.environments).await;
            }
            Err(e) => {
                warn!(error = %e, "Promotion failed");
                self.tracker.failed(&self.environments).await;
            }
        }
        result
    }

    async fn poll(&self, mut pr: PullRequest) -> Result<PullRequest, PromotionError> {
        let start = Instant::now();
        let mut logged = Logged::default();
        let mut observed: HashMap<String, StatusState> = HashMap::new();
        let mut update_started = false;
        let mut merge_requested = false;

        loop {
            if start.elapsed() > self.options.timeout {
                return Err(PromotionError::TimedOut {
                    link: pr.link.clone(),
                    waited: humantime::format_duration(self.options.timeout).to_string(),
                });
            }

            let link = pr.link.clone();
            pr = self
                .scm
                .find_pull_request(&self.repo, pr.number)
                .await
                .map_err(|source| PromotionError::Scm {
                    link: link.clone(),
                    source,
                })?;

            if pr.closed && !pr.merged {
                return Err(PromotionError::PullRequestClosed { link });
            }

            if pr.merged {
                match pr.merge_sha.clone().filter(|sha| !sha.is_empty()) {
                    None => {
                        if !logged.merged_without_sha {
                            info!("Pull request {} is merged, waiting for the merge commit", link);
                            logged.merged_without_sha = true;
                        }
                    }
                    Some(sha) => {
                        if self.options.no_wait_after_merge {
                            info!(sha = %sha, "Pull request {} is merged, not waiting for the update", link);
                            return Ok(pr);
                        }
                        if !update_started {
                            info!(sha = %sha, "Pull request {} is merged", link);
                            self.tracker
                                .pull_request_merged(&self.environments, &sha)
                                .await;
                            update_started = true;
                        }
                        if !self.options.wait_for_pipeline
                            || self
                                .merge_pipeline_succeeded(&link, &sha, &mut observed, &mut logged)
                                .await?
                        {
                            self.notifier.promoted().await;
                            return Ok(pr);
                        }
                    }
                }
            } else {
                self.check_open_pull_request(&mut pr, &mut logged, &mut merge_requested)
                    .await?;
            }

            sleep(self.options.poll_interval).await;
        }
    }

    /// Whether every pipeline status of the merge commit succeeded
    async fn merge_pipeline_succeeded(
        &self,
        link: &str,
        sha: &str,
        observed: &mut HashMap<String, StatusState>,
        logged: &mut Logged,
    ) -> Result<bool, PromotionError> {
        let statuses = self.statuses(link, sha).await?;
        if statuses.is_empty() {
            if !logged.no_pipeline_status {
                info!("Waiting for the pipeline of merge commit {}", sha);
                logged.no_pipeline_status = true;
            }
            return Ok(false);
        }

        let mut changed = false;
        for status in &statuses {
            if status.state.is_failed() {
                return Err(PromotionError::PipelineFailed {
                    state: status.state.name().to_string(),
                    target_url: status.url().to_string(),
                    description: status.description.clone(),
                });
            }
            if observed.get(status.key()) != Some(&status.state) {
                info!(
                    "Pipeline status {} at {}: {}",
                    status.state,
                    status.url(),
                    status.description
                );
                observed.insert(status.key().to_string(), status.state);
                changed = true;
            }
        }

        if changed {
            let recorded: Vec<GitStatus> = statuses
                .iter()
                .map(|status| GitStatus {
                    url: status.url().to_string(),
                    status: status.state.name().to_string(),
                })
                .collect();
            self.tracker
                .update_statuses(&self.environments, &recorded)
                .await;
        }

        Ok(statuses
            .iter()
            .all(|status| status.state == StatusState::Success))
    }

    async fn check_open_pull_request(
        &self,
        pr: &mut PullRequest,
        logged: &mut Logged,
        merge_requested: &mut bool,
    ) -> Result<(), PromotionError> {
        let statuses = self.statuses(&pr.link, &pr.head.sha).await?;
        let merge_queued = statuses.iter().any(|s| s.label == TIDE_CONTEXT);

        match last_commit_state(&statuses) {
            StatusState::Success => {
                if self.options.merge && !merge_queued && !*merge_requested {
                    match self
                        .scm
                        .merge_pull_request(&self.repo, pr.number, MERGE_COMMIT_TITLE)
                        .await
                    {
                        Ok(()) => {
                            info!(number = pr.number, "Merging pull request {}", pr.link);
                            *merge_requested = true;
                        }
                        Err(e) => warn!(error = %e, "Failed to merge pull request {}", pr.link),
                    }
                }
            }
            state if state.is_failed() => {
                return Err(PromotionError::PullRequestCheckFailed {
                    link: pr.link.clone(),
                    state: state.name().to_string(),
                    sha: pr.head.sha.clone(),
                });
            }
            state if state.is_pending() => {
                if !logged.build_pending {
                    info!("The build for pull request {} last commit is in progress", pr.link);
                    logged.build_pending = true;
                }
            }
            _ => debug!("No status yet for pull request {}", pr.link),
        }

        if pr.mergeable == Some(false) {
            info!("Pull request {} conflicts with its base, rebasing", pr.link);
            match self.rebaser.rebase(pr).await {
                Ok(Some(rebased)) => {
                    *pr = rebased;
                    *merge_requested = false;
                    logged.build_pending = false;
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(PromotionError::Rebase {
                        link: pr.link.clone(),
                        message: format!("{:#}", e),
                    })
                }
            }
        }
        Ok(())
    }

    async fn statuses(&self, link: &str, sha: &str) -> Result<Vec<CommitStatus>, PromotionError> {
        if sha.is_empty() {
            return Ok(Vec::new());
        }
        let statuses = self
            .scm
            .list_statuses(&self.repo, sha)
            .await
            .map_err(|source| PromotionError::Scm {
                link: link.to_string(),
                source,
            })?;
        Ok(latest_per_context(statuses))
    }
}

/// Newest status of each check; providers list statuses newest first
fn latest_per_context(statuses: Vec<CommitStatus>) -> Vec<CommitStatus> {
    let mut seen = HashSet::new();
    statuses
        .into_iter()
        .filter(|status| seen.insert(status.label.clone()))
        .collect()
}

/// Combined state of the checks on a pull request's last commit
///
/// The merge queue's own status is not a build check and is ignored.
fn last_commit_state(statuses: &[CommitStatus]) -> StatusState {
    let checks = statuses.iter().filter(|s| s.label != TIDE_CONTEXT);
    let mut state = StatusState::Unknown;
    for check in checks {
        if check.state.is_failed() {
            return check.state;
        }
        if check.state.is_pending() {
            state = StatusState::Pending;
        } else if check.state == StatusState::Success && state == StatusState::Unknown {
            state = StatusState::Success;
        }
    }
    state
}
