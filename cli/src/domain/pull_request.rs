//! Pull request and commit status value types
//!
//! Provider-neutral shapes returned by the SCM client, plus the label
//! conventions promotions use to find their own pull requests again.

use std::fmt;

/// Label asking the merge bot to merge once checks pass
pub const UPDATEBOT_LABEL: &str = "updatebot";

/// Label keeping a pull request from being merged until a human approves
pub const HOLD_LABEL: &str = "do-not-merge/hold";

/// Context of the merge bot's status check
pub const TIDE_CONTEXT: &str = "tide";

const MAX_LABEL_LENGTH: usize = 49;

/// State of a commit status check
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusState {
    Unknown,
    Pending,
    Running,
    Success,
    Failure,
    Error,
    Canceled,
}

impl StatusState {
    pub fn parse(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "pending" | "queued" => Self::Pending,
            "running" | "in_progress" => Self::Running,
            "success" | "succeeded" => Self::Success,
            "failure" | "failed" => Self::Failure,
            "error" => Self::Error,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failure | Self::Error | Self::Canceled)
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A status check reported against a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitStatus {
    pub state: StatusState,
    /// Check name (the provider's "context")
    pub label: String,
    pub description: String,
    pub target_url: String,
    /// API link of the status itself
    pub link: String,
}

impl CommitStatus {
    /// Identity used to follow a check across polls
    pub fn key(&self) -> &str {
        if self.link.is_empty() {
            &self.target_url
        } else {
            &self.link
        }
    }

    /// URL shown to users for the check
    pub fn url(&self) -> &str {
        if self.target_url.is_empty() {
            &self.link
        } else {
            &self.target_url
        }
    }
}

/// One side of a pull request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequestRef {
    /// Branch name
    pub name: String,
    pub sha: String,
    /// `owner/name` of the repository the branch lives in
    pub repository: String,
}

/// A pull request as seen by the git provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub link: String,
    pub head: PullRequestRef,
    pub base: PullRequestRef,
    pub merged: bool,
    /// Only present once merged
    pub merge_sha: Option<String>,
    pub closed: bool,
    /// `None` while the provider is still computing it
    pub mergeable: Option<bool>,
    pub labels: Vec<String>,
    pub draft: bool,
}

impl PullRequest {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn is_open(&self) -> bool {
        !self.closed && !self.merged
    }
}

/// Fields for creating or updating a pull request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequestInput {
    pub title: String,
    pub body: String,
    /// Source branch, `owner:branch` when coming from a fork
    pub head: String,
    pub base: String,
    pub draft: bool,
}

/// Newest open pull request carrying every label in `labels`
pub fn select_existing(mut candidates: Vec<PullRequest>, labels: &[String]) -> Option<PullRequest> {
    candidates.sort_by(|a, b| b.number.cmp(&a.number));
    candidates
        .into_iter()
        .filter(PullRequest::is_open)
        .find(|pr| labels.iter().all(|label| pr.has_label(label)))
}

/// Link to a pull request page
///
/// Some providers hand back the diff URL.
pub fn trim_link(link: &str) -> String {
    link.strip_suffix(".diff").unwrap_or(link).to_string()
}

/// Label tying a pull request to the application being promoted
pub fn dependency_label(app: &str) -> String {
    let label = format!("dependency/{}", app);
    label.chars().take(MAX_LABEL_LENGTH).collect()
}

/// Label naming one target environment
pub fn environment_label(key: &str) -> String {
    format!("env/{}", key)
}
