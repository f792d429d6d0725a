//! Promotion activity tracking
//!
//! Records the progress of a promotion on the pipeline activity of the
//! build that triggered it. Tracking is an audit trail only: when no store
//! is configured every operation is a no-op, and store failures are logged
//! and never fail the promotion.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::release::valid_name_with_dots;

/// Status of a promotion step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ActivityStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A commit status observed after the merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitStatus {
    pub url: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestStep {
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_timestamp: Option<String>,
    #[serde(default, rename = "pullRequestURL", skip_serializing_if = "String::is_empty")]
    pub pull_request_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub merge_commit_sha: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStep {
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<GitStatus>,
}

/// The promote step of a pipeline activity, one per environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteStep {
    pub environment: String,
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateStep>,
    #[serde(default, rename = "applicationURL", skip_serializing_if = "String::is_empty")]
    pub application_url: String,
}

impl PromoteStep {
    pub fn new(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            ..Default::default()
        }
    }

    fn start(&mut self) {
        if self.started_timestamp.is_none() {
            self.started_timestamp = Some(now());
        }
        if !self.status.is_terminal() {
            self.status = ActivityStatus::Running;
        }
    }
}

/// Storage of promote steps and markers, keyed by activity name
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn load_step(&self, activity: &str, environment: &str) -> Result<Option<PromoteStep>>;

    async fn save_step(&self, activity: &str, step: &PromoteStep) -> Result<()>;

    async fn has_marker(&self, activity: &str, marker: &str) -> Result<bool>;

    async fn set_marker(&self, activity: &str, marker: &str) -> Result<()>;
}

/// Name of the activity for a pipeline build, e.g. `acme-myapp-main-12`
pub fn activity_name(pipeline: &str, build: &str) -> String {
    valid_name_with_dots(&format!("{}-{}", pipeline.replace('/', "-"), build))
}

fn issues_commented_marker(environment: &str) -> String {
    format!("issues-commented-{}", environment)
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Best-effort promotion tracking
///
/// If no store or no activity name is configured, all operations are no-ops.
#[derive(Clone, Default)]
pub struct ActivityTracker {
    store: Option<Arc<dyn ActivityStore>>,
    activity: String,
}

impl ActivityTracker {
    pub fn new(store: Arc<dyn ActivityStore>, activity: impl Into<String>) -> Self {
        let activity = activity.into();
        Self {
            store: if activity.is_empty() { None } else { Some(store) },
            activity,
        }
    }

    /// A tracker that records nothing
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Check if tracking is enabled
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn activity(&self) -> &str {
        &self.activity
    }

    async fn update<F>(&self, environments: &[String], apply: F)
    where
        F: Fn(&mut PromoteStep) + Send + Sync,
    {
        let Some(store) = &self.store else {
            return;
        };
        for env in environments {
            let result: Result<()> = async {
                let mut step = store
                    .load_step(&self.activity, env)
                    .await?
                    .unwrap_or_else(|| PromoteStep::new(env));
                apply(&mut step);
                store.save_step(&self.activity, &step).await
            }
            .await;

            match result {
                Ok(()) => tracing::debug!(
                    activity = %self.activity,
                    environment = %env,
                    "Updated promote step"
                ),
                Err(e) => tracing::warn!(
                    activity = %self.activity,
                    environment = %env,
                    error = %e,
                    "Failed to update promote step"
                ),
            }
        }
    }

    /// Pull request raised for the environments
    pub async fn pull_request_created(&self, environments: &[String], link: &str) {
        self.update(environments, |step| {
            step.start();
            let pr = step.pull_request.get_or_insert_with(Default::default);
            if pr.started_timestamp.is_none() {
                pr.started_timestamp = Some(now());
            }
            pr.status = ActivityStatus::Running;
            pr.pull_request_url = link.to_string();
        })
        .await;
    }

    /// Pull request merged; the environment update starts
    pub async fn pull_request_merged(&self, environments: &[String], merge_sha: &str) {
        self.update(environments, |step| {
            step.start();
            let pr = step.pull_request.get_or_insert_with(Default::default);
            pr.status = ActivityStatus::Succeeded;
            pr.merge_commit_sha = merge_sha.to_string();
            if pr.completed_timestamp.is_none() {
                pr.completed_timestamp = Some(now());
            }
            let update = step.update.get_or_insert_with(Default::default);
            if update.started_timestamp.is_none() {
                update.started_timestamp = Some(now());
            }
            update.status = ActivityStatus::Running;
        })
        .await;
    }

    /// Record the commit statuses reported for the merge commit
    pub async fn update_statuses(&self, environments: &[String], statuses: &[GitStatus]) {
        self.update(environments, |step| {
            let update = step.update.get_or_insert_with(Default::default);
            update.statuses = statuses.to_vec();
        })
        .await;
    }

    pub async fn succeeded(&self, environments: &[String]) {
        self.finish(environments, ActivityStatus::Succeeded).await;
    }

    pub async fn failed(&self, environments: &[String]) {
        self.finish(environments, ActivityStatus::Failed).await;
    }

    async fn finish(&self, environments: &[String], status: ActivityStatus) {
        self.update(environments, |step| {
            let completed = Some(now());
            if let Some(pr) = step.pull_request.as_mut() {
                if !pr.status.is_terminal() {
                    pr.status = status;
                    pr.completed_timestamp = completed.clone();
                }
            }
            if let Some(update) = step.update.as_mut() {
                if !update.status.is_terminal() {
                    update.status = status;
                    update.completed_timestamp = completed.clone();
                }
            }
            step.status = status;
            step.completed_timestamp = completed;
        })
        .await;
    }

    pub async fn set_application_url(&self, environment: &str, url: &str) {
        self.update(&[environment.to_string()], |step| {
            step.application_url = url.to_string();
        })
        .await;
    }

    /// Whether issues were already commented for this environment
    pub async fn issues_commented(&self, environment: &str) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store
            .has_marker(&self.activity, &issues_commented_marker(environment))
            .await
        {
            Ok(marked) => marked,
            Err(e) => {
                tracing::warn!(
                    activity = %self.activity,
                    error = %e,
                    "Failed to read issue comment marker"
                );
                false
            }
        }
    }

    pub async fn mark_issues_commented(&self, environment: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store
                .set_marker(&self.activity, &issues_commented_marker(environment))
                .await
            {
                tracing::warn!(
                    activity = %self.activity,
                    error = %e,
                    "Failed to record issue comment marker"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryActivityStore;

    fn envs() -> Vec<String> {
        vec!["staging".to_string()]
    }

    #[test]
    fn test_activity_name() {
        assert_eq!(activity_name("acme/myapp/main", "12"), "acme-myapp-main-12");
        assert_eq!(activity_name("MyApp", "3"), "myapp-3");
    }

    #[test]
    fn test_promote_step_serialization() {
        let step = PromoteStep {
            environment: "staging".to_string(),
            status: ActivityStatus::Running,
            pull_request: Some(PullRequestStep {
                status: ActivityStatus::Running,
                pull_request_url: "https://github.com/acme/env/pull/1".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["status"], "Running");
        assert_eq!(
            value["pullRequest"]["pullRequestURL"],
            "https://github.com/acme/env/pull/1"
        );
        assert!(value.get("update").is_none());
        assert!(value.get("applicationURL").is_none());
    }

    #[tokio::test]
    async fn test_disabled_tracker_is_noop() {
        let tracker = ActivityTracker::disabled();
        assert!(!tracker.is_enabled());
        tracker.pull_request_created(&envs(), "link").await;
        assert!(!tracker.issues_commented("staging").await);

        let store = Arc::new(MemoryActivityStore::default());
        assert!(!ActivityTracker::new(store, "").is_enabled());
    }

    #[tokio::test]
    async fn test_tracks_promotion_lifecycle() {
        let store = Arc::new(MemoryActivityStore::default());
        let tracker = ActivityTracker::new(store.clone(), "myapp-1");

        tracker
            .pull_request_created(&envs(), "https://github.com/acme/env/pull/1")
            .await;
        let step = store.step("myapp-1", "staging").unwrap();
        assert_eq!(step.status, ActivityStatus::Running);
        assert!(step.started_timestamp.is_some());

        tracker.pull_request_merged(&envs(), "abc123").await;
        tracker
            .update_statuses(
                &envs(),
                &[GitStatus {
                    url: "https://ci/1".to_string(),
                    status: "success".to_string(),
                }],
            )
            .await;
        tracker.succeeded(&envs()).await;

        let step = store.step("myapp-1", "staging").unwrap();
        assert_eq!(step.status, ActivityStatus::Succeeded);
        let pr = step.pull_request.unwrap();
        assert_eq!(pr.status, ActivityStatus::Succeeded);
        assert_eq!(pr.merge_commit_sha, "abc123");
        let update = step.update.unwrap();
        assert_eq!(update.status, ActivityStatus::Succeeded);
        assert_eq!(update.statuses.len(), 1);
        assert!(step.completed_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_failure_marks_running_steps() {
        let store = Arc::new(MemoryActivityStore::default());
        let tracker = ActivityTracker::new(store.clone(), "myapp-1");

        tracker.pull_request_created(&envs(), "link").await;
        tracker.failed(&envs()).await;

        let step = store.step("myapp-1", "staging").unwrap();
        assert_eq!(step.status, ActivityStatus::Failed);
        assert_eq!(step.pull_request.unwrap().status, ActivityStatus::Failed);
    }

    #[tokio::test]
    async fn test_issue_comment_marker() {
        let store = Arc::new(MemoryActivityStore::default());
        let tracker = ActivityTracker::new(store, "myapp-1");

        assert!(!tracker.issues_commented("staging").await);
        tracker.mark_issues_commented("staging").await;
        assert!(tracker.issues_commented("staging").await);
        assert!(!tracker.issues_commented("production").await);
    }

    #[tokio::test]
    async fn test_store_failures_are_not_fatal() {
        let store = Arc::new(MemoryActivityStore::failing());
        let tracker = ActivityTracker::new(store, "myapp-1");

        tracker.pull_request_created(&envs(), "link").await;
        tracker.mark_issues_commented("staging").await;
        assert!(!tracker.issues_commented("staging").await);
    }
}
