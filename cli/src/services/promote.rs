//! Promotion service - drives a promotion end to end
//!
//! Selects the target environments, groups them by repository, raises one
//! pull request per group and, unless told otherwise, waits for each to be
//! merged before moving on to the next group.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use tracing::{debug, info, warn};

use crate::config::discovery::discover;
use crate::config::options::PromoteOptions;
use crate::domain::chart::ChartResolver;
use crate::domain::environment::{
    group_environments, select_environments, EnvironmentConfig, EnvironmentProvider,
    EnvironmentSelection, PromotionGroup, DEV_ENVIRONMENT,
};
use crate::domain::git_url::GitRepository;
use crate::domain::pull_request::{
    dependency_label, environment_label, PullRequest, HOLD_LABEL,
};
use crate::domain::release::{
    commit_title, issue_comment, valid_name_with_dots, PromotionPhase, PromotionResult,
    ReleaseInfo, ReleaseSource,
};
use crate::domain::template::TemplateContext;
use crate::error::{PromoteError, RuleError};
use crate::infrastructure::activity::ActivityTracker;
use crate::infrastructure::git::Gitter;
use crate::infrastructure::scm::ScmFactory;
use crate::rules::{self, RuleContext};
use crate::services::pull_request::{ChangeSet, PullRequestOptions, PullRequestOrchestrator};
use crate::services::reconcile::{
    PromotionNotifier, ReconcileOptions, Rebaser, Reconciler,
};
use crate::ui;

const PULL_REQUEST_BODY: &str = "this commit will trigger a pipeline to generate the actual \
kubernetes resources to perform the promotion which will create a second commit on this pull \
request before it can merge";

/// Pause between raising a pull request and the first poll
const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Promotes one application version to a set of environments
pub struct PromoteService<'a> {
    options: PromoteOptions,
    environments: &'a dyn EnvironmentProvider,
    scm: &'a dyn ScmFactory,
    git: &'a dyn Gitter,
    releases: Option<&'a dyn ReleaseSource>,
    tracker: ActivityTracker,
    charts: ChartResolver,
}

struct GroupOutcome {
    phase: PromotionPhase,
    pull_request: Option<String>,
}

impl<'a> PromoteService<'a> {
    pub fn new(
        options: PromoteOptions,
        environments: &'a dyn EnvironmentProvider,
        scm: &'a dyn ScmFactory,
        git: &'a dyn Gitter,
    ) -> Self {
        Self {
            options,
            environments,
            scm,
            git,
            releases: None,
            tracker: ActivityTracker::disabled(),
            charts: ChartResolver::default(),
        }
    }

    /// Look up release notes and application URLs for issue comments
    pub fn with_releases(mut self, releases: &'a dyn ReleaseSource) -> Self {
        self.releases = Some(releases);
        self
    }

    pub fn with_tracker(mut self, tracker: ActivityTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_charts(mut self, charts: ChartResolver) -> Self {
        self.charts = charts;
        self
    }

    /// Run the promotion, one result per group of environments
    ///
    /// Stops at the first group that fails.
    pub async fn execute(&self) -> Result<Vec<PromotionResult>> {
        self.options.validate().map_err(|errors| {
            anyhow!("Invalid promotion options:\n  {}", errors.join("\n  "))
        })?;

        let all = self
            .environments
            .list_environments()
            .await
            .context("Failed to list environments")?;
        let selected = select_environments(&all, &self.options.selection)?;
        if selected.is_empty() {
            bail!(
                "No environments to promote {} to for the selection {:?}",
                self.options.app,
                self.options.selection
            );
        }

        let dev_git_url = self
            .environments
            .git_url_for_environment(DEV_ENVIRONMENT)
            .await
            .context("Failed to find the development environment repository")?;
        let draft_manual = self.options.selection == EnvironmentSelection::All;
        let groups = group_environments(selected, dev_git_url.as_deref(), draft_manual)?;

        self.print_header(&groups);
        if self.tracker.is_enabled() {
            debug!("Recording promotion in activity {}", self.tracker.activity());
        }

        let mut results = Vec::new();
        for group in &groups {
            info!("Promoting to {} through {}", group.display_name(), group.git_url);

            let start = Instant::now();
            let outcome = self.promote_group(group).await;
            let duration = start.elapsed();

            match outcome {
                Ok(outcome) => results.push(PromotionResult {
                    environments: group.display_name(),
                    pull_request: outcome.pull_request,
                    phase: outcome.phase,
                    duration,
                    message: None,
                }),
                Err(e) => {
                    let msg = format!("{:#}", e);
                    info!("{} {} failed: {}", "❌".red(), group.display_name(), msg);
                    results.push(PromotionResult {
                        environments: group.display_name(),
                        pull_request: None,
                        phase: PromotionPhase::Failed,
                        duration,
                        message: Some(msg),
                    });

                    // Later groups are never attempted after a failure
                    self.print_summary(&results);
                    return Err(e);
                }
            }
        }

        self.print_summary(&results);
        Ok(results)
    }

    async fn promote_group(&self, group: &PromotionGroup) -> Result<GroupOutcome> {
        let repository = GitRepository::parse(&group.git_url)?;
        let scm = self.scm.client_for(&repository)?;
        let pr_options = self.pull_request_options(group);

        let change = EnvironmentChange {
            options: &self.options,
            environments: &group.environments,
            charts: &self.charts,
        };
        let orchestrator = PullRequestOrchestrator::new(scm.as_ref(), self.git);

        let Some(pr) = orchestrator
            .create_or_update(&pr_options, None, &change)
            .await?
        else {
            ui::print_info(&format!(
                "{} {} is already promoted to {}",
                self.options.app,
                self.options.version,
                group.display_name()
            ));
            return Ok(GroupOutcome {
                phase: PromotionPhase::Unchanged,
                pull_request: None,
            });
        };

        let keys = group.keys();
        self.tracker.pull_request_created(&keys, &pr.link).await;
        ui::print_success(&format!("Pull request {} ready", pr.link));

        if self.options.no_poll || group.draft {
            if group.draft {
                ui::print_warning(&format!(
                    "{} needs manual approval, merge {} to promote",
                    group.display_name(),
                    pr.link
                ));
            }
            return Ok(GroupOutcome {
                phase: PromotionPhase::PullRequestOpen,
                pull_request: Some(pr.link),
            });
        }

        tokio::time::sleep(SETTLE_DELAY).await;

        let rebaser = GroupRebaser {
            orchestrator: &orchestrator,
            options: &pr_options,
            change: &change,
        };
        let notifier = IssueNotifier {
            options: &self.options,
            environments: &group.environments,
            releases: self.releases,
            scm: self.scm,
            tracker: &self.tracker,
        };
        let reconciler = Reconciler::new(
            scm.as_ref(),
            repository.full_name(),
            keys,
            ReconcileOptions {
                timeout: self.options.timeout,
                poll_interval: self.options.poll_interval,
                no_wait_after_merge: self.options.no_wait,
                merge: !self.options.no_merge,
                wait_for_pipeline: self.options.wait_for_pipeline,
            },
            &self.tracker,
            &rebaser,
            &notifier,
        );
        let pr = reconciler.wait(pr).await?;

        Ok(GroupOutcome {
            phase: PromotionPhase::Succeeded,
            pull_request: Some(pr.link),
        })
    }

    fn pull_request_options(&self, group: &PromotionGroup) -> PullRequestOptions {
        let options = &self.options;

        let mut labels: Vec<String> = group
            .environments
            .iter()
            .map(|env| environment_label(&env.key))
            .collect();
        labels.push(dependency_label(&options.app));
        if group.draft {
            labels.push(HOLD_LABEL.to_string());
        }

        let mut body = PULL_REQUEST_BODY.to_string();
        if !options.changelog.is_empty() {
            body.push_str("\n\n");
            body.push_str(&options.changelog);
        }

        PullRequestOptions {
            git_url: group.git_url.clone(),
            title: commit_title(&options.app, &options.version, &group.display_name()),
            body,
            labels,
            auto_merge: options.auto_merge && !group.draft,
            draft: group.draft,
            fork: options.fork,
            sparse_checkout: options.sparse_checkout,
            reuse: options.reuse_pull_request,
            git_user: options.git_user.clone(),
            git_token: options.git_token.clone(),
        }
    }

    fn print_header(&self, groups: &[PromotionGroup]) {
        for group in groups {
            info!(draft = group.draft, "{} -> {}", group.display_name(), group.git_url);
        }
        ui::print_plan(&self.options.app, &self.options.version, groups);
    }

    fn print_summary(&self, results: &[PromotionResult]) {
        ui::print_summary(&self.options.app, &self.options.version, results);
    }
}

/// Applies the promotion rule of every environment in a group
struct EnvironmentChange<'a> {
    options: &'a PromoteOptions,
    environments: &'a [EnvironmentConfig],
    charts: &'a ChartResolver,
}

impl EnvironmentChange<'_> {
    fn namespace(&self, env: &EnvironmentConfig) -> String {
        if self.options.namespace.is_empty() {
            env.namespace()
        } else {
            self.options.namespace.clone()
        }
    }

    async fn apply_environment(
        &self,
        dir: &Path,
        env: &EnvironmentConfig,
    ) -> Result<(), PromoteError> {
        let namespace = self.namespace(env);
        let discovered = discover(dir, &namespace)?;
        let rule = &discovered.config.rule;

        if rule.needs_app_git_url() && self.options.app_git_url.is_empty() {
            return Err(RuleError::MissingField {
                field: format!(
                    "application git URL of the {} rule, use --app-git-url",
                    rule.kind()
                ),
            }
            .into());
        }

        let ctx = RuleContext {
            dir: dir.to_path_buf(),
            template: TemplateContext {
                git_url: self.options.app_git_url.clone(),
                version: self.options.version.clone(),
                app_name: self.options.app.clone(),
                chart_alias: self.options.alias.clone(),
                namespace,
                helm_repository_url: self.options.helm_repository_url.clone(),
                release_name: self.options.release_name.clone(),
            },
            charts: self.charts.clone(),
            remote_cluster: env.remote_cluster,
        };
        rules::apply(rule, &ctx).await?;
        Ok(())
    }
}

#[async_trait]
impl ChangeSet for EnvironmentChange<'_> {
    async fn apply(&self, dir: &Path) -> Result<()> {
        for env in self.environments {
            self.apply_environment(dir, env)
                .await
                .with_context(|| format!("Failed to promote to environment {}", env.key))?;
        }
        Ok(())
    }
}

/// Re-raises a conflicting pull request from a fresh clone of its base
struct GroupRebaser<'a> {
    orchestrator: &'a PullRequestOrchestrator<'a>,
    options: &'a PullRequestOptions,
    change: &'a EnvironmentChange<'a>,
}

#[async_trait]
impl Rebaser for GroupRebaser<'_> {
    async fn rebase(&self, pr: &PullRequest) -> Result<Option<PullRequest>> {
        self.orchestrator
            .create_or_update(self.options, Some(pr.clone()), self.change)
            .await
    }
}

/// Comments on the issues a promoted release fixed
struct IssueNotifier<'a> {
    options: &'a PromoteOptions,
    environments: &'a [EnvironmentConfig],
    releases: Option<&'a dyn ReleaseSource>,
    scm: &'a dyn ScmFactory,
    tracker: &'a ActivityTracker,
}

impl IssueNotifier<'_> {
    async fn notify(&self, releases: &dyn ReleaseSource, env: &EnvironmentConfig) -> Result<()> {
        let app = &self.options.app;
        let version = &self.options.version;
        let namespace = if self.options.namespace.is_empty() {
            env.namespace()
        } else {
            self.options.namespace.clone()
        };

        let info = ReleaseInfo::new(app, version, &namespace, Some(&self.options.release_name));
        let mut services = vec![app.clone(), info.release_name.clone()];
        let prefixed = format!("{}-{}", namespace, app);
        if !services.contains(&prefixed) {
            services.push(prefixed);
        }
        services.dedup();

        let app_url = releases
            .application_url(&namespace, &services)
            .await?
            .unwrap_or_default();
        if !app_url.is_empty() {
            info!("Application is available at {}", app_url);
            self.tracker.set_application_url(&env.key, &app_url).await;
        }

        if self.tracker.issues_commented(&env.key).await {
            debug!(environment = %env.key, "Issues already commented");
            return Ok(());
        }

        let release_name = valid_name_with_dots(&format!("{}-{}", app, version));
        let Some(notes) = releases.find_release(&namespace, &release_name).await? else {
            debug!("No release {} in {}", release_name, namespace);
            return Ok(());
        };

        let closed: Vec<u64> = notes
            .issues
            .iter()
            .filter(|issue| issue.is_closed())
            .filter_map(|issue| issue.number())
            .collect();
        if closed.is_empty() {
            return Ok(());
        }

        let source = if notes.git_http_url.is_empty() {
            self.options.app_git_url.as_str()
        } else {
            notes.git_http_url.as_str()
        };
        let repository = GitRepository::parse(source)?;
        let scm = self.scm.client_for(&repository)?;

        let env_name = if env.label.is_empty() { &env.key } else { &env.label };
        let comment = issue_comment(env_name, version, &notes.release_notes_url, &app_url);
        for number in closed {
            scm.create_issue_comment(&repository.full_name(), number, &comment)
                .await
                .with_context(|| {
                    format!("Failed to comment on issue {}#{}", repository.full_name(), number)
                })?;
        }
        self.tracker.mark_issues_commented(&env.key).await;
        Ok(())
    }
}

#[async_trait]
impl PromotionNotifier for IssueNotifier<'_> {
    async fn promoted(&self) {
        let Some(releases) = self.releases else {
            return;
        };
        for env in self.environments {
            if let Err(e) = self.notify(releases, env).await {
                warn!(environment = %env.key, error = %e, "Failed to comment on fixed issues");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::environment::PromotionStrategy;
    use crate::domain::release::{IssueSummary, ReleaseNotes};
    use crate::infrastructure::activity::ActivityStatus;
    use crate::testing::{
        FakeGit, FakeScm, FakeScmFactory, MemoryActivityStore, MemoryReleases,
        StaticEnvironments,
    };

    const GIT_URL: &str = "https://github.com/acme/environment-staging.git";

    fn environment(key: &str, strategy: PromotionStrategy) -> EnvironmentConfig {
        EnvironmentConfig {
            git_url: GIT_URL.to_string(),
            promotion_strategy: strategy,
            ..EnvironmentConfig::new(key)
        }
    }

    fn environments() -> StaticEnvironments {
        StaticEnvironments {
            environments: vec![
                environment("staging", PromotionStrategy::Automatic),
                environment("production", PromotionStrategy::Manual),
            ],
        }
    }

    fn options(selection: EnvironmentSelection) -> PromoteOptions {
        PromoteOptions {
            app: "myapp".to_string(),
            version: "1.2.3".to_string(),
            selection,
            no_poll: true,
            ..Default::default()
        }
    }

    fn helmfile_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("helmfile.yaml"), "releases: []\n").unwrap();
        dir
    }

    fn merged(number: u64) -> PullRequest {
        PullRequest {
            merged: true,
            closed: true,
            merge_sha: Some("merge-sha".to_string()),
            ..crate::testing::pull_request(number)
        }
    }

    #[tokio::test]
    async fn test_raises_pull_request_for_named_environment() {
        let fixture = helmfile_fixture();
        let git = FakeGit::new().with_fixture(GIT_URL, fixture.path());
        let scm = Arc::new(FakeScm::new());
        let factory = FakeScmFactory(scm.clone());
        let envs = environments();

        let service = PromoteService::new(
            options(EnvironmentSelection::Named("staging".to_string())),
            &envs,
            &factory,
            &git,
        );
        let results = tokio_test::assert_ok!(service.execute().await);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].phase, PromotionPhase::PullRequestOpen);
        assert_eq!(
            results[0].pull_request.as_deref(),
            Some("https://github.com/acme/environment-staging/pull/1")
        );

        scm.with(|s| {
            assert_eq!(s.created.len(), 1);
            assert_eq!(
                s.created[0].title,
                "chore: promote myapp to version 1.2.3 in staging"
            );
            assert!(!s.created[0].draft);
            let labels = &s.labelled[0].1;
            assert!(labels.contains(&"env/staging".to_string()));
            assert!(labels.contains(&"dependency/myapp".to_string()));
        });

        git.with(|s| {
            let (_, files) = s.pushes.last().unwrap();
            let helmfile = &files["helmfile.yaml"];
            assert!(helmfile.contains("myapp"));
            assert!(helmfile.contains("1.2.3"));
            assert!(helmfile.contains("jx-staging"));
        });
    }

    #[tokio::test]
    async fn test_all_raises_draft_for_manual_environments() {
        let fixture = helmfile_fixture();
        let git = FakeGit::new().with_fixture(GIT_URL, fixture.path());
        let scm = Arc::new(FakeScm::new());
        let factory = FakeScmFactory(scm.clone());
        let envs = environments();

        let mut opts = options(EnvironmentSelection::All);
        opts.auto_merge = true;
        let service = PromoteService::new(opts, &envs, &factory, &git);
        let results = service.execute().await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].environments, "staging");
        assert_eq!(results[1].environments, "production");

        scm.with(|s| {
            assert_eq!(s.created.len(), 2);
            assert!(!s.created[0].draft);
            assert!(s.created[1].draft);

            let staging = &s.labelled[0].1;
            assert!(staging.contains(&"updatebot".to_string()));
            let production = &s.labelled[1].1;
            assert!(production.contains(&HOLD_LABEL.to_string()));
            assert!(!production.contains(&"updatebot".to_string()));
        });
    }

    #[tokio::test]
    async fn test_no_matching_environments_fails() {
        let git = FakeGit::new();
        let factory = FakeScmFactory(Arc::new(FakeScm::new()));
        let envs = StaticEnvironments {
            environments: vec![environment("production", PromotionStrategy::Manual)],
        };

        let service = PromoteService::new(
            options(EnvironmentSelection::AllAutomatic),
            &envs,
            &factory,
            &git,
        );
        let err = tokio_test::assert_err!(service.execute().await);
        assert!(err.to_string().contains("No environments to promote myapp"));
    }

    #[tokio::test]
    async fn test_invalid_options_are_reported_together() {
        let git = FakeGit::new();
        let factory = FakeScmFactory(Arc::new(FakeScm::new()));
        let envs = environments();

        let mut opts = options(EnvironmentSelection::Named(String::new()));
        opts.app = String::new();
        let service = PromoteService::new(opts, &envs, &factory, &git);
        let err = service.execute().await.unwrap_err().to_string();
        assert!(err.contains("application name is required"));
        assert!(err.contains("an environment is required"));
    }

    #[tokio::test]
    async fn test_kpt_rule_requires_app_git_url() {
        let fixture = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(fixture.path().join(".jx")).unwrap();
        std::fs::write(
            fixture.path().join(".jx").join("promote.yaml"),
            "spec:\n  kptRule:\n    path: config-root\n",
        )
        .unwrap();
        let git = FakeGit::new().with_fixture(GIT_URL, fixture.path());
        let scm = Arc::new(FakeScm::new());
        let factory = FakeScmFactory(scm.clone());
        let envs = environments();

        let service = PromoteService::new(
            options(EnvironmentSelection::Named("staging".to_string())),
            &envs,
            &factory,
            &git,
        );
        let err = service.execute().await.unwrap_err();
        assert!(format!("{:#}", err).contains("--app-git-url"));
        scm.with(|s| assert!(s.created.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_merge_and_comments_on_issues() {
        let fixture = helmfile_fixture();
        let git = FakeGit::new().with_fixture(GIT_URL, fixture.path());
        let scm = Arc::new(FakeScm::new());
        scm.script_polls(vec![merged(1)]);
        let factory = FakeScmFactory(scm.clone());
        let envs = environments();

        let mut releases = MemoryReleases::default();
        releases.releases.insert(
            ("jx-staging".to_string(), "myapp-1.2.3".to_string()),
            ReleaseNotes {
                name: "myapp".to_string(),
                version: "1.2.3".to_string(),
                release_notes_url: "https://github.com/acme/myapp/releases/tag/v1.2.3".to_string(),
                git_http_url: "https://github.com/acme/myapp".to_string(),
                issues: vec![
                    IssueSummary {
                        id: "12".to_string(),
                        state: "closed".to_string(),
                        ..Default::default()
                    },
                    IssueSummary {
                        id: "13".to_string(),
                        state: "open".to_string(),
                        ..Default::default()
                    },
                ],
            },
        );
        releases.urls.insert(
            ("jx-staging".to_string(), "myapp".to_string()),
            "http://myapp.staging.example.com".to_string(),
        );

        let store = Arc::new(MemoryActivityStore::default());
        let tracker = ActivityTracker::new(store.clone(), "acme-myapp-main-1");

        let mut opts = options(EnvironmentSelection::Named("staging".to_string()));
        opts.no_poll = false;
        let service = PromoteService::new(opts.clone(), &envs, &factory, &git)
            .with_releases(&releases)
            .with_tracker(tracker.clone());

        let results = service.execute().await.unwrap();
        assert_eq!(results[0].phase, PromotionPhase::Succeeded);

        scm.with(|s| {
            assert_eq!(s.comments.len(), 1);
            let (repo, number, body) = &s.comments[0];
            assert_eq!(repo, "acme/myapp");
            assert_eq!(*number, 12);
            assert!(body.contains("**staging**"));
            assert!(body.contains("http://myapp.staging.example.com"));
        });

        let step = store.step("acme-myapp-main-1", "staging").unwrap();
        assert_eq!(step.status, ActivityStatus::Succeeded);
        assert_eq!(step.application_url, "http://myapp.staging.example.com");
        assert_eq!(
            step.pull_request.unwrap().merge_commit_sha,
            "merge-sha".to_string()
        );

        // A second run of the same activity does not comment again
        let service = PromoteService::new(opts, &envs, &factory, &git)
            .with_releases(&releases)
            .with_tracker(tracker);
        service.execute().await.unwrap();
        scm.with(|s| assert_eq!(s.comments.len(), 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_pull_request_fails_promotion() {
        let fixture = helmfile_fixture();
        let git = FakeGit::new().with_fixture(GIT_URL, fixture.path());
        let scm = Arc::new(FakeScm::new());
        scm.script_polls(vec![PullRequest {
            closed: true,
            ..crate::testing::pull_request(1)
        }]);
        let factory = FakeScmFactory(scm.clone());
        let envs = environments();

        let mut opts = options(EnvironmentSelection::Named("staging".to_string()));
        opts.no_poll = false;
        let service = PromoteService::new(opts, &envs, &factory, &git);
        let err = service.execute().await.unwrap_err();
        assert!(err.to_string().contains("is closed without merging"));
    }
}
