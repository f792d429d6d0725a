//! In-memory fakes of the external collaborators, for tests

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::environment::{EnvironmentConfig, EnvironmentProvider};
use crate::domain::git_url::GitRepository;
use crate::domain::pull_request::{CommitStatus, PullRequest, PullRequestInput, PullRequestRef};
use crate::domain::release::{ReleaseNotes, ReleaseSource};
use crate::error::{GitError, ScmError};
use crate::infrastructure::activity::{ActivityStore, PromoteStep};
use crate::infrastructure::git::Gitter;
use crate::infrastructure::scm::{ScmClient, ScmFactory, ScmRepository};

/// Recorded state of a [`FakeScm`]
#[derive(Debug, Default)]
pub struct ScmState {
    pub repositories: HashMap<String, ScmRepository>,
    pub pull_requests: BTreeMap<u64, PullRequest>,
    /// Scripted responses of `find_pull_request`, the last one repeats
    pub polls: VecDeque<PullRequest>,
    pub statuses: HashMap<String, Vec<CommitStatus>>,
    pub created: Vec<PullRequestInput>,
    pub updated: Vec<(u64, PullRequestInput)>,
    pub labelled: Vec<(u64, Vec<String>)>,
    pub merges: Vec<(u64, String)>,
    pub comments: Vec<(String, u64, String)>,
    pub forks: Vec<String>,
    pub polled: usize,
    pub fail_merge: bool,
}

/// Scripted git provider
#[derive(Debug, Default)]
pub struct FakeScm {
    state: Mutex<ScmState>,
}

impl FakeScm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ScmState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_pull_request(&self, pr: PullRequest) {
        self.with(|s| s.pull_requests.insert(pr.number, pr));
    }

    pub fn script_polls(&self, polls: Vec<PullRequest>) {
        self.with(|s| s.polls = polls.into());
    }

    pub fn set_statuses(&self, sha: &str, statuses: Vec<CommitStatus>) {
        self.with(|s| s.statuses.insert(sha.to_string(), statuses));
    }
}

/// An open pull request on `acme/environment-staging`
pub fn pull_request(number: u64) -> PullRequest {
    PullRequest {
        number,
        title: "chore: promote myapp to version 1.2.3".to_string(),
        link: format!("https://github.com/acme/environment-staging/pull/{}", number),
        head: PullRequestRef {
            name: format!("promote-{}", number),
            sha: format!("head-{}", number),
            repository: "acme/environment-staging".to_string(),
        },
        base: PullRequestRef {
            name: "master".to_string(),
            sha: "base".to_string(),
            repository: "acme/environment-staging".to_string(),
        },
        mergeable: Some(true),
        ..Default::default()
    }
}

pub fn status(state: &str, label: &str, target_url: &str) -> CommitStatus {
    CommitStatus {
        state: crate::domain::pull_request::StatusState::parse(state),
        label: label.to_string(),
        description: format!("{} is {}", label, state),
        target_url: target_url.to_string(),
        link: String::new(),
    }
}

#[async_trait]
impl ScmClient for FakeScm {
    async fn current_user(&self) -> Result<String, ScmError> {
        Ok("bot".to_string())
    }

    async fn find_repository(&self, repo: &str) -> Result<Option<ScmRepository>, ScmError> {
        Ok(self.with(|s| s.repositories.get(repo).cloned()))
    }

    async fn fork_repository(&self, repo: &str) -> Result<ScmRepository, ScmError> {
        let name = repo.rsplit('/').next().unwrap_or(repo);
        let fork = ScmRepository {
            full_name: format!("bot/{}", name),
            clone_url: format!("https://github.com/bot/{}.git", name),
            default_branch: "master".to_string(),
            fork: true,
        };
        self.with(|s| {
            s.forks.push(repo.to_string());
            s.repositories.insert(fork.full_name.clone(), fork.clone());
        });
        Ok(fork)
    }

    async fn list_open_pull_requests(
        &self,
        _repo: &str,
        labels: &[String],
    ) -> Result<Vec<PullRequest>, ScmError> {
        Ok(self.with(|s| {
            s.pull_requests
                .values()
                .filter(|pr| pr.is_open() && labels.iter().all(|l| pr.has_label(l)))
                .cloned()
                .collect()
        }))
    }

    async fn find_pull_request(&self, repo: &str, number: u64) -> Result<PullRequest, ScmError> {
        self.with(|s| {
            s.polled += 1;
            let scripted = if s.polls.len() > 1 {
                s.polls.pop_front()
            } else {
                s.polls.front().cloned()
            };
            scripted
                .or_else(|| s.pull_requests.get(&number).cloned())
                .ok_or_else(|| ScmError::NotFound {
                    resource: format!("pull request {}#{}", repo, number),
                })
        })
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        input: &PullRequestInput,
    ) -> Result<PullRequest, ScmError> {
        Ok(self.with(|s| {
            let number = s.pull_requests.keys().max().copied().unwrap_or(0) + 1;
            let pr = PullRequest {
                number,
                title: input.title.clone(),
                body: input.body.clone(),
                link: format!("https://github.com/{}/pull/{}", repo, number),
                head: PullRequestRef {
                    name: input.head.clone(),
                    sha: format!("head-{}", number),
                    repository: repo.to_string(),
                },
                base: PullRequestRef {
                    name: input.base.clone(),
                    sha: "base".to_string(),
                    repository: repo.to_string(),
                },
                draft: input.draft,
                mergeable: Some(true),
                ..Default::default()
            };
            s.created.push(input.clone());
            s.pull_requests.insert(number, pr.clone());
            pr
        }))
    }

    async fn update_pull_request(
        &self,
        repo: &str,
        number: u64,
        input: &PullRequestInput,
    ) -> Result<PullRequest, ScmError> {
        self.with(|s| {
            s.updated.push((number, input.clone()));
            let pr = s
                .pull_requests
                .get_mut(&number)
                .ok_or_else(|| ScmError::NotFound {
                    resource: format!("pull request {}#{}", repo, number),
                })?;
            pr.title = input.title.clone();
            pr.body = input.body.clone();
            Ok(pr.clone())
        })
    }

    async fn add_labels(&self, _repo: &str, number: u64, labels: &[String]) -> Result<(), ScmError> {
        self.with(|s| {
            s.labelled.push((number, labels.to_vec()));
            if let Some(pr) = s.pull_requests.get_mut(&number) {
                pr.labels.extend(labels.iter().cloned());
            }
        });
        Ok(())
    }

    async fn merge_pull_request(
        &self,
        repo: &str,
        number: u64,
        commit_title: &str,
    ) -> Result<(), ScmError> {
        self.with(|s| {
            if s.fail_merge {
                return Err(ScmError::Api {
                    request: format!("merge {}#{}", repo, number),
                    status: 405,
                    message: "not mergeable".to_string(),
                });
            }
            s.merges.push((number, commit_title.to_string()));
            Ok(())
        })
    }

    async fn list_statuses(&self, _repo: &str, sha: &str) -> Result<Vec<CommitStatus>, ScmError> {
        Ok(self.with(|s| s.statuses.get(sha).cloned().unwrap_or_default()))
    }

    async fn create_issue_comment(
        &self,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ScmError> {
        self.with(|s| s.comments.push((repo.to_string(), number, body.to_string())));
        Ok(())
    }
}

/// Hands out the same fake for every repository
pub struct FakeScmFactory(pub Arc<FakeScm>);

impl ScmFactory for FakeScmFactory {
    fn client_for(&self, _repo: &GitRepository) -> Result<Arc<dyn ScmClient>, ScmError> {
        Ok(self.0.clone())
    }
}

pub type Snapshot = BTreeMap<String, String>;

/// Text content of every file under `dir`, keyed by relative path
pub fn snapshot(dir: &Path) -> Snapshot {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry
                .path()
                .strip_prefix(dir)
                .unwrap()
                .to_string_lossy()
                .into_owned();
            let content = std::fs::read_to_string(entry.path()).unwrap_or_default();
            (relative, content)
        })
        .collect()
}

fn copy_dir(from: &Path, to: &Path) {
    for entry in walkdir::WalkDir::new(from).into_iter().filter_map(|e| e.ok()) {
        let target = to.join(entry.path().strip_prefix(from).unwrap());
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).unwrap();
        } else {
            std::fs::copy(entry.path(), &target).unwrap();
        }
    }
}

/// Recorded state of a [`FakeGit`]
#[derive(Debug, Default)]
pub struct GitState {
    pub clones: Vec<(String, Vec<String>)>,
    pub branches: Vec<String>,
    pub commits: Vec<String>,
    pub pushes: Vec<(String, Snapshot)>,
    pub remotes: Vec<(String, String)>,
    pub rebases: Vec<(String, String)>,
    committed: HashMap<PathBuf, Snapshot>,
}

/// Git that "clones" fixture directories and tracks commits in memory
#[derive(Debug, Default)]
pub struct FakeGit {
    fixtures: HashMap<String, PathBuf>,
    state: Mutex<GitState>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve clones of `url` from `fixture`
    pub fn with_fixture(mut self, url: &str, fixture: &Path) -> Self {
        self.fixtures.insert(url.to_string(), fixture.to_path_buf());
        self
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut GitState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    fn commit_count(&self) -> usize {
        self.with(|s| s.commits.len())
    }
}

#[async_trait]
impl Gitter for FakeGit {
    async fn clone_repo(&self, url: &str, dir: &Path, sparse: &[String]) -> Result<(), GitError> {
        let fixture = self.fixtures.get(url).ok_or_else(|| GitError::CommandFailed {
            command: format!("git clone {}", url),
            message: "repository not found".to_string(),
        })?;
        copy_dir(fixture, dir);
        let files = snapshot(dir);
        self.with(|s| {
            s.clones.push((url.to_string(), sparse.to_vec()));
            s.committed.insert(dir.to_path_buf(), files);
        });
        Ok(())
    }

    async fn current_sha(&self, _dir: &Path) -> Result<String, GitError> {
        Ok(format!("sha-{}", self.commit_count()))
    }

    async fn has_changes(&self, dir: &Path) -> Result<bool, GitError> {
        let current = snapshot(dir);
        Ok(self.with(|s| s.committed.get(dir) != Some(&current)))
    }

    async fn create_branch(&self, _dir: &Path, branch: &str) -> Result<(), GitError> {
        self.with(|s| s.branches.push(branch.to_string()));
        Ok(())
    }

    async fn add_and_commit(&self, dir: &Path, message: &str) -> Result<(), GitError> {
        let files = snapshot(dir);
        self.with(|s| {
            s.commits.push(message.to_string());
            s.committed.insert(dir.to_path_buf(), files);
        });
        Ok(())
    }

    async fn force_push(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        let files = snapshot(dir);
        self.with(|s| s.pushes.push((branch.to_string(), files)));
        Ok(())
    }

    async fn add_remote(&self, _dir: &Path, name: &str, url: &str) -> Result<(), GitError> {
        self.with(|s| s.remotes.push((name.to_string(), url.to_string())));
        Ok(())
    }

    async fn pull_rebase(&self, _dir: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        self.with(|s| s.rebases.push((remote.to_string(), branch.to_string())));
        Ok(())
    }

    async fn origin_url(&self, _dir: &Path) -> Result<Option<String>, GitError> {
        Ok(None)
    }
}

/// Activity store kept in memory
#[derive(Debug, Default)]
pub struct MemoryActivityStore {
    steps: Mutex<HashMap<(String, String), PromoteStep>>,
    markers: Mutex<HashSet<(String, String)>>,
    fail: bool,
}

impl MemoryActivityStore {
    /// A store whose every operation fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn step(&self, activity: &str, environment: &str) -> Option<PromoteStep> {
        self.steps
            .lock()
            .unwrap()
            .get(&(activity.to_string(), environment.to_string()))
            .cloned()
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            anyhow::bail!("activity store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn load_step(&self, activity: &str, environment: &str) -> Result<Option<PromoteStep>> {
        self.check()?;
        Ok(self.step(activity, environment))
    }

    async fn save_step(&self, activity: &str, step: &PromoteStep) -> Result<()> {
        self.check()?;
        self.steps.lock().unwrap().insert(
            (activity.to_string(), step.environment.clone()),
            step.clone(),
        );
        Ok(())
    }

    async fn has_marker(&self, activity: &str, marker: &str) -> Result<bool> {
        self.check()?;
        Ok(self
            .markers
            .lock()
            .unwrap()
            .contains(&(activity.to_string(), marker.to_string())))
    }

    async fn set_marker(&self, activity: &str, marker: &str) -> Result<()> {
        self.check()?;
        self.markers
            .lock()
            .unwrap()
            .insert((activity.to_string(), marker.to_string()));
        Ok(())
    }
}

/// Releases and service URLs kept in memory
#[derive(Debug, Default)]
pub struct MemoryReleases {
    pub releases: HashMap<(String, String), ReleaseNotes>,
    pub urls: HashMap<(String, String), String>,
}

#[async_trait]
impl ReleaseSource for MemoryReleases {
    async fn find_release(&self, namespace: &str, name: &str) -> Result<Option<ReleaseNotes>> {
        Ok(self
            .releases
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn application_url(&self, namespace: &str, services: &[String]) -> Result<Option<String>> {
        Ok(services
            .iter()
            .find_map(|name| self.urls.get(&(namespace.to_string(), name.clone())).cloned()))
    }
}

/// A fixed list of environments
#[derive(Debug, Default)]
pub struct StaticEnvironments {
    pub environments: Vec<EnvironmentConfig>,
}

#[async_trait]
impl EnvironmentProvider for StaticEnvironments {
    async fn list_environments(&self) -> Result<Vec<EnvironmentConfig>> {
        Ok(self.environments.clone())
    }

    async fn git_url_for_environment(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .environments
            .iter()
            .find(|env| env.key == key)
            .map(|env| env.git_url.clone())
            .filter(|url| !url.is_empty()))
    }
}
