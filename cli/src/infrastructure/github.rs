//! GitHub REST client
//!
//! Implements [`ScmClient`] against the GitHub v3 API (github.com or a
//! GitHub Enterprise server under `/api/v3`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::scm::{GitKind, ScmClient, ScmFactory, ScmRepository};
use crate::domain::git_url::GitRepository;
use crate::domain::pull_request::{
    trim_link, CommitStatus, PullRequest, PullRequestInput, PullRequestRef, StatusState,
};
use crate::error::ScmError;

const GITHUB_API: &str = "https://api.github.com";

/// GitHub API client
pub struct GitHubClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhRepository {
    full_name: String,
    #[serde(default)]
    clone_url: String,
    #[serde(default)]
    default_branch: String,
    #[serde(default)]
    fork: bool,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhRef {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: String,
    repo: Option<GhRepository>,
}

#[derive(Debug, Deserialize)]
struct GhPullRequest {
    number: u64,
    #[serde(default)]
    title: String,
    body: Option<String>,
    html_url: String,
    state: String,
    #[serde(default)]
    merged: bool,
    merged_at: Option<String>,
    merge_commit_sha: Option<String>,
    mergeable: Option<bool>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    labels: Vec<GhLabel>,
    head: GhRef,
    base: GhRef,
}

#[derive(Debug, Deserialize)]
struct GhStatus {
    state: String,
    context: Option<String>,
    description: Option<String>,
    target_url: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatePullRequestRequest<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
    draft: bool,
}

#[derive(Debug, Serialize)]
struct UpdatePullRequestRequest<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct LabelsRequest<'a> {
    labels: &'a [String],
}

#[derive(Debug, Serialize)]
struct MergeRequest<'a> {
    commit_title: &'a str,
    merge_method: &'a str,
}

#[derive(Debug, Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

impl From<GhRepository> for ScmRepository {
    fn from(repo: GhRepository) -> Self {
        Self {
            full_name: repo.full_name,
            clone_url: repo.clone_url,
            default_branch: repo.default_branch,
            fork: repo.fork,
        }
    }
}

impl From<GhRef> for PullRequestRef {
    fn from(r: GhRef) -> Self {
        Self {
            name: r.ref_name,
            sha: r.sha,
            repository: r.repo.map(|repo| repo.full_name).unwrap_or_default(),
        }
    }
}

impl From<GhPullRequest> for PullRequest {
    fn from(pr: GhPullRequest) -> Self {
        let merged = pr.merged || pr.merged_at.is_some();
        Self {
            number: pr.number,
            title: pr.title,
            body: pr.body.unwrap_or_default(),
            link: trim_link(&pr.html_url),
            head: pr.head.into(),
            base: pr.base.into(),
            merged,
            merge_sha: if merged {
                pr.merge_commit_sha.filter(|sha| !sha.is_empty())
            } else {
                None
            },
            closed: pr.state == "closed",
            mergeable: pr.mergeable,
            labels: pr.labels.into_iter().map(|l| l.name).collect(),
            draft: pr.draft,
        }
    }
}

impl From<GhStatus> for CommitStatus {
    fn from(status: GhStatus) -> Self {
        Self {
            state: StatusState::parse(&status.state),
            label: status.context.unwrap_or_default(),
            description: status.description.unwrap_or_default(),
            target_url: status.target_url.unwrap_or_default(),
            link: status.url.unwrap_or_default(),
        }
    }
}

impl GitHubClient {
    /// Create a client for the git server at `server_url`
    pub fn new(server_url: &str, token: Option<String>) -> Result<Self, ScmError> {
        let server = server_url.trim_end_matches('/');
        let base_url = if server.is_empty() || server.ends_with("://github.com") {
            GITHUB_API.to_string()
        } else {
            format!("{}/api/v3", server)
        };
        Self::with_base_url(base_url, token)
    }

    /// Create a client talking to an explicit API base URL
    pub fn with_base_url(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ScmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("promote/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self
            .client
            .request(method, &url)
            .header("Accept", "application/vnd.github+json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, request: &str) -> Result<Response, ScmError> {
        debug!("GitHub request {}", request);
        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(ScmError::NotFound {
                resource: request.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScmError::Api {
                request: request.to_string(),
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ScmClient for GitHubClient {
    async fn current_user(&self) -> Result<String, ScmError> {
        let builder = self.request(reqwest::Method::GET, "/user");
        let user: GhUser = self.send(builder, "get current user").await?.json().await?;
        Ok(user.login)
    }

    async fn find_repository(&self, repo: &str) -> Result<Option<ScmRepository>, ScmError> {
        let builder = self.request(reqwest::Method::GET, &format!("/repos/{}", repo));
        match self.send(builder, &format!("repository {}", repo)).await {
            Ok(response) => {
                let repository: GhRepository = response.json().await?;
                Ok(Some(repository.into()))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fork_repository(&self, repo: &str) -> Result<ScmRepository, ScmError> {
        let builder = self.request(reqwest::Method::POST, &format!("/repos/{}/forks", repo));
        let repository: GhRepository = self
            .send(builder, &format!("fork {}", repo))
            .await?
            .json()
            .await?;
        Ok(repository.into())
    }

    async fn list_open_pull_requests(
        &self,
        repo: &str,
        labels: &[String],
    ) -> Result<Vec<PullRequest>, ScmError> {
        let builder = self
            .request(reqwest::Method::GET, &format!("/repos/{}/pulls", repo))
            .query(&[("state", "open"), ("per_page", "100")]);
        let pulls: Vec<GhPullRequest> = self
            .send(builder, &format!("pull requests of {}", repo))
            .await?
            .json()
            .await?;

        Ok(pulls
            .into_iter()
            .map(PullRequest::from)
            .filter(|pr| labels.iter().all(|label| pr.has_label(label)))
            .collect())
    }

    async fn find_pull_request(&self, repo: &str, number: u64) -> Result<PullRequest, ScmError> {
        let builder = self.request(
            reqwest::Method::GET,
            &format!("/repos/{}/pulls/{}", repo, number),
        );
        let pr: GhPullRequest = self
            .send(builder, &format!("pull request {}#{}", repo, number))
            .await?
            .json()
            .await?;
        Ok(pr.into())
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        input: &PullRequestInput,
    ) -> Result<PullRequest, ScmError> {
        let body = CreatePullRequestRequest {
            title: &input.title,
            head: &input.head,
            base: &input.base,
            body: &input.body,
            draft: input.draft,
        };
        let builder = self
            .request(reqwest::Method::POST, &format!("/repos/{}/pulls", repo))
            .json(&body);
        let pr: GhPullRequest = self
            .send(builder, &format!("create pull request on {}", repo))
            .await?
            .json()
            .await?;
        Ok(pr.into())
    }

    async fn update_pull_request(
        &self,
        repo: &str,
        number: u64,
        input: &PullRequestInput,
    ) -> Result<PullRequest, ScmError> {
        let body = UpdatePullRequestRequest {
            title: &input.title,
            body: &input.body,
        };
        let builder = self
            .request(
                reqwest::Method::PATCH,
                &format!("/repos/{}/pulls/{}", repo, number),
            )
            .json(&body);
        let pr: GhPullRequest = self
            .send(builder, &format!("update pull request {}#{}", repo, number))
            .await?
            .json()
            .await?;
        Ok(pr.into())
    }

    async fn add_labels(&self, repo: &str, number: u64, labels: &[String]) -> Result<(), ScmError> {
        if labels.is_empty() {
            return Ok(());
        }
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{}/issues/{}/labels", repo, number),
            )
            .json(&LabelsRequest { labels });
        self.send(builder, &format!("label {}#{}", repo, number))
            .await?;
        Ok(())
    }

    async fn merge_pull_request(
        &self,
        repo: &str,
        number: u64,
        commit_title: &str,
    ) -> Result<(), ScmError> {
        let builder = self
            .request(
                reqwest::Method::PUT,
                &format!("/repos/{}/pulls/{}/merge", repo, number),
            )
            .json(&MergeRequest {
                commit_title,
                merge_method: "merge",
            });
        self.send(builder, &format!("merge {}#{}", repo, number))
            .await?;
        Ok(())
    }

    async fn list_statuses(&self, repo: &str, sha: &str) -> Result<Vec<CommitStatus>, ScmError> {
        let builder = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{}/commits/{}/statuses", repo, sha),
            )
            .query(&[("per_page", "100")]);
        let statuses: Vec<GhStatus> = self
            .send(builder, &format!("statuses of {}@{}", repo, sha))
            .await?
            .json()
            .await?;
        Ok(statuses.into_iter().map(CommitStatus::from).collect())
    }

    async fn create_issue_comment(
        &self,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ScmError> {
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{}/issues/{}/comments", repo, number),
            )
            .json(&CommentRequest { body });
        self.send(builder, &format!("comment on {}#{}", repo, number))
            .await?;
        Ok(())
    }
}

/// Creates GitHub clients authenticated with one token
pub struct GitHubFactory {
    kind: String,
    token: Option<String>,
}

impl GitHubFactory {
    pub fn new(kind: impl Into<String>, token: Option<String>) -> Self {
        Self {
            kind: kind.into(),
            token,
        }
    }
}

impl ScmFactory for GitHubFactory {
    fn client_for(&self, repo: &GitRepository) -> Result<Arc<dyn ScmClient>, ScmError> {
        match GitKind::resolve(&self.kind, &repo.host)? {
            GitKind::GitHub => {
                let client = GitHubClient::new(&repo.server_url(), self.token.clone())?;
                debug!("Using GitHub API at {} for {}", client.base_url(), repo.full_name());
                Ok(Arc::new(client))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pr_json(number: u64, state: &str, merged: bool, labels: &[&str]) -> serde_json::Value {
        json!({
            "number": number,
            "title": "chore: promote myapp to version 1.0.0",
            "body": null,
            "html_url": format!("https://github.com/acme/env/pull/{}", number),
            "state": state,
            "merged": merged,
            "merged_at": if merged { json!("2024-01-01T00:00:00Z") } else { json!(null) },
            "merge_commit_sha": "abc123",
            "mergeable": true,
            "labels": labels.iter().map(|l| json!({"name": l})).collect::<Vec<_>>(),
            "head": {"ref": "promote-1", "sha": "head-sha", "repo": {"full_name": "acme/env"}},
            "base": {"ref": "main", "sha": "base-sha", "repo": {"full_name": "acme/env"}}
        })
    }

    fn client(server: &MockServer) -> GitHubClient {
        GitHubClient::with_base_url(server.uri(), Some("token".to_string())).unwrap()
    }

    #[test]
    fn test_api_base_url() {
        let public = GitHubClient::new("https://github.com", None).unwrap();
        assert_eq!(public.base_url(), "https://api.github.com");
        let enterprise = GitHubClient::new("https://git.acme.io/", None).unwrap();
        assert_eq!(enterprise.base_url(), "https://git.acme.io/api/v3");
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let repo = GitRepository::parse("https://gitlab.com/acme/env.git").unwrap();
        assert!(GitHubFactory::new("", None).client_for(&repo).is_err());
        let repo = GitRepository::parse("https://github.com/acme/env.git").unwrap();
        assert!(GitHubFactory::new("", None).client_for(&repo).is_ok());
    }

    #[tokio::test]
    async fn test_find_pull_request_merged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/env/pulls/5"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pr_json(5, "closed", true, &[])))
            .mount(&server)
            .await;

        let pr = client(&server).find_pull_request("acme/env", 5).await.unwrap();
        assert!(pr.merged);
        assert!(pr.closed);
        assert_eq!(pr.merge_sha.as_deref(), Some("abc123"));
        assert_eq!(pr.head.name, "promote-1");
        assert_eq!(pr.link, "https://github.com/acme/env/pull/5");
    }

    #[tokio::test]
    async fn test_unmerged_pull_request_has_no_merge_sha() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/env/pulls/6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pr_json(6, "open", false, &[])))
            .mount(&server)
            .await;

        let pr = client(&server).find_pull_request("acme/env", 6).await.unwrap();
        assert!(!pr.merged);
        assert!(pr.merge_sha.is_none());
    }

    #[tokio::test]
    async fn test_not_found_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .mount(&server)
            .await;

        let found = client(&server).find_repository("acme/missing").await.unwrap();
        assert!(found.is_none());

        let err = client(&server).find_pull_request("acme/missing", 1).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_open_pull_requests_filters_labels() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/env/pulls"))
            .and(query_param("state", "open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                pr_json(1, "open", false, &["env/staging"]),
                pr_json(2, "open", false, &["env/staging", "dependency/myapp"]),
            ])))
            .mount(&server)
            .await;

        let labels = vec!["env/staging".to_string(), "dependency/myapp".to_string()];
        let prs = client(&server)
            .list_open_pull_requests("acme/env", &labels)
            .await
            .unwrap();
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[0].number, 2);
    }

    #[tokio::test]
    async fn test_create_pull_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/env/pulls"))
            .and(body_json(json!({
                "title": "chore: promote myapp to version 1.0.0",
                "head": "bot:promote-1",
                "base": "main",
                "body": "body",
                "draft": false
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(pr_json(7, "open", false, &[])))
            .mount(&server)
            .await;

        let input = PullRequestInput {
            title: "chore: promote myapp to version 1.0.0".to_string(),
            body: "body".to_string(),
            head: "bot:promote-1".to_string(),
            base: "main".to_string(),
            draft: false,
        };
        let pr = client(&server).create_pull_request("acme/env", &input).await.unwrap();
        assert_eq!(pr.number, 7);
    }

    #[tokio::test]
    async fn test_list_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/env/commits/abc123/statuses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"state": "failure", "context": "ci", "description": "boom",
                 "target_url": "https://ci/1", "url": "https://api/status/1"},
                {"state": "pending", "context": "tide"}
            ])))
            .mount(&server)
            .await;

        let statuses = client(&server).list_statuses("acme/env", "abc123").await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].state, StatusState::Failure);
        assert_eq!(statuses[0].key(), "https://api/status/1");
        assert_eq!(statuses[1].label, "tide");
    }

    #[tokio::test]
    async fn test_api_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/repos/acme/env/pulls/3/merge"))
            .respond_with(ResponseTemplate::new(405).set_body_string("not mergeable"))
            .mount(&server)
            .await;

        let err = client(&server)
            .merge_pull_request("acme/env", 3, "merge")
            .await
            .unwrap_err();
        assert!(matches!(err, ScmError::Api { status: 405, .. }));
    }
}
