//! Release domain types
//!
//! What is being promoted, where it ended up, and the notes attached to
//! the released version.

use std::cmp::Ordering;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::pull_request::PullRequest;

/// The version of an application being promoted to one group of environments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Helm release name, `<namespace>-<app>` unless set explicitly
    pub release_name: String,
    pub full_app_name: String,
    pub version: String,
    pub pull_request: Option<PullRequest>,
}

impl ReleaseInfo {
    pub fn new(app: &str, version: &str, namespace: &str, release_name: Option<&str>) -> Self {
        let release_name = match release_name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{}-{}", namespace, app),
        };
        Self {
            release_name,
            full_app_name: app.to_string(),
            version: version.to_string(),
            pull_request: None,
        }
    }
}

/// Final state of one promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionPhase {
    /// Nothing to change in the environment repository
    Unchanged,
    /// Pull request raised, not waited on
    PullRequestOpen,
    /// Pull request merged (and downstream checks passed when tracked)
    Succeeded,
    Failed,
}

impl PromotionPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unchanged => "Unchanged",
            Self::PullRequestOpen => "Pull Request Open",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }
}

/// Result of promoting to one group of environments
#[derive(Debug, Clone)]
pub struct PromotionResult {
    pub environments: String,
    pub pull_request: Option<String>,
    pub phase: PromotionPhase,
    pub duration: Duration,
    pub message: Option<String>,
}

/// An issue fixed by a release
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueSummary {
    pub id: String,
    pub url: String,
    pub title: String,
    pub state: String,
}

impl IssueSummary {
    pub fn is_closed(&self) -> bool {
        self.state.eq_ignore_ascii_case("closed")
    }

    /// Issue number, when the id is numeric
    pub fn number(&self) -> Option<u64> {
        self.id.trim_start_matches('#').parse().ok().filter(|n| *n > 0)
    }
}

/// Notes recorded for a released version
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseNotes {
    pub name: String,
    pub version: String,
    pub release_notes_url: String,
    pub git_http_url: String,
    pub issues: Vec<IssueSummary>,
}

/// Where release notes and application URLs are looked up
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Notes of the release named `name` in `namespace`
    async fn find_release(&self, namespace: &str, name: &str) -> Result<Option<ReleaseNotes>>;

    /// URL of the first exposed service among `services`
    async fn application_url(&self, namespace: &str, services: &[String]) -> Result<Option<String>>;
}

/// Commit and pull request title for a promotion
pub fn commit_title(app: &str, version: &str, environments: &str) -> String {
    let version = if version.is_empty() { "latest" } else { version };
    if environments.is_empty() {
        format!("chore: promote {} to version {}", app, version)
    } else {
        format!("chore: promote {} to version {} in {}", app, version, environments)
    }
}

/// Comment posted on an issue once its fix reached an environment
pub fn issue_comment(env: &str, version: &str, notes_url: &str, app_url: &str) -> String {
    let version = if notes_url.is_empty() {
        version.to_string()
    } else {
        format!("[{}]({})", version, notes_url)
    };
    let available = if app_url.is_empty() {
        String::new()
    } else {
        format!(" and available [here]({})", app_url)
    };
    format!(
        ":white_check_mark: the fix for this issue is now deployed to **{}** in version {}{}",
        env, version, available
    )
}

/// Kubernetes resource name for `name`, keeping dots
pub fn valid_name_with_dots(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    lowered.trim_matches('-').to_string()
}

/// Order two version strings, semantically when both parse
///
/// Release versions sort after their pre-releases. Anything that is not a
/// dotted numeric version falls back to plain string order.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va
            .numbers
            .cmp(&vb.numbers)
            .then_with(|| match (&va.pre, &vb.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(pa), Some(pb)) => pa.cmp(pb),
            }),
        _ => a.cmp(b),
    }
}

/// Greatest of `versions`
pub fn latest_version<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .filter(|v| !v.is_empty())
        .max_by(|a, b| compare_versions(a, b))
}

struct ParsedVersion {
    numbers: [u64; 3],
    pre: Option<String>,
}

fn parse_version(version: &str) -> Option<ParsedVersion> {
    let version = version.trim().trim_start_matches('v');
    let version = version.split('+').next().unwrap_or(version);
    let (core, pre) = match version.split_once('-') {
        Some((core, pre)) => (core, Some(pre.to_string())),
        None => (version, None),
    };

    let mut numbers = [0u64; 3];
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    for (slot, part) in numbers.iter_mut().zip(parts) {
        *slot = part.parse().ok()?;
    }
    Some(ParsedVersion { numbers, pre })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_release_name() {
        let info = ReleaseInfo::new("myapp", "1.0.0", "jx-staging", None);
        assert_eq!(info.release_name, "jx-staging-myapp");

        let info = ReleaseInfo::new("myapp", "1.0.0", "jx-staging", Some("custom"));
        assert_eq!(info.release_name, "custom");
    }

    #[test]
    fn test_commit_title() {
        assert_eq!(
            commit_title("myapp", "1.2.3", "staging"),
            "chore: promote myapp to version 1.2.3 in staging"
        );
        assert_eq!(
            commit_title("myapp", "", ""),
            "chore: promote myapp to version latest"
        );
    }

    #[test]
    fn test_issue_comment() {
        let comment = issue_comment("Staging", "1.2.3", "https://notes/1.2.3", "");
        assert_eq!(
            comment,
            ":white_check_mark: the fix for this issue is now deployed to **Staging** in version [1.2.3](https://notes/1.2.3)"
        );
        assert!(issue_comment("Staging", "1.2.3", "", "http://app").ends_with("1.2.3 and available [here](http://app)"));
    }

    #[test]
    fn test_issue_number() {
        let issue = IssueSummary {
            id: "#42".into(),
            state: "Closed".into(),
            ..Default::default()
        };
        assert_eq!(issue.number(), Some(42));
        assert!(issue.is_closed());
        assert_eq!(IssueSummary { id: "ABC-1".into(), ..Default::default() }.number(), None);
    }

    #[test]
    fn test_valid_name_with_dots() {
        assert_eq!(valid_name_with_dots("MyApp_1.2.3"), "myapp-1.2.3");
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("v2.0.0", "2.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0.0-rc1", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("abc", "abd"), Ordering::Less);
    }

    #[test]
    fn test_latest_version() {
        let versions = ["0.0.9", "0.0.10", "0.0.2", ""];
        assert_eq!(latest_version(versions), Some("0.0.10"));
        assert_eq!(latest_version(Vec::<&str>::new()), None);
    }
}
