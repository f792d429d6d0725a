//! Environment domain types
//!
//! Environments are the promotion targets. Each one is backed by a git
//! repository; environments sharing a repository and promoting
//! automatically are promoted together in one pull request.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Key of the development environment
pub const DEV_ENVIRONMENT: &str = "dev";

/// How an environment accepts new versions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromotionStrategy {
    #[serde(alias = "Auto")]
    Automatic,
    #[default]
    Manual,
    Never,
}

/// Lifecycle of an environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentKind {
    Development,
    #[default]
    Permanent,
    Preview,
}

/// A promotion target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentConfig {
    pub key: String,
    pub label: String,
    /// Deploy namespace, empty means `jx-<key>`
    pub namespace: String,
    /// Environment repository, empty means the development repository
    pub git_url: String,
    pub promotion_strategy: PromotionStrategy,
    /// Deployed by a controller in another cluster
    pub remote_cluster: bool,
    pub kind: EnvironmentKind,
    pub order: i32,
}

impl EnvironmentConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Namespace the environment deploys into
    pub fn namespace(&self) -> String {
        if self.namespace.is_empty() {
            format!("jx-{}", self.key)
        } else {
            self.namespace.clone()
        }
    }

    pub fn is_automatic(&self) -> bool {
        self.promotion_strategy == PromotionStrategy::Automatic
    }

    fn matches_name(&self, name: &str) -> bool {
        self.key == name || (!self.label.is_empty() && self.label.eq_ignore_ascii_case(name))
    }
}

/// Source of environment definitions
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// All environments of the team, sorted by order then key
    async fn list_environments(&self) -> Result<Vec<EnvironmentConfig>>;

    /// Repository of the environment with the given key, if it has one
    async fn git_url_for_environment(&self, key: &str) -> Result<Option<String>>;
}

/// Which environments to promote to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentSelection {
    /// A single environment by key or label
    Named(String),
    /// A list of environments by key or label, in environment order
    Listed(Vec<String>),
    /// Every permanent environment that is not `Never`
    All,
    /// Every permanent environment with automatic promotion
    AllAutomatic,
}

/// Pick the environments for a selection
pub fn select_environments(
    environments: &[EnvironmentConfig],
    selection: &EnvironmentSelection,
) -> Result<Vec<EnvironmentConfig>, ConfigError> {
    let selected: Vec<EnvironmentConfig> = match selection {
        EnvironmentSelection::Named(name) => {
            let env = environments
                .iter()
                .find(|env| env.matches_name(name))
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "env".to_string(),
                    value: name.clone(),
                })?;
            vec![env.clone()]
        }
        EnvironmentSelection::Listed(names) => {
            for name in names {
                if !environments.iter().any(|env| env.matches_name(name)) {
                    return Err(ConfigError::InvalidValue {
                        field: "promotion-environments".to_string(),
                        value: name.clone(),
                    });
                }
            }
            environments
                .iter()
                .filter(|env| names.iter().any(|name| env.matches_name(name)))
                .cloned()
                .collect()
        }
        EnvironmentSelection::All => environments
            .iter()
            .filter(|env| env.kind == EnvironmentKind::Permanent)
            .filter(|env| env.promotion_strategy != PromotionStrategy::Never)
            .cloned()
            .collect(),
        EnvironmentSelection::AllAutomatic => environments
            .iter()
            .filter(|env| env.kind == EnvironmentKind::Permanent && env.is_automatic())
            .cloned()
            .collect(),
    };
    Ok(selected)
}

/// Repository an environment is promoted through
///
/// Environments without their own repository share the development one,
/// unless they are remote clusters which must always name a repository.
pub fn resolve_git_url(
    env: &EnvironmentConfig,
    dev_git_url: Option<&str>,
) -> Result<String, ConfigError> {
    if !env.git_url.is_empty() {
        return Ok(env.git_url.clone());
    }
    if env.remote_cluster {
        return Err(ConfigError::MissingField {
            field: format!("git URL for remote cluster environment {}", env.key),
        });
    }
    match dev_git_url {
        Some(url) if !url.is_empty() => Ok(url.to_string()),
        _ => Err(ConfigError::MissingField {
            field: format!("git URL for environment {}", env.key),
        }),
    }
}

/// Environments promoted together through one pull request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionGroup {
    pub git_url: String,
    pub environments: Vec<EnvironmentConfig>,
    /// Held for manual approval rather than merged automatically
    pub draft: bool,
}

impl PromotionGroup {
    pub fn keys(&self) -> Vec<String> {
        self.environments.iter().map(|env| env.key.clone()).collect()
    }

    pub fn display_name(&self) -> String {
        self.keys().join(", ")
    }
}

/// Group environments into pull requests
///
/// Automatic environments sharing a repository share a group. Manual
/// environments always get their own group and, when `draft_manual` is set,
/// are marked as drafts. Groups keep the order of their first environment.
pub fn group_environments(
    environments: Vec<EnvironmentConfig>,
    dev_git_url: Option<&str>,
    draft_manual: bool,
) -> Result<Vec<PromotionGroup>, ConfigError> {
    let mut groups: Vec<PromotionGroup> = Vec::new();

    for env in environments {
        let git_url = resolve_git_url(&env, dev_git_url)?;
        let draft = draft_manual && !env.is_automatic();

        if env.is_automatic() {
            let shared = groups.iter_mut().find(|group| {
                group.git_url == git_url
                    && !group.draft
                    && group.environments.iter().all(|e| e.is_automatic())
            });
            if let Some(group) = shared {
                group.environments.push(env);
                continue;
            }
        }

        groups.push(PromotionGroup {
            git_url,
            environments: vec![env],
            draft,
        });
    }

    Ok(groups)
}
