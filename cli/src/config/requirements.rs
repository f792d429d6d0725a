//! Environments declared in a `jx-requirements.yml` file
//!
//! Used when promoting without cluster access. Both the flat layout and the
//! versioned `spec:` wrapped layout are accepted.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::environment::{
    EnvironmentConfig, EnvironmentKind, EnvironmentProvider, PromotionStrategy, DEV_ENVIRONMENT,
};
use crate::error::ConfigError;

const DEFAULT_GIT_SERVER: &str = "https://github.com";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Requirements {
    #[serde(default)]
    cluster: ClusterRequirements,
    #[serde(default)]
    environments: Vec<RequirementsEnvironment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterRequirements {
    #[serde(default)]
    environment_git_owner: String,
    #[serde(default)]
    git_server: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequirementsEnvironment {
    key: String,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    repository: String,
    #[serde(default)]
    git_server: String,
    #[serde(default)]
    git_url: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    promotion_strategy: Option<PromotionStrategy>,
    #[serde(default)]
    remote_cluster: bool,
}

/// Environments read from a requirements file
pub struct RequirementsEnvironments {
    environments: Vec<EnvironmentConfig>,
}

impl RequirementsEnvironments {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let parse_error = |source| ConfigError::Parse {
            path: PathBuf::from(path),
            source,
        };

        let value: serde_yaml::Value = serde_yaml::from_str(content).map_err(parse_error)?;
        let body = match value.get("spec") {
            Some(spec) => spec.clone(),
            None => value,
        };
        let requirements: Requirements = serde_yaml::from_value(body).map_err(parse_error)?;

        let environments = requirements
            .environments
            .iter()
            .enumerate()
            .map(|(order, env)| to_environment(&requirements.cluster, env, order as i32))
            .collect();

        Ok(Self { environments })
    }
}

fn to_environment(
    cluster: &ClusterRequirements,
    env: &RequirementsEnvironment,
    order: i32,
) -> EnvironmentConfig {
    let git_url = if !env.git_url.is_empty() {
        env.git_url.clone()
    } else if !env.repository.is_empty() {
        let server = [env.git_server.as_str(), cluster.git_server.as_str()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or(DEFAULT_GIT_SERVER);
        let owner = if env.owner.is_empty() {
            &cluster.environment_git_owner
        } else {
            &env.owner
        };
        format!(
            "{}/{}/{}.git",
            server.trim_end_matches('/'),
            owner,
            env.repository
        )
    } else {
        String::new()
    };

    let kind = if env.key == DEV_ENVIRONMENT {
        EnvironmentKind::Development
    } else {
        EnvironmentKind::Permanent
    };
    let promotion_strategy = env.promotion_strategy.unwrap_or(if kind == EnvironmentKind::Development {
        PromotionStrategy::Never
    } else {
        PromotionStrategy::Manual
    });

    EnvironmentConfig {
        key: env.key.clone(),
        label: env.key.clone(),
        namespace: env.namespace.clone(),
        git_url,
        promotion_strategy,
        remote_cluster: env.remote_cluster,
        kind,
        order,
    }
}

#[async_trait]
impl EnvironmentProvider for RequirementsEnvironments {
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
