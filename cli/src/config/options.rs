//! Runtime promotion options
//!
//! The resolved settings of one `promote` run, plus the file lookups used to
//! default the application name and version.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::environment::EnvironmentSelection;
use crate::error::ConfigError;

/// Default time to wait for a promotion
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default interval between pull request polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Settings of one promotion run
#[derive(Debug, Clone)]
pub struct PromoteOptions {
    pub app: String,
    pub version: String,
    pub selection: EnvironmentSelection,
    /// Target namespace overriding the environment's own
    pub namespace: String,
    /// Source repository of the application
    pub app_git_url: String,
    pub alias: String,
    pub release_name: String,
    pub helm_repository_url: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Raise pull requests without waiting on them
    pub no_poll: bool,
    /// Stop waiting once the pull request is merged
    pub no_wait: bool,
    pub no_merge: bool,
    pub auto_merge: bool,
    pub wait_for_pipeline: bool,
    pub fork: bool,
    pub reuse_pull_request: bool,
    pub sparse_checkout: bool,
    /// Appended to the commit and pull request body
    pub changelog: String,
    pub git_user: String,
    pub git_token: String,
}

impl Default for PromoteOptions {
    fn default() -> Self {
        Self {
            app: String::new(),
            version: String::new(),
            selection: EnvironmentSelection::Named(String::new()),
            namespace: String::new(),
            app_git_url: String::new(),
            alias: String::new(),
            release_name: String::new(),
            helm_repository_url: String::new(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            no_poll: false,
            no_wait: false,
            no_merge: false,
            auto_merge: false,
            wait_for_pipeline: false,
            fork: false,
            reuse_pull_request: false,
            sparse_checkout: false,
            changelog: String::new(),
            git_user: String::new(),
            git_token: String::new(),
        }
    }
}

impl PromoteOptions {
    /// Validate options, returning every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.app.is_empty() {
            errors.push("application name is required".to_string());
        }

        match &self.selection {
            EnvironmentSelection::Named(name) if name.is_empty() => errors.push(
                "an environment is required: use --env, --promotion-environments, --all or --all-auto"
                    .to_string(),
            ),
            EnvironmentSelection::Listed(names) if names.is_empty() => {
                errors.push("--promotion-environments cannot be empty".to_string())
            }
            EnvironmentSelection::Named(_) => {}
            _ if !self.namespace.is_empty() => {
                errors.push("--namespace can only be used with a single --env".to_string())
            }
            _ => {}
        }

        if self.timeout.is_zero() {
            errors.push("--timeout must be greater than zero".to_string());
        }
        if self.poll_interval.is_zero() {
            errors.push("--pull-request-poll-time must be greater than zero".to_string());
        } else if self.poll_interval > self.timeout {
            errors.push("--pull-request-poll-time cannot exceed --timeout".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Version recorded in a version file, `None` if absent or blank
pub fn read_version_file(path: &Path) -> Result<Option<String>, ConfigError> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let version = content.trim();
    Ok((!version.is_empty()).then(|| version.to_string()))
}

#[derive(Debug, Deserialize)]
struct ChartMetadata {
    #[serde(default)]
    name: String,
}

/// Name of the chart in `dir` or, failing that, in `dir/charts/*`
pub fn chart_name_in_dir(dir: &Path) -> Result<Option<String>, ConfigError> {
    if let Some(name) = chart_name(&dir.join("Chart.yaml"))? {
        return Ok(Some(name));
    }

    let charts_dir = dir.join("charts");
    if !charts_dir.is_dir() {
        return Ok(None);
    }
    let entries = std::fs::read_dir(&charts_dir).map_err(|source| ConfigError::Io {
        path: charts_dir.clone(),
        source,
    })?;
    let mut chart_dirs: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    chart_dirs.sort();

    for chart_dir in chart_dirs {
        if let Some(name) = chart_name(&chart_dir.join("Chart.yaml"))? {
            return Ok(Some(name));
        }
    }
    Ok(None)
}

fn chart_name(path: &Path) -> Result<Option<String>, ConfigError> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let chart: ChartMetadata =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok((!chart.name.is_empty()).then_some(chart.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PromoteOptions {
        PromoteOptions {
            app: "myapp".to_string(),
            selection: EnvironmentSelection::Named("staging".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_options() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let options = PromoteOptions {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        let errors = options.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("application name"));
        assert!(errors[1].contains("environment is required"));
        assert!(errors[2].contains("--pull-request-poll-time"));
    }

    #[test]
    fn test_namespace_requires_single_environment() {
        let mut options = valid();
        options.namespace = "jx-custom".to_string();
        assert!(options.validate().is_ok());

        options.selection = EnvironmentSelection::All;
        let errors = options.validate().unwrap_err();
        assert!(errors[0].contains("--namespace"));
    }

    #[test]
    fn test_poll_interval_cannot_exceed_timeout() {
        let mut options = valid();
        options.timeout = Duration::from_secs(10);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_read_version_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("VERSION");
        assert_eq!(read_version_file(&path).unwrap(), None);

        std::fs::write(&path, "1.2.3\n").unwrap();
        assert_eq!(read_version_file(&path).unwrap().as_deref(), Some("1.2.3"));

        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(read_version_file(&path).unwrap(), None);
    }

    #[test]
    fn test_chart_name_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(chart_name_in_dir(dir.path()).unwrap(), None);

        let chart = dir.path().join("charts").join("myapp");
        std::fs::create_dir_all(&chart).unwrap();
        std::fs::write(chart.join("Chart.yaml"), "apiVersion: v1\nname: myapp\nversion: 0.1.0\n")
            .unwrap();
        assert_eq!(chart_name_in_dir(dir.path()).unwrap().as_deref(), Some("myapp"));

        std::fs::write(dir.path().join("Chart.yaml"), "name: root-chart\n").unwrap();
        assert_eq!(
            chart_name_in_dir(dir.path()).unwrap().as_deref(),
            Some("root-chart")
        );
    }
}
