//! Chart naming and repository alias resolution
//!
//! A chart is referred to as `prefix/localName` where the prefix is the
//! alias of the chart repository it comes from. Well-known prefixes are
//! read from the version stream (`charts/repositories.yml`); unknown
//! repositories are given a fresh alias inside the helmfile being edited.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use super::helmfile::RepositorySpec;
use crate::error::ConfigError;

/// Chart repository used when nothing else is configured
pub const DEFAULT_CHART_REPOSITORY: &str = "http://jenkins-x-chartmuseum:8080";

/// Alias claimed for repositories the version stream does not know
pub const DEFAULT_PREFIX: &str = "dev";

const OCI_SCHEME: &str = "oci://";

/// A prefix and the repository URLs it stands for
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RepositoryPrefix {
    pub prefix: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Well-known repository prefixes
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RepositoryPrefixes {
    #[serde(default)]
    pub repositories: Vec<RepositoryPrefix>,
}

impl RepositoryPrefixes {
    /// Load `charts/repositories.yml` from a version stream checkout
    ///
    /// A missing file yields an empty lookup.
    pub fn load(version_stream_dir: &Path) -> Result<Self, ConfigError> {
        let path = version_stream_dir.join("charts").join("repositories.yml");
        if !path.is_file() {
            debug!("No repository prefixes at {}", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Repository URL registered for a prefix
    pub fn url_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.repositories
            .iter()
            .find(|r| r.prefix == prefix)
            .and_then(|r| r.urls.first())
            .map(String::as_str)
    }

    /// Prefix registered for a repository URL
    pub fn prefix_for_url(&self, url: &str) -> Option<&str> {
        let url = normalize_url(url);
        self.repositories
            .iter()
            .find(|r| r.urls.iter().any(|u| normalize_url(u) == url))
            .map(|r| r.prefix.as_str())
    }
}

fn normalize_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Fully resolved chart naming
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartDetails {
    /// `prefix/localName`, or just `localName` when there is no prefix
    pub name: String,
    pub prefix: String,
    pub local_name: String,
    /// Repository URL without any `oci://` scheme
    pub repository: String,
    pub oci: bool,
}

impl ChartDetails {
    /// Set the prefix, keeping `name == prefix + "/" + local_name`
    pub fn set_prefix(&mut self, prefix: &str) {
        self.prefix = prefix.to_string();
        self.name = if prefix.is_empty() {
            self.local_name.clone()
        } else {
            format!("{}/{}", prefix, self.local_name)
        };
    }

    /// Whether the chart is read from a directory rather than a repository
    pub fn is_local(&self) -> bool {
        self.repository.is_empty()
    }

    /// Make sure the chart's repository has an alias in `repositories`
    ///
    /// An explicit prefix is kept as is and only registered when the
    /// document has no repository of that name. Otherwise reuses the alias
    /// already registered for the URL, or claims `default_prefix` (then
    /// `<default_prefix>2`, `<default_prefix>3` and so on when taken).
    pub fn ensure_repository_alias(
        &mut self,
        repositories: &mut Vec<RepositorySpec>,
        default_prefix: &str,
    ) {
        if self.is_local() {
            return;
        }
        if !self.prefix.is_empty() {
            if !repositories.iter().any(|r| r.name == self.prefix) {
                repositories.push(RepositorySpec {
                    name: self.prefix.clone(),
                    url: self.repository.clone(),
                    oci: self.oci,
                    ..Default::default()
                });
            }
            return;
        }

        let mut url_to_name: HashMap<String, String> = HashMap::new();
        let mut name_to_url: HashMap<String, String> = HashMap::new();
        let mut unnamed = None;
        for (index, repo) in repositories.iter().enumerate() {
            let url = strip_oci(&repo.url).0.to_string();
            if repo.name.is_empty() {
                if url == self.repository && unnamed.is_none() {
                    unnamed = Some(index);
                }
                continue;
            }
            url_to_name.entry(url.clone()).or_insert(repo.name.clone());
            name_to_url.insert(repo.name.clone(), url);
        }

        if let Some(existing) = url_to_name.get(&self.repository) {
            let existing = existing.clone();
            self.set_prefix(&existing);
            return;
        }

        let prefix = free_prefix(&name_to_url, default_prefix);
        match unnamed {
            Some(index) => repositories[index].name = prefix.clone(),
            None => repositories.push(RepositorySpec {
                name: prefix.clone(),
                url: self.repository.clone(),
                oci: self.oci,
                ..Default::default()
            }),
        }
        info!(
            "Registered chart repository {} as '{}'",
            self.repository, prefix
        );
        self.set_prefix(&prefix);
    }
}

fn free_prefix(taken: &HashMap<String, String>, default_prefix: &str) -> String {
    if !taken.contains_key(default_prefix) {
        return default_prefix.to_string();
    }
    (2..)
        .map(|n| format!("{}{}", default_prefix, n))
        .find(|candidate| !taken.contains_key(candidate))
        .unwrap_or_else(|| default_prefix.to_string())
}

fn strip_oci(url: &str) -> (&str, bool) {
    match url.strip_prefix(OCI_SCHEME) {
        Some(stripped) => (stripped, true),
        None => (url, false),
    }
}

/// Resolves chart names against known repositories
#[derive(Debug, Clone, Default)]
pub struct ChartResolver {
    prefixes: RepositoryPrefixes,
    /// Team applications repository, preferred over the built-in default
    apps_repository: Option<String>,
}

impl ChartResolver {
    pub fn new(prefixes: RepositoryPrefixes, apps_repository: Option<String>) -> Self {
        Self {
            prefixes,
            apps_repository: apps_repository.filter(|r| !r.is_empty()),
        }
    }

    /// Resolve naming for `chart_name` published to `repository`
    ///
    /// `chart_name` may already carry a prefix (`stable/nginx`), in which
    /// case the repository registered for that prefix is used. A repository
    /// starting with `.` or `/` is a local chart directory.
    pub fn chart_details(&self, chart_name: &str, repository: &str) -> ChartDetails {
        let mut prefix = String::new();
        let mut local_name = chart_name.to_string();
        let mut repository = repository.to_string();

        if let Some((p, name)) = chart_name.split_once('/') {
            prefix = p.to_string();
            local_name = name.to_string();
            if let Some(url) = self.prefixes.url_for_prefix(&prefix) {
                repository = url.to_string();
            }
        }

        if repository.is_empty() {
            repository = self
                .apps_repository
                .clone()
                .unwrap_or_else(|| DEFAULT_CHART_REPOSITORY.to_string());
        }

        if repository.starts_with('.') || repository.starts_with('/') {
            let name = Path::new(&repository)
                .join(&local_name)
                .to_string_lossy()
                .into_owned();
            let prefix = Path::new(&name)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            return ChartDetails {
                name,
                prefix,
                local_name,
                repository: String::new(),
                oci: false,
            };
        }

        let (stripped, oci) = strip_oci(&repository);
        let repository = stripped.to_string();

        if prefix.is_empty() {
            if let Some(known) = self.prefixes.prefix_for_url(&repository) {
                prefix = known.to_string();
            }
        }

        let mut details = ChartDetails {
            name: local_name.clone(),
            prefix: String::new(),
            local_name,
            repository,
            oci,
        };
        if !prefix.is_empty() {
            details.set_prefix(&prefix);
        }
        details
    }
}
