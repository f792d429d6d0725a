//! Promotion configuration document (`.jx/promote.yaml`)
//!
//! The on-disk document keeps one optional field per rule kind. Loading
//! collapses it into a [`PromotionRule`] so callers only ever see exactly
//! one rule.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Name given to configurations inferred from the repository layout
pub const GENERATED_CONFIG_NAME: &str = "generated";

/// Matches a single line of a file either by prefix or by regex
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineMatcher {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub regex: String,
}

#[cfg(test)]
impl LineMatcher {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            regex: String::new(),
        }
    }

    pub fn regex(regex: impl Into<String>) -> Self {
        Self {
            prefix: String::new(),
            regex: regex.into(),
        }
    }
}

/// Line-oriented edit of a plain text file (e.g. a shell script or Makefile)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRule {
    /// File to modify, relative to the repository root
    #[serde(default)]
    pub path: String,
    /// Prepended to the rendered command line
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub line_prefix: String,
    /// Anchors tried in order when no existing line was updated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insert_after: Vec<LineMatcher>,
    /// Identifies an existing line to replace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_template: Option<LineMatcher>,
    /// Template for the line to write
    #[serde(default)]
    pub command_template: String,
}

/// Dependency update inside a Helm umbrella chart directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmRule {
    /// Chart directory relative to the repository root
    #[serde(default)]
    pub path: String,
}

/// Release upsert inside a helmfile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmfileRule {
    /// Helmfile path relative to the repository root, defaults to `helmfile.yaml`
    #[serde(default)]
    pub path: String,
    /// Namespace to deploy into, overriding the environment namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Apps whose previous versions stay installed next to the new one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keep_old_versions: Vec<String>,
}

/// Package fetch/update via the `kpt` tool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KptRule {
    /// Directory holding the packages, relative to the repository root
    #[serde(default)]
    pub path: String,
    /// Namespace the package is deployed into
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// The single rule a repository is promoted with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionRule {
    File(FileRule),
    Helm(HelmRule),
    Helmfile(HelmfileRule),
    Kpt(KptRule),
}

impl PromotionRule {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Helm(_) => "helm",
            Self::Helmfile(_) => "helmfile",
            Self::Kpt(_) => "kpt",
        }
    }

    /// Whether applying the rule needs the application's source git URL
    pub fn needs_app_git_url(&self) -> bool {
        matches!(self, Self::File(_) | Self::Kpt(_))
    }
}

/// A named promotion configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionConfig {
    pub name: String,
    pub rule: PromotionRule,
}

impl PromotionConfig {
    pub fn generated(rule: PromotionRule) -> Self {
        Self {
            name: GENERATED_CONFIG_NAME.to_string(),
            rule,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PromoteDocument {
    #[serde(default)]
    metadata: DocumentMetadata,
    #[serde(default)]
    spec: PromoteSpec,
}

#[derive(Debug, Default, Deserialize)]
struct DocumentMetadata {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromoteSpec {
    file_rule: Option<FileRule>,
    #[serde(alias = "chartRule")]
    helm_rule: Option<HelmRule>,
    helmfile_rule: Option<HelmfileRule>,
    kpt_rule: Option<KptRule>,
}

impl PromoteSpec {
    fn count(&self) -> usize {
        [
            self.file_rule.is_some(),
            self.helm_rule.is_some(),
            self.helmfile_rule.is_some(),
            self.kpt_rule.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// First rule in File > Helm > Helmfile > Kpt order
    fn into_rule(self) -> Option<PromotionRule> {
        if let Some(rule) = self.file_rule {
            return Some(PromotionRule::File(rule));
        }
        if let Some(rule) = self.helm_rule {
            return Some(PromotionRule::Helm(rule));
        }
        if let Some(rule) = self.helmfile_rule {
            return Some(PromotionRule::Helmfile(rule));
        }
        self.kpt_rule.map(PromotionRule::Kpt)
    }
}

/// Parse a promote document from its YAML text
pub fn parse_promote_config(content: &str, path: &Path) -> Result<PromotionConfig, ConfigError> {
    let document: PromoteDocument = if content.trim().is_empty() {
        PromoteDocument::default()
    } else {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };

    if document.spec.count() > 1 {
        warn!(
            path = %path.display(),
            "Promote config defines more than one rule, using the first of file, helm, helmfile, kpt"
        );
    }

    let name = document.metadata.name;
    let rule = document.spec.into_rule().ok_or_else(|| ConfigError::NoRule {
        path: path.to_path_buf(),
    })?;

    Ok(PromotionConfig { name, rule })
}

/// Load a promote document from disk
pub fn load_promote_config(path: &Path) -> Result<PromotionConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_promote_config(&content, path)
}

/// Per-namespace helmfile settings stored in `helmfiles/<ns>/promote.yaml`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmfilePromote {
    #[serde(default)]
    pub spec: HelmfilePromoteSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmfilePromoteSpec {
    #[serde(default)]
    pub keep_old_versions: Vec<String>,
}

/// Load per-namespace helmfile settings, `None` when the file does not exist
pub fn load_helmfile_promote(path: &Path) -> Result<Option<HelmfilePromote>, ConfigError> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(Some(HelmfilePromote::default()));
    }
    serde_yaml::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}
