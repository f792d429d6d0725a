//! Helmfile document model
//!
//! Only the fields promotion reads or writes are typed. Everything else in
//! the document is carried through `extra` so a load/save cycle keeps
//! unrelated settings intact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

type Extra = BTreeMap<String, serde_yaml::Value>;

/// A helmfile (`helmfile.yaml` or a nested `helmfiles/<ns>/helmfile.yaml`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HelmfileState {
    /// Namespace applied to every release that does not set its own
    #[serde(
        default,
        rename = "namespace",
        alias = "overrideNamespace",
        skip_serializing_if = "String::is_empty"
    )]
    pub override_namespace: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<RepositorySpec>,

    /// References to nested helmfiles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub helmfiles: Vec<SubHelmfile>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub releases: Vec<ReleaseSpec>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// A chart repository known to the helmfile under an alias
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositorySpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub oci: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

/// An installed chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSpec {
    #[serde(default)]
    pub chart: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A reference to a nested helmfile, either a bare path or a mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubHelmfile {
    Path(String),
    Spec(SubHelmfileSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubHelmfileSpec {
    #[serde(default)]
    pub path: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl SubHelmfile {
    pub fn path(&self) -> &str {
        match self {
            Self::Path(path) => path,
            Self::Spec(spec) => &spec.path,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl HelmfileState {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Whether any nested helmfile reference matches `path`
    ///
    /// References may be globs such as `helmfiles/*/helmfile.yaml`.
    pub fn references(&self, path: &str) -> bool {
        self.helmfiles.iter().any(|reference| {
            let pattern = reference.path();
            pattern == path
                || glob::Pattern::new(pattern)
                    .map(|p| p.matches(path))
                    .unwrap_or(false)
        })
    }
}
