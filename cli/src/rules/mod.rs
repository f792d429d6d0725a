//! Rule application engine
//!
//! Applies a promotion rule to a checked out environment repository.
//! Each rule kind lives in its own module; dispatch is a single match.

pub mod file;
pub mod helm;
pub mod helmfile;
pub mod kpt;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::config::promote::PromotionRule;
use crate::domain::chart::ChartResolver;
use crate::domain::template::TemplateContext;
use crate::error::RuleError;

/// Everything a rule needs besides its own settings
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    /// Root of the environment repository checkout
    pub dir: PathBuf,
    pub template: TemplateContext,
    pub charts: ChartResolver,
    /// The environment is deployed by a controller in another cluster
    pub remote_cluster: bool,
}

/// Apply `rule` to the checkout in `ctx.dir`
pub async fn apply(rule: &PromotionRule, ctx: &RuleContext) -> Result<(), RuleError> {
    info!(
        "Applying {} rule for {} version {} in {}",
        rule.kind(),
        ctx.template.app_name,
        ctx.template.version,
        ctx.dir.display()
    );
    match rule {
        PromotionRule::File(rule) => file::apply(rule, ctx),
        PromotionRule::Helm(rule) => helm::apply(rule, ctx),
        PromotionRule::Helmfile(rule) => helmfile::apply(rule, ctx),
        PromotionRule::Kpt(rule) => kpt::apply(rule, ctx).await,
    }
}

pub(crate) fn require(value: &str, field: &str) -> Result<(), RuleError> {
    if value.is_empty() {
        return Err(RuleError::MissingField {
            field: field.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn read_file(path: &Path) -> Result<String, RuleError> {
    std::fs::read_to_string(path).map_err(|source| RuleError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_file(path: &Path, content: &str) -> Result<(), RuleError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| RuleError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, content).map_err(|source| RuleError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a YAML document, `None` when the file does not exist
pub(crate) fn load_yaml<T: DeserializeOwned + Default>(path: &Path) -> Result<Option<T>, RuleError> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = read_file(path)?;
    if content.trim().is_empty() {
        return Ok(Some(T::default()));
    }
    serde_yaml::from_str(&content)
        .map(Some)
        .map_err(|source| RuleError::Yaml {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn save_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), RuleError> {
    let content = serde_yaml::to_string(value).map_err(|source| RuleError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    write_file(path, &content)
}
