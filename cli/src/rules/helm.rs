//! Helm umbrella chart rule
//!
//! Upserts the application as a dependency in the chart's
//! `requirements.yaml`. `Chart.yaml` must exist and is written back as read.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{load_yaml, save_yaml, RuleContext};
use crate::config::promote::HelmRule;
use crate::domain::chart::ChartDetails;
use crate::error::RuleError;

const CHART_FILE: &str = "Chart.yaml";
const REQUIREMENTS_FILE: &str = "requirements.yaml";

/// `requirements.yaml` of an umbrella chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// One chart dependency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alias: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,
    #[serde(default)]
    pub version: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Requirements {
    /// Point the dependency for the chart at `version`, adding it if absent
    ///
    /// A dependency matches on its name (application, local or full chart
    /// name) and on its alias.
    pub fn set_app_version(&mut self, app: &str, details: &ChartDetails, version: &str, alias: &str) {
        let existing = self.dependencies.iter_mut().find(|dep| {
            (dep.name == app || dep.name == details.local_name || dep.name == details.name)
                && dep.alias == alias
        });

        match existing {
            Some(dep) => {
                dep.version = version.to_string();
                if !details.repository.is_empty() {
                    dep.repository = details.repository.clone();
                }
            }
            None => self.dependencies.push(Dependency {
                alias: alias.to_string(),
                name: details.local_name.clone(),
                repository: details.repository.clone(),
                version: version.to_string(),
                extra: BTreeMap::new(),
            }),
        }
    }
}

pub fn apply(rule: &HelmRule, ctx: &RuleContext) -> Result<(), RuleError> {
    let dir = if rule.path.is_empty() {
        ctx.dir.clone()
    } else {
        ctx.dir.join(&rule.path)
    };

    let chart_file = dir.join(CHART_FILE);
    let chart: serde_yaml::Value =
        load_yaml(&chart_file)?.ok_or_else(|| RuleError::FileNotFound {
            path: chart_file.clone(),
        })?;

    let requirements_file = dir.join(REQUIREMENTS_FILE);
    let mut requirements: Requirements = load_yaml(&requirements_file)?.unwrap_or_default();

    let template = &ctx.template;
    let details = ctx
        .charts
        .chart_details(&template.app_name, &template.helm_repository_url);
    requirements.set_app_version(
        &template.app_name,
        &details,
        &template.version,
        &template.chart_alias,
    );

    save_yaml(&requirements_file, &requirements)?;
    save_yaml(&chart_file, &chart)?;

    info!(
        "Set {} to version {} in {}",
        details.local_name,
        template.version,
        requirements_file.display()
    );
    Ok(())
}
