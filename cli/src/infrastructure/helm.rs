//! Helm chart search
//!
//! Used to default the application name and version when they are not
//! given on the command line.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::domain::release::latest_version;
use crate::tools::{require_tool, tools};

/// A chart version reported by `helm search`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChartSummary {
    /// `<repository alias>/<chart>`
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub description: String,
}

impl ChartSummary {
    /// Chart name without the repository alias
    pub fn local_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[async_trait]
pub trait ChartSearch: Send + Sync {
    /// Every version of every chart matching `filter`
    async fn search_charts(&self, filter: &str) -> Result<Vec<ChartSummary>>;
}

/// Chart search through the helm CLI
#[derive(Debug, Default)]
pub struct HelmCli;

#[async_trait]
impl ChartSearch for HelmCli {
    async fn search_charts(&self, filter: &str) -> Result<Vec<ChartSummary>> {
        let helm = require_tool(tools::HELM)?;
        debug!("Searching charts matching {}", filter);

        let output = Command::new(&helm)
            .args(["search", "repo", filter, "--versions", "-o", "json"])
            .output()
            .await
            .context("Failed to execute helm search")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("helm search repo {} failed: {}", filter, stderr.trim());
        }

        parse_search_output(&String::from_utf8_lossy(&output.stdout))
    }
}

pub fn parse_search_output(output: &str) -> Result<Vec<ChartSummary>> {
    let output = output.trim();
    if output.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(output).context("Failed to parse helm search output")
}

/// Greatest version of the chart named `app`
pub fn latest_chart_version(charts: &[ChartSummary], app: &str) -> Option<String> {
    latest_version(
        charts
            .iter()
            .filter(|chart| chart.name == app || chart.local_name() == app)
            .map(|chart| chart.version.as_str()),
    )
    .map(str::to_string)
}
