//! Runtime tool path resolution
//!
//! For each external tool (e.g. `kpt`) we:
//! 1. Check for an environment variable `{TOOL}_BIN` (e.g. `KPT_BIN`)
//! 2. Fall back to PATH-based invocation if the envvar is not set
//!
//! ```rust,ignore
//! use crate::tools::{get_tool_path, tools};
//! use tokio::process::Command;
//!
//! let kpt = get_tool_path(tools::KPT);
//! Command::new(&kpt).args(["pkg", "get", url, "myapp"]).status().await?;
//! ```

use std::env;

use anyhow::{Context, Result};

/// Get the path to an external tool
///
/// Checks for an environment variable `{TOOL}_BIN` (uppercase tool name + "_BIN").
/// Falls back to the tool name itself if the envvar is not set, which relies on PATH.
pub fn get_tool_path(tool: &str) -> String {
    let env_var = format!("{}_BIN", tool.to_uppercase());
    env::var(&env_var).unwrap_or_else(|_| tool.to_string())
}

/// Resolve a tool and make sure it can be executed
pub fn require_tool(tool: &str) -> Result<String> {
    let path = get_tool_path(tool);
    which::which(&path)
        .with_context(|| format!("{} not found; install it or set {}_BIN", tool, tool.to_uppercase()))?;
    Ok(path)
}

/// Tool names used by promote
pub mod tools {
    pub const GIT: &str = "git";
    pub const HELM: &str = "helm";
    pub const KPT: &str = "kpt";
}
