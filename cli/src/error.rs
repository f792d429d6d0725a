//! Centralized error types for promote
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for promote operations
#[derive(Error, Debug)]
pub enum PromoteError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Git provider error: {0}")]
    Scm(#[from] ScmError),

    #[error("Promotion error: {0}")]
    Promotion(#[from] PromotionError),
}

/// Promotion configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Required configuration missing: {field}")]
    MissingField { field: String },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Promote config {} does not define any rule", path.display())]
    NoRule { path: PathBuf },
}

/// Errors raised while applying a promotion rule to a checkout
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("not supported line matcher")]
    UnsupportedLineMatcher,

    #[error("Rule is missing required value: {field}")]
    MissingField { field: String },

    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to process YAML {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Unknown template variable '{key}' in '{template}'")]
    Template { template: String, key: String },

    #[error("Invalid line matcher regex '{pattern}': {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Command '{command}' failed: {message}")]
    Command { command: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {path}")]
    NotARepository { path: String },

    #[error("Failed to get git SHA: {0}")]
    ShaFailed(String),

    #[error("Git command failed: {command}: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Invalid git URL: {url}")]
    InvalidUrl { url: String },
}

/// Git provider (pull requests, statuses, comments) errors
#[derive(Error, Debug)]
pub enum ScmError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Git provider request {request} failed with status {status}: {message}")]
    Api {
        request: String,
        status: u16,
        message: String,
    },

    #[error("Git provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unsupported git provider: {kind}")]
    Unsupported { kind: String },
}

impl ScmError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Terminal outcomes of waiting on a promotion pull request
#[derive(Error, Debug)]
pub enum PromotionError {
    #[error("Promotion failed as Pull Request {link} is closed without merging")]
    PullRequestClosed { link: String },

    #[error("Status: {state} URL: {target_url} description: {description}")]
    PipelineFailed {
        state: String,
        target_url: String,
        description: String,
    },

    #[error("Pull request {link} last commit has status {state} for ref {sha}")]
    PullRequestCheckFailed {
        link: String,
        state: String,
        sha: String,
    },

    #[error("Timed out waiting for pull request {link} to merge. Waited {waited}")]
    TimedOut { link: String, waited: String },

    #[error("Failed to query pull request {link}: {source}")]
    Scm {
        link: String,
        #[source]
        source: ScmError,
    },

    #[error("Failed to rebase pull request {link}: {message}")]
    Rebase { link: String, message: String },
}
