//! CLI definitions for promote
//!
//! This module contains all CLI argument parsing structures using clap.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "promote",
    version,
    about = "Promote application versions to GitOps environments",
    long_about = "Promotes a released application version into environment repositories \
through pull requests.\nUpdates the helm, helmfile, kpt or plain file layout of each environment \
and waits for the pull request to merge."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Promote a version of an application to one or more environments
    Promote(PromoteArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PromoteArgs {
    /// Application to promote
    #[arg(value_name = "APP")]
    pub app_arg: Option<String>,

    /// Application to promote (same as the positional argument)
    #[arg(short, long)]
    pub app: Option<String>,

    /// Version to promote, defaults to the version file then $VERSION then the latest chart
    #[arg(short, long)]
    pub version: Option<String>,

    /// File holding the version to promote, relative to --dir
    #[arg(long, default_value = "VERSION")]
    pub version_file: String,

    /// Environment to promote to
    #[arg(short, long)]
    pub env: Option<String>,

    /// Namespace to promote into, overriding the environment's namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Comma separated environments to promote to
    #[arg(long, value_delimiter = ',')]
    pub promotion_environments: Vec<String>,

    /// Promote to every permanent environment, manual ones as draft pull requests
    #[arg(long, conflicts_with = "all_auto")]
    pub all: bool,

    /// Promote to every automatic environment
    #[arg(long)]
    pub all_auto: bool,

    /// Directory of the application source
    #[arg(long, default_value = ".")]
    pub dir: String,

    /// Git URL of the application, required by file and kpt rules
    #[arg(long, env = "APP_GIT_URL")]
    pub app_git_url: Option<String>,

    /// Search the chart repositories for an application matching this filter
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Alias of the chart in helm requirements
    #[arg(long)]
    pub alias: Option<String>,

    /// Helm release name, defaults to <namespace>-<app>
    #[arg(long = "release")]
    pub release_name: Option<String>,

    /// Chart repository URL of the application
    #[arg(short = 'u', long = "helm-repo-url", env = "CHART_REPOSITORY")]
    pub helm_repository_url: Option<String>,

    /// How long to wait for a promotion
    #[arg(long, default_value = "1h", value_parser = parse_duration)]
    pub timeout: Duration,

    /// How often to poll the pull request
    #[arg(long, default_value = "20s", value_parser = parse_duration)]
    pub pull_request_poll_time: Duration,

    /// Raise pull requests without waiting for them
    #[arg(long)]
    pub no_poll: bool,

    /// Stop waiting once the pull request is merged
    #[arg(long)]
    pub no_wait: bool,

    /// Never merge the pull request, wait for someone else to
    #[arg(long)]
    pub no_merge: bool,

    /// Label pull requests for the merge bot
    #[arg(long)]
    pub auto_merge: bool,

    /// Wait for the pipeline triggered by the merge commit
    #[arg(long)]
    pub wait_for_pipeline: bool,

    /// Push to a fork of the environment repository
    #[arg(long)]
    pub fork: bool,

    /// Update an open promotion pull request instead of raising another
    #[arg(long)]
    pub reuse_pull_request: bool,

    /// Clone only the paths promotion touches
    #[arg(long)]
    pub sparse_checkout: bool,

    /// File whose content is appended to the pull request body
    #[arg(long = "add-changelog")]
    pub changelog: Option<String>,

    /// Kind of git provider
    #[arg(long, env = "GIT_KIND", default_value = "github")]
    pub git_kind: String,

    /// Git user for cloning and pushing
    #[arg(long, env = "GIT_USER")]
    pub git_user: Option<String>,

    /// Email recorded on promotion commits together with --git-user
    #[arg(long, env = "GIT_EMAIL")]
    pub git_email: Option<String>,

    /// Git token for cloning, pushing and the provider API
    #[arg(long, env = "GIT_TOKEN", hide_env_values = true)]
    pub git_token: Option<String>,

    /// Read environments from a requirements file instead of the cluster
    #[arg(long)]
    pub requirements: Option<String>,

    /// Version stream checkout holding charts/repositories.yml
    #[arg(long, env = "VERSION_STREAM_DIR")]
    pub version_stream_dir: Option<String>,

    /// Pipeline name of the activity to record, defaults to $JOB_NAME
    #[arg(long, env = "JOB_NAME")]
    pub pipeline: Option<String>,

    /// Build number of the activity to record, defaults to $BUILD_NUMBER or $BUILD_ID
    #[arg(long)]
    pub build: Option<String>,

    /// Never prompt
    #[arg(short, long)]
    pub batch_mode: bool,
}

fn parse_duration(value: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(value)
}
