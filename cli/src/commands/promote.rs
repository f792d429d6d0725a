//! Promote command
//!
//! Resolves what to promote from flags, files and the cluster, then hands
//! over to [`PromoteService`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use kube::Client;
use tracing::{debug, info};

use crate::cli::PromoteArgs;
use crate::config::options::{chart_name_in_dir, read_version_file, PromoteOptions};
use crate::config::requirements::RequirementsEnvironments;
use crate::domain::chart::{ChartResolver, RepositoryPrefixes};
use crate::domain::environment::{EnvironmentProvider, EnvironmentSelection};
use crate::domain::git_url::GitRepository;
use crate::infrastructure::activity::{activity_name, ActivityTracker};
use crate::infrastructure::git::{GitClient, Gitter};
use crate::infrastructure::github::GitHubFactory;
use crate::infrastructure::helm::{latest_chart_version, ChartSearch, HelmCli};
use crate::infrastructure::k8s::{
    create_client, service_url, KubeActivityStore, KubeEnvironments, KubeReleases,
    CHART_MUSEUM_SERVICE,
};
use crate::services::PromoteService;

pub async fn execute(args: PromoteArgs) -> Result<()> {
    let dir = PathBuf::from(&args.dir);

    let kube = match create_client().await {
        Ok(client) => Some(client),
        Err(e) => {
            debug!("No Kubernetes cluster available: {:#}", e);
            None
        }
    };

    let git = git_client(&args);
    let charts = HelmCli;

    let app = resolve_app(&args, &dir, &git, &charts).await?;
    let version = resolve_version(&args, &dir, &app, &charts).await?;
    info!("Promoting {} version {}", app, version);

    let changelog = match &args.changelog {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read changelog {}", path))?,
        None => String::new(),
    };

    let helm_repository_url = args.helm_repository_url.clone().unwrap_or_default();
    let apps_repository = if helm_repository_url.is_empty() {
        apps_repository(kube.as_ref()).await
    } else {
        None
    };
    let prefixes = match &args.version_stream_dir {
        Some(dir) => RepositoryPrefixes::load(Path::new(dir))?,
        None => RepositoryPrefixes::default(),
    };

    let options = PromoteOptions {
        app,
        version,
        selection: selection(&args),
        namespace: args.namespace.clone().unwrap_or_default(),
        app_git_url: args.app_git_url.clone().unwrap_or_default(),
        alias: args.alias.clone().unwrap_or_default(),
        release_name: args.release_name.clone().unwrap_or_default(),
        helm_repository_url,
        timeout: args.timeout,
        poll_interval: args.pull_request_poll_time,
        no_poll: args.no_poll,
        no_wait: args.no_wait,
        no_merge: args.no_merge,
        auto_merge: args.auto_merge,
        wait_for_pipeline: args.wait_for_pipeline,
        fork: args.fork,
        reuse_pull_request: args.reuse_pull_request,
        sparse_checkout: args.sparse_checkout,
        changelog,
        git_user: args.git_user.clone().unwrap_or_default(),
        git_token: args.git_token.clone().unwrap_or_default(),
    };

    let environments = environment_provider(&args, kube.as_ref())?;
    let scm = GitHubFactory::new(&args.git_kind, args.git_token.clone());
    let releases = kube.clone().map(KubeReleases::new);

    let mut service = PromoteService::new(options, environments.as_ref(), &scm, &git)
        .with_tracker(activity_tracker(&args, kube.as_ref()))
        .with_charts(ChartResolver::new(prefixes, apps_repository));
    if let Some(releases) = &releases {
        service = service.with_releases(releases);
    }

    service.execute().await?;
    Ok(())
}

fn git_client(args: &PromoteArgs) -> GitClient {
    match (&args.git_user, &args.git_email) {
        (Some(user), Some(email)) if !user.is_empty() && !email.is_empty() => {
            GitClient::new().with_identity(user, email)
        }
        _ => GitClient::new(),
    }
}

fn selection(args: &PromoteArgs) -> EnvironmentSelection {
    if args.all {
        EnvironmentSelection::All
    } else if args.all_auto {
        EnvironmentSelection::AllAutomatic
    } else if !args.promotion_environments.is_empty() {
        EnvironmentSelection::Listed(args.promotion_environments.clone())
    } else {
        EnvironmentSelection::Named(args.env.clone().unwrap_or_default())
    }
}

/// Application name from the arguments, a chart search, the chart or the repository
async fn resolve_app(
    args: &PromoteArgs,
    dir: &Path,
    git: &dyn Gitter,
    charts: &dyn ChartSearch,
) -> Result<String> {
    if let Some(app) = args
        .app_arg
        .as_ref()
        .or(args.app.as_ref())
        .filter(|app| !app.is_empty())
    {
        return Ok(app.clone());
    }

    if let Some(filter) = args.filter.as_deref().filter(|f| !f.is_empty()) {
        let found = charts
            .search_charts(filter)
            .await
            .with_context(|| format!("Failed to search charts matching {}", filter))?;
        let mut names: Vec<&str> = found.iter().map(|chart| chart.local_name()).collect();
        names.sort_unstable();
        names.dedup();
        return match names.as_slice() {
            [] => Err(anyhow!("No charts match the filter {}", filter)),
            [name] => Ok(name.to_string()),
            many => Err(anyhow!(
                "The filter {} matches several charts, pick one with --app: {}",
                filter,
                many.join(", ")
            )),
        };
    }

    if let Some(name) = chart_name_in_dir(dir)? {
        debug!("Using chart name {} as the application", name);
        return Ok(name);
    }

    // Not being in a git checkout just means this source is unavailable
    if let Ok(Some(url)) = git.origin_url(dir).await {
        let repository = GitRepository::parse(&url)?;
        debug!("Using repository name {} as the application", repository.name);
        return Ok(repository.name);
    }

    bail!("Could not work out the application to promote, pass it as an argument or with --app")
}

/// Version from the flag, the version file, `$VERSION` or the latest chart
async fn resolve_version(
    args: &PromoteArgs,
    dir: &Path,
    app: &str,
    charts: &dyn ChartSearch,
) -> Result<String> {
    if let Some(version) = args.version.as_ref().filter(|v| !v.is_empty()) {
        return Ok(version.clone());
    }

    if let Some(version) = read_version_file(&dir.join(&args.version_file))? {
        debug!("Using version {} from {}", version, args.version_file);
        return Ok(version);
    }

    if let Some(version) = std::env::var("VERSION").ok().filter(|v| !v.is_empty()) {
        return Ok(version);
    }

    let found = charts
        .search_charts(app)
        .await
        .with_context(|| format!("Failed to search versions of {}", app))?;
    latest_chart_version(&found, app).ok_or_else(|| {
        anyhow!(
            "No version of {} found, pass one with --version or a {} file",
            app,
            args.version_file
        )
    })
}

/// Chart repository exposed by the team's chart museum, if any
async fn apps_repository(kube: Option<&Client>) -> Option<String> {
    let client = kube?;
    match service_url(client, client.default_namespace(), CHART_MUSEUM_SERVICE).await {
        Ok(url) => url,
        Err(e) => {
            debug!("Failed to look up {}: {:#}", CHART_MUSEUM_SERVICE, e);
            None
        }
    }
}

fn environment_provider(
    args: &PromoteArgs,
    kube: Option<&Client>,
) -> Result<Box<dyn EnvironmentProvider>> {
    if let Some(path) = &args.requirements {
        return Ok(Box::new(RequirementsEnvironments::load(Path::new(path))?));
    }
    match kube {
        Some(client) => Ok(Box::new(KubeEnvironments::new(
            client.clone(),
            client.default_namespace(),
        ))),
        None => bail!(
            "No Kubernetes cluster to read environments from, use --requirements to read them from a file"
        ),
    }
}

/// Activity tracking needs a cluster and a pipeline build to attach to
fn activity_tracker(args: &PromoteArgs, kube: Option<&Client>) -> ActivityTracker {
    let Some(client) = kube else {
        return ActivityTracker::disabled();
    };

    let pipeline = args.pipeline.clone().unwrap_or_default();
    let build = args
        .build
        .clone()
        .or_else(|| std::env::var("BUILD_NUMBER").ok())
        .or_else(|| std::env::var("BUILD_ID").ok())
        .unwrap_or_default();
    if pipeline.is_empty() || build.is_empty() {
        debug!("No pipeline build to record the promotion against");
        return ActivityTracker::disabled();
    }

    let store = KubeActivityStore::new(
        client.clone(),
        client.default_namespace(),
        pipeline.as_str(),
        build.as_str(),
    );
    ActivityTracker::new(Arc::new(store), activity_name(&pipeline, &build))
}
