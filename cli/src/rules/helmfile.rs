//! Helmfile rule
//!
//! Upserts a release for the application into a helmfile. Nested
//! helmfiles (`helmfiles/<ns>/helmfile.yaml`) hold one namespace each and
//! are referenced from the root `helmfile.yaml`.

use std::path::Path;

use tracing::{debug, info};

use super::{read_file, write_file, RuleContext};
use crate::config::discovery::{HELMFILE, HELMFILES_DIR};
use crate::config::promote::{load_helmfile_promote, HelmfileRule};
use crate::domain::chart::{ChartDetails, DEFAULT_PREFIX};
use crate::domain::helmfile::{HelmfileState, ReleaseSpec, SubHelmfile};
use crate::error::RuleError;

/// Namespace used when neither the rule nor the environment name one
pub const DEFAULT_NAMESPACE: &str = "jx";

pub fn apply(rule: &HelmfileRule, ctx: &RuleContext) -> Result<(), RuleError> {
    let path = if rule.path.is_empty() {
        HELMFILE
    } else {
        rule.path.as_str()
    };
    let nested = Path::new(path)
        .parent()
        .is_some_and(|parent| !parent.as_os_str().is_empty());

    let promote_ns = [rule.namespace.as_str(), ctx.template.namespace.as_str()]
        .into_iter()
        .find(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE)
        .to_string();

    let keep_old_versions = keep_old_versions(rule, ctx, &promote_ns)?;

    let file = ctx.dir.join(path);
    let mut state = load_state(&file)?.unwrap_or_default();

    let template = &ctx.template;
    let details = ctx
        .charts
        .chart_details(&template.app_name, &template.helm_repository_url);

    let keep_old = keep_old_versions.iter().any(|name| {
        name == &template.app_name || name == &details.local_name || name == &details.name
    });

    let target = UpsertTarget {
        app: &template.app_name,
        version: &template.version,
        release_name: &template.release_name,
        details: &details,
        namespace: &promote_ns,
        keep_old,
        remote_cluster: ctx.remote_cluster,
    };
    if nested {
        upsert_nested(&mut state, &target);
    } else {
        upsert_root(&mut state, &target);
    }
    save_state(&file, &state)?;
    info!(
        "Promoted {} to version {} in {}",
        template.app_name,
        template.version,
        path
    );

    if nested {
        register_nested_helmfile(&ctx.dir.join(HELMFILE), path)?;
    }
    Ok(())
}

/// Apps to keep side by side, taken from `helmfiles/<ns>/promote.yaml` when present
fn keep_old_versions(
    rule: &HelmfileRule,
    ctx: &RuleContext,
    namespace: &str,
) -> Result<Vec<String>, RuleError> {
    let env_promote = ctx
        .dir
        .join(HELMFILES_DIR)
        .join(namespace)
        .join("promote.yaml");
    Ok(match load_helmfile_promote(&env_promote)? {
        Some(promote) => {
            debug!("Using keepOldVersions from {}", env_promote.display());
            promote.spec.keep_old_versions
        }
        None => rule.keep_old_versions.clone(),
    })
}

struct UpsertTarget<'a> {
    app: &'a str,
    version: &'a str,
    release_name: &'a str,
    details: &'a ChartDetails,
    namespace: &'a str,
    keep_old: bool,
    remote_cluster: bool,
}

impl UpsertTarget<'_> {
    /// 2 for a release name match, 1 for an app name match
    fn score(&self, release: &ReleaseSpec, namespace_ok: bool) -> u8 {
        if !namespace_ok {
            return 0;
        }
        if !self.release_name.is_empty() && release.name == self.release_name {
            2
        } else if release.name == self.app || release.name == self.details.local_name {
            1
        } else {
            0
        }
    }

    /// Chart name for a new release, registering its repository alias
    fn register_chart(&self, state: &mut HelmfileState) -> String {
        let mut details = self.details.clone();
        details.ensure_repository_alias(&mut state.repositories, DEFAULT_PREFIX);
        details.name
    }

    fn new_release_name(&self) -> String {
        let base = if self.release_name.is_empty() {
            self.details.local_name.as_str()
        } else {
            self.release_name
        };
        if self.keep_old {
            format!("{}-{}", base, self.version.replace('.', "-"))
        } else {
            base.to_string()
        }
    }
}

/// Index of the best scoring release, first one on ties
fn best_match<F>(releases: &[ReleaseSpec], score: F) -> Option<usize>
where
    F: Fn(&ReleaseSpec) -> u8,
{
    let mut best: Option<(usize, u8)> = None;
    for (index, release) in releases.iter().enumerate() {
        let s = score(release);
        if s > 0 && best.map_or(true, |(_, b)| s > b) {
            best = Some((index, s));
        }
    }
    best.map(|(index, _)| index)
}

fn upsert_root(state: &mut HelmfileState, target: &UpsertTarget<'_>) {
    if !target.keep_old {
        let matched = best_match(&state.releases, |release| {
            let namespace_ok = release.namespace == target.namespace || target.remote_cluster;
            target.score(release, namespace_ok)
        });
        if let Some(index) = matched {
            state.releases[index].version = target.version.to_string();
            return;
        }
    }

    let chart = target.register_chart(state);
    state.releases.push(ReleaseSpec {
        chart,
        version: target.version.to_string(),
        name: target.new_release_name(),
        namespace: target.namespace.to_string(),
        ..Default::default()
    });
}

fn upsert_nested(state: &mut HelmfileState, target: &UpsertTarget<'_>) {
    if state.override_namespace.is_empty() && state.releases.is_empty() {
        state.override_namespace = target.namespace.to_string();
    }

    if !target.keep_old {
        let matched = best_match(&state.releases, |release| target.score(release, true));
        if let Some(index) = matched {
            state.releases[index].version = target.version.to_string();
            return;
        }
    }

    let chart = target.register_chart(state);
    let namespace = if state.override_namespace == target.namespace {
        String::new()
    } else {
        target.namespace.to_string()
    };
    state.releases.push(ReleaseSpec {
        chart,
        version: target.version.to_string(),
        name: target.new_release_name(),
        namespace,
        ..Default::default()
    });
}

/// Reference a nested helmfile from the root helmfile unless already covered
fn register_nested_helmfile(root: &Path, nested_path: &str) -> Result<(), RuleError> {
    let mut state = load_state(root)?.unwrap_or_default();
    if state.references(nested_path) {
        return Ok(());
    }
    info!("Adding {} to {}", nested_path, root.display());
    state
        .helmfiles
        .push(SubHelmfile::Path(nested_path.to_string()));
    save_state(root, &state)
}

fn load_state(path: &Path) -> Result<Option<HelmfileState>, RuleError> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = read_file(path)?;
    HelmfileState::from_yaml(&content)
        .map(Some)
        .map_err(|source| RuleError::Yaml {
            path: path.to_path_buf(),
            source,
        })
}

fn save_state(path: &Path, state: &HelmfileState) -> Result<(), RuleError> {
    let content = state.to_yaml().map_err(|source| RuleError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    write_file(path, &content)
}
