//! Promotion configuration discovery
//!
//! An explicit `.jx/promote.yaml` in the directory or any ancestor wins.
//! Otherwise the rule is inferred from the repository layout: an `env/`
//! umbrella chart means a Helm rule, anything else a Helmfile rule.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::promote::{load_promote_config, HelmRule, HelmfileRule, PromotionConfig, PromotionRule};
use crate::error::ConfigError;

/// Location of the explicit promote config relative to a directory
pub const PROMOTE_CONFIG_FILE: &str = ".jx/promote.yaml";

/// Directory of an umbrella chart environment
pub const ENV_CHART_DIR: &str = "env";

/// Root helmfile name
pub const HELMFILE: &str = "helmfile.yaml";

/// Directory holding one nested helmfile per namespace
pub const HELMFILES_DIR: &str = "helmfiles";

/// Result of discovery, with the explicit file when one was found
#[derive(Debug, Clone)]
pub struct DiscoveredConfig {
    pub config: PromotionConfig,
    pub source: Option<PathBuf>,
}

/// Find the promotion configuration for a checkout at `dir`
///
/// `namespace` selects the nested helmfile when the repository keeps
/// per-namespace helmfiles.
pub fn discover(dir: &Path, namespace: &str) -> Result<DiscoveredConfig, ConfigError> {
    if let Some((config, source)) = find_promote_config(dir)? {
        debug!(
            "Using promote config {} ({} rule)",
            source.display(),
            config.rule.kind()
        );
        return Ok(DiscoveredConfig {
            config,
            source: Some(source),
        });
    }

    let chart = dir.join(ENV_CHART_DIR).join("Chart.yaml");
    if chart.is_file() {
        debug!("Found {}, promoting with a helm rule", chart.display());
        return Ok(DiscoveredConfig {
            config: PromotionConfig::generated(PromotionRule::Helm(HelmRule {
                path: ENV_CHART_DIR.to_string(),
            })),
            source: None,
        });
    }

    let path = helmfile_path(dir, namespace);
    debug!("Promoting with a helmfile rule on {}", path);
    Ok(DiscoveredConfig {
        config: PromotionConfig::generated(PromotionRule::Helmfile(HelmfileRule {
            path,
            namespace: namespace.to_string(),
            keep_old_versions: Vec::new(),
        })),
        source: None,
    })
}

/// Walk from `dir` up towards the filesystem root looking for an explicit config
pub fn find_promote_config(dir: &Path) -> Result<Option<(PromotionConfig, PathBuf)>, ConfigError> {
    let start = absolute(dir)?;

    // The filesystem root itself is never searched.
    for candidate_dir in start.ancestors().filter(|p| p.parent().is_some()) {
        let candidate = candidate_dir.join(PROMOTE_CONFIG_FILE);
        if candidate.is_file() {
            let config = load_promote_config(&candidate)?;
            return Ok(Some((config, candidate)));
        }
    }
    Ok(None)
}

/// Relative helmfile path for a namespace
fn helmfile_path(dir: &Path, namespace: &str) -> String {
    if !namespace.is_empty() && dir.join(HELMFILES_DIR).is_dir() {
        format!("{}/{}/{}", HELMFILES_DIR, namespace, HELMFILE)
    } else {
        HELMFILE.to_string()
    }
}

fn absolute(dir: &Path) -> Result<PathBuf, ConfigError> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(cwd.join(dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_explicit_config_wins_over_env_chart() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join(PROMOTE_CONFIG_FILE),
            "metadata:\n  name: custom\nspec:\n  kptRule:\n    path: config-root\n",
        );
        write(&dir.path().join("env/Chart.yaml"), "name: env\n");

        let discovered = discover(dir.path(), "jx-staging").unwrap();
        assert_eq!(discovered.config.name, "custom");
        assert_eq!(discovered.config.rule.kind(), "kpt");
        assert!(discovered.source.is_some());
    }

    #[test]
    fn test_explicit_config_found_in_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join(PROMOTE_CONFIG_FILE),
            "spec:\n  helmRule:\n    path: charts/env\n",
        );
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();

        let discovered = discover(&nested, "").unwrap();
        assert_eq!(
            discovered.config.rule,
            PromotionRule::Helm(HelmRule {
                path: "charts/env".to_string()
            })
        );
        assert_eq!(
            discovered.source.unwrap(),
            dir.path().join(PROMOTE_CONFIG_FILE)
        );
    }

    #[test]
    fn test_env_chart_generates_helm_rule() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("env/Chart.yaml"), "name: env\n");

        let discovered = discover(dir.path(), "jx-staging").unwrap();
        assert_eq!(discovered.config.name, "generated");
        assert_eq!(
            discovered.config.rule,
            PromotionRule::Helm(HelmRule {
                path: "env".to_string()
            })
        );
        assert!(discovered.source.is_none());
    }

    #[test]
    fn test_root_helmfile_without_helmfiles_dir() {
        let dir = tempfile::tempdir().unwrap();

        let discovered = discover(dir.path(), "jx-staging").unwrap();
        assert_eq!(
            discovered.config.rule,
            PromotionRule::Helmfile(HelmfileRule {
                path: "helmfile.yaml".to_string(),
                namespace: "jx-staging".to_string(),
                keep_old_versions: vec![],
            })
        );
    }

    #[test]
    fn test_nested_helmfile_per_namespace() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(HELMFILES_DIR)).unwrap();

        let discovered = discover(dir.path(), "jx-production").unwrap();
        assert_eq!(
            rule_path(&discovered.config.rule),
            "helmfiles/jx-production/helmfile.yaml"
        );

        let discovered = discover(dir.path(), "").unwrap();
        assert_eq!(rule_path(&discovered.config.rule), "helmfile.yaml");
    }

    fn rule_path(rule: &PromotionRule) -> &str {
        match rule {
            PromotionRule::Helmfile(rule) => &rule.path,
            other => panic!("expected a helmfile rule, got {}", other.kind()),
        }
    }

    #[test]
    fn test_malformed_explicit_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join(PROMOTE_CONFIG_FILE), "spec: [oops");

        let err = discover(dir.path(), "jx").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
