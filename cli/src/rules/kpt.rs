//! kpt package rule
//!
//! Fetches the application's package from its source repository the first
//! time, and merges upstream changes into the existing package afterwards.

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use super::{require, RuleContext};
use crate::config::promote::KptRule;
use crate::error::RuleError;
use crate::tools::{require_tool, tools};

pub async fn apply(rule: &KptRule, ctx: &RuleContext) -> Result<(), RuleError> {
    let template = &ctx.template;
    require(&template.git_url, "GitURL")?;
    require(&template.app_name, "AppName")?;

    let namespace_dir = if rule.path.is_empty() {
        ctx.dir.clone()
    } else {
        ctx.dir.join(&rule.path)
    };
    let app_dir = namespace_dir.join(&template.app_name);
    let version = package_version(&template.version);

    let args = if app_dir.is_dir() {
        update_args(&template.app_name, &version)
    } else {
        get_args(&template.git_url, &template.app_name, &version)
    };

    std::fs::create_dir_all(&namespace_dir).map_err(|source| RuleError::Io {
        path: namespace_dir.clone(),
        source,
    })?;
    run_kpt(&namespace_dir, &args).await?;

    info!(
        "Package {} at {} in {}",
        template.app_name,
        version,
        namespace_dir.display()
    );
    Ok(())
}

/// Git ref for a version: `v`-prefixed, `master` when unknown
pub fn package_version(version: &str) -> String {
    if version.is_empty() {
        "master".to_string()
    } else if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{}", version)
    }
}

/// Arguments merging upstream changes into an existing package
pub fn update_args(app: &str, version: &str) -> Vec<String> {
    vec![
        "pkg".to_string(),
        "update".to_string(),
        format!("{}@{}", app, version),
        "--strategy=alpha-git-patch".to_string(),
    ]
}

/// Arguments fetching a package for the first time
pub fn get_args(git_url: &str, app: &str, version: &str) -> Vec<String> {
    let mut repo = git_url.trim_end_matches('/').to_string();
    if !repo.ends_with(".git") {
        repo.push_str(".git");
    }
    vec![
        "pkg".to_string(),
        "get".to_string(),
        format!("{}/charts/{}/resources@{}", repo, app, version),
        app.to_string(),
    ]
}

async fn run_kpt(dir: &Path, args: &[String]) -> Result<(), RuleError> {
    let command = format!("kpt {}", args.join(" "));
    let kpt = require_tool(tools::KPT).map_err(|e| RuleError::Command {
        command: command.clone(),
        message: format!("{:#}", e),
    })?;

    debug!("Running {} in {}", command, dir.display());
    let output = Command::new(&kpt)
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| RuleError::Command {
            command: command.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RuleError::Command {
            command,
            message: stderr.trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::template::TemplateContext;

    #[test]
    fn test_package_version() {
        assert_eq!(package_version("1.2.3"), "v1.2.3");
        assert_eq!(package_version("v1.2.3"), "v1.2.3");
        assert_eq!(package_version(""), "master");
    }

    #[test]
    fn test_get_args_normalise_repository() {
        let args = get_args("https://github.com/acme/myapp/", "myapp", "v1.0.0");
        assert_eq!(
            args,
            vec![
                "pkg",
                "get",
                "https://github.com/acme/myapp.git/charts/myapp/resources@v1.0.0",
                "myapp"
            ]
        );
        let args = get_args("https://github.com/acme/myapp.git", "myapp", "v1.0.0");
        assert_eq!(
            args[2],
            "https://github.com/acme/myapp.git/charts/myapp/resources@v1.0.0"
        );
    }

    #[test]
    fn test_update_args() {
        assert_eq!(
            update_args("myapp", "v2.0.0"),
            vec!["pkg", "update", "myapp@v2.0.0", "--strategy=alpha-git-patch"]
        );
    }

    #[tokio::test]
    async fn test_requires_app_name() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RuleContext {
            dir: dir.path().to_path_buf(),
            template: TemplateContext {
                git_url: "https://github.com/acme/myapp.git".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = apply(&KptRule::default(), &ctx).await.unwrap_err();
        assert!(matches!(err, RuleError::MissingField { ref field } if field == "AppName"));
    }
}
