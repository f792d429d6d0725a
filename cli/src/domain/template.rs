//! Placeholder substitution for rule templates
//!
//! Two placeholder forms are recognised: `{{.Version}}` (Go template
//! style) and `{Version}`. An unknown name in the double-brace form is an
//! error; an unknown single-brace token is left as written so shell
//! snippets such as `${HOME}` survive.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::RuleError;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{-?\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*-?\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .expect("placeholder pattern is valid")
});

/// Values available to rule templates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateContext {
    pub git_url: String,
    pub version: String,
    pub app_name: String,
    pub chart_alias: String,
    pub namespace: String,
    pub helm_repository_url: String,
    pub release_name: String,
}

impl TemplateContext {
    fn lookup(&self, name: &str) -> Option<&str> {
        let value = match name {
            "GitURL" => &self.git_url,
            "Version" => &self.version,
            "AppName" => &self.app_name,
            "ChartAlias" => &self.chart_alias,
            "Namespace" => &self.namespace,
            "HelmRepositoryURL" => &self.helm_repository_url,
            "ReleaseName" => &self.release_name,
            _ => return None,
        };
        Some(value.as_str())
    }
}

/// Substitute placeholders in `template`
pub fn render(template: &str, ctx: &TemplateContext) -> Result<String, RuleError> {
    let mut unknown: Option<String> = None;

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        if let Some(name) = caps.get(1) {
            match ctx.lookup(name.as_str()) {
                Some(value) => value.to_string(),
                None => {
                    unknown.get_or_insert_with(|| name.as_str().to_string());
                    String::new()
                }
            }
        } else {
            let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            match ctx.lookup(name) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        }
    });

    match unknown {
        Some(key) => Err(RuleError::Template {
            template: template.to_string(),
            key,
        }),
        None => Ok(rendered.into_owned()),
    }
}
