//! Line-oriented file rule
//!
//! Renders one command line and either replaces the first line matching
//! the update matcher, or inserts it after the last line matching the
//! first insert-after matcher that matches anything, or appends it.

use regex::Regex;
use tracing::debug;

use super::{read_file, require, write_file, RuleContext};
use crate::config::promote::{FileRule, LineMatcher};
use crate::domain::template::{render, TemplateContext};
use crate::error::RuleError;

pub fn apply(rule: &FileRule, ctx: &RuleContext) -> Result<(), RuleError> {
    require(&rule.path, "fileRule.path")?;

    let path = ctx.dir.join(&rule.path);
    if !path.is_file() {
        return Err(RuleError::FileNotFound { path });
    }

    let content = read_file(&path)?;
    let lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    let lines = promote_lines(lines, rule, &ctx.template)?;
    write_file(&path, &lines.join("\n"))
}

/// Apply the rule to the lines of a file
pub fn promote_lines(
    mut lines: Vec<String>,
    rule: &FileRule,
    ctx: &TemplateContext,
) -> Result<Vec<String>, RuleError> {
    let command = format!(
        "{}{}",
        rule.line_prefix,
        render(&rule.command_template, ctx)?
    );

    if let Some(template) = &rule.update_template {
        let rendered = LineMatcher {
            prefix: render(&template.prefix, ctx)?,
            regex: render(&template.regex, ctx)?,
        };
        let matcher = Matcher::new(&rule.line_prefix, &rendered)?;
        if let Some(index) = lines.iter().position(|line| matcher.matches(line)) {
            debug!("Replacing line {} of {}", index + 1, rule.path);
            lines[index] = command;
            return Ok(lines);
        }
    }

    for insert_after in &rule.insert_after {
        let matcher = Matcher::new(&rule.line_prefix, insert_after)?;
        if let Some(index) = lines.iter().rposition(|line| matcher.matches(line)) {
            debug!("Inserting after line {} of {}", index + 1, rule.path);
            lines.insert(index + 1, command);
            return Ok(lines);
        }
    }

    lines.push(command);
    Ok(lines)
}

enum Matcher {
    Prefix {
        prefix: String,
        with_line_prefix: Option<String>,
    },
    Regex(Regex),
}

impl Matcher {
    fn new(line_prefix: &str, matcher: &LineMatcher) -> Result<Self, RuleError> {
        if !matcher.prefix.is_empty() {
            let with_line_prefix = if line_prefix.is_empty() {
                None
            } else {
                Some(format!("{}{}", line_prefix, matcher.prefix))
            };
            return Ok(Self::Prefix {
                prefix: matcher.prefix.clone(),
                with_line_prefix,
            });
        }
        if !matcher.regex.is_empty() {
            let anchored = format!("^(?:{})$", matcher.regex);
            let regex = Regex::new(&anchored).map_err(|source| RuleError::Regex {
                pattern: matcher.regex.clone(),
                source,
            })?;
            return Ok(Self::Regex(regex));
        }
        Err(RuleError::UnsupportedLineMatcher)
    }

    fn matches(&self, line: &str) -> bool {
        match self {
            Self::Prefix {
                prefix,
                with_line_prefix,
            } => {
                line.starts_with(prefix.as_str())
                    || with_line_prefix
                        .as_deref()
                        .is_some_and(|p| line.starts_with(p))
            }
            Self::Regex(regex) => regex.is_match(line),
        }
    }
}
