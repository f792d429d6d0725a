//! Terminal output for promotions
//!
//! Logs go through tracing; this is what a person watching the run reads.

use colored::Colorize;

use crate::domain::environment::PromotionGroup;
use crate::domain::release::{PromotionPhase, PromotionResult};

const WIDTH: usize = 60;

/// Boxed title followed by one line per pull request about to be raised
pub fn print_plan(app: &str, version: &str, groups: &[PromotionGroup]) {
    let version = if version.is_empty() { "latest" } else { version };
    let border = "═".repeat(WIDTH);

    println!();
    println!("{}", format!("╔{}╗", border).bright_blue());
    println!(
        "{}",
        format!("║  {:<width$}║", format!("Promote: {} {}", app, version), width = WIDTH - 2)
            .bright_blue()
    );
    println!("{}", format!("╚{}╝", border).bright_blue());
    for group in groups {
        let line = format!("   {} -> {}", group.display_name(), group.git_url);
        if group.draft {
            println!("{} {}", line, "(draft)".bright_yellow());
        } else {
            println!("{}", line);
        }
    }
    println!();
}

/// Overall outcome and one line per group
pub fn print_summary(app: &str, version: &str, results: &[PromotionResult]) {
    println!();
    println!("{}", "═".repeat(WIDTH).bright_blue());

    let failed = results
        .iter()
        .any(|result| result.phase == PromotionPhase::Failed);
    if failed {
        print_error(&format!("Promotion of {} failed", app));
    } else {
        print_success(&format!("Promotion of {} {} completed", app, version));
    }

    println!();
    for result in results {
        println!("{}", result_line(result));
        if let Some(message) = &result.message {
            println!("      {}", message.bright_red());
        }
    }
    println!();
}

fn phase_icon(phase: PromotionPhase) -> &'static str {
    match phase {
        PromotionPhase::Succeeded => "✅",
        PromotionPhase::PullRequestOpen => "⏳",
        PromotionPhase::Unchanged => "➖",
        PromotionPhase::Failed => "❌",
    }
}

fn result_line(result: &PromotionResult) -> String {
    let link = result
        .pull_request
        .as_deref()
        .map(|link| format!(" {}", link))
        .unwrap_or_default();
    format!(
        "   {} {}: {}{} ({:.1}s)",
        phase_icon(result.phase),
        result.environments,
        result.phase.name(),
        link,
        result.duration.as_secs_f64()
    )
}

pub fn print_success(message: &str) {
    println!("{}", format!("✅ {}", message).bright_green().bold());
}

pub fn print_error(message: &str) {
    eprintln!("{}", format!("❌ {}", message).bright_red().bold());
}

pub fn print_info(message: &str) {
    println!("{}", format!("ℹ️  {}", message).bright_cyan());
}

pub fn print_warning(message: &str) {
    println!("{}", format!("⚠️  {}", message).bright_yellow());
}
