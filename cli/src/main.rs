use anyhow::Result;
use clap::Parser;

// Core modules
mod cli;
mod commands;
mod config;
mod tools;

// Layers
mod domain;
mod error;
mod infrastructure;
mod rules;
mod services;
mod ui;

#[cfg(test)]
mod testing;

use cli::{Cli, Commands};
use commands::promote;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with LOGGING env var support
    // LOGGING=debug,info,warn,error or just LOGGING=debug
    let log_level = std::env::var("LOGGING")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            if cli.verbose {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(false)
        .init();

    let result = match cli.command {
        Commands::Promote(args) => promote::execute(args).await,
    };

    if let Err(e) = result {
        ui::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
