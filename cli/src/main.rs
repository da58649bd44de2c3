// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Webhost CLI
//!
//! The `webhost` binary runs the application hosting process.
//!
//! ## Commands
//!
//! - `webhost serve` - Start the domain registry and accept JSON admin
//!   commands on stdin, one per line, answering on stdout
//! - `webhost apps list` - Show configured applications and their ids
//! - `webhost config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;

use commands::{AppsCommand, ConfigCommand};

/// Webhost - host many applications in one process
#[derive(Parser)]
#[command(name = "webhost")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "WEBHOST_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "WEBHOST_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hosting process
    #[command(name = "serve")]
    Serve {
        /// Skip preloading applications marked for preload
        #[arg(long)]
        no_preload: bool,
    },

    /// Configured applications
    #[command(name = "apps")]
    Apps {
        #[command(subcommand)]
        command: AppsCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Serve { no_preload }) => commands::serve::run(cli.config, !no_preload).await,
        Some(Commands::Apps { command }) => commands::apps::handle_command(command, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging. Logs go to stderr so stdout
/// stays reserved for admin responses.
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
