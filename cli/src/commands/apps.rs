// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configured application commands
//!
//! Commands: list

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use webhost_core::host_config::HostConfig;
use webhost_core::infrastructure::app_factory::ConfiguredApplications;

#[derive(Subcommand)]
pub enum AppsCommand {
    /// List configured applications with their ids
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(command: AppsCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        AppsCommand::List { json } => list(config_override, json).await,
    }
}

async fn list(config_override: Option<PathBuf>, json: bool) -> Result<()> {
    let config = HostConfig::load_or_default(config_override).context("Failed to load configuration")?;

    if json {
        let entries: Vec<_> = config
            .applications
            .iter()
            .map(|app| {
                serde_json::json!({
                    "id": ConfiguredApplications::id_for(app).as_str(),
                    "virtual_path": app.virtual_path,
                    "physical_path": app.physical_path,
                    "site": app.site,
                    "preload": app.preload,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if config.applications.is_empty() {
        println!("{}", "No applications configured.".yellow());
        return Ok(());
    }

    println!("{}", "Configured applications:".bold());
    for app in &config.applications {
        let id = ConfiguredApplications::id_for(app);
        println!("  {} {}", id.as_str().bold(), app.virtual_path);
        println!("    Path: {}", app.physical_path.display());
        if let Some(site) = &app.site {
            println!("    Site: {}", site);
        }
        if let Some(preload) = &app.preload {
            println!("    Preload: {}", preload.green());
        }
    }

    Ok(())
}
