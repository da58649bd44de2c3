// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use webhost_core::host_config::{ApplicationConfig, HostConfig};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./webhost.yaml)
        #[arg(short, long, default_value = "./webhost.yaml")]
        output: PathBuf,

        /// Include a sample application
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(&output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = HostConfig::load_or_default(config_override.clone()).context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. WEBHOST_CONFIG_PATH: {}",
            std::env::var("WEBHOST_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./webhost.yaml");
        println!("  4. ~/.webhost/config.yaml");
        println!("  5. /etc/webhost/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();
    print!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = HostConfig::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

async fn generate(output: &Path, with_examples: bool) -> Result<()> {
    sample_config(with_examples)
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );
    Ok(())
}

fn sample_config(with_examples: bool) -> HostConfig {
    let mut config = HostConfig::default();
    if with_examples {
        config.applications.push(ApplicationConfig {
            id: Some("default".to_string()),
            virtual_path: "/".to_string(),
            physical_path: PathBuf::from("/var/www/default"),
            site: None,
            preload: Some("startup".to_string()),
            parameters: Default::default(),
        });
    }
    config
}
