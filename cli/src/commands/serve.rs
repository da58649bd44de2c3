// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hosting process entry point
//!
//! Builds the domain registry from configuration, preloads marked
//! applications and then serves admin commands from stdin until EOF or
//! Ctrl-C, after which every application is shut down.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use webhost_core::application::registry::DomainRegistry;
use webhost_core::host_config::HostConfig;
use webhost_core::infrastructure::app_factory::{ConfiguredApplications, InProcessContextFactory};
use webhost_core::infrastructure::event_bus::EventBus;
use webhost_core::infrastructure::failure_reporter::LoggingFailureReporter;
use webhost_core::presentation::admin::AdminService;

pub async fn run(config_path: Option<PathBuf>, preload: bool) -> Result<()> {
    let config = HostConfig::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    let applications = Arc::new(ConfiguredApplications::from_config(&config));
    let preload_targets = applications.preload_targets();
    let events = EventBus::new(config.event_bus_capacity);

    let registry = DomainRegistry::builder(config, Arc::new(InProcessContextFactory::new()), applications.clone())
        .failure_reporter(Arc::new(LoggingFailureReporter::new()))
        .events(events.clone())
        .build()
        .context("Failed to build domain registry")?;

    if DomainRegistry::install_global(registry.clone()).is_err() {
        warn!("A domain registry was already installed for this process");
    }
    registry.open();
    info!(applications = applications.len(), "Webhost started");

    let idle_monitor = registry.spawn_idle_monitor();
    let event_log = tokio::spawn(log_events(events));

    for (app_id, preload_context) in &preload_targets {
        registry.set_preload_state(preload_context, app_id, true);
    }
    if preload {
        let preloads = preload_targets.iter().map(|(app_id, _)| {
            let registry = registry.clone();
            async move {
                if let Err(e) = registry.preload_if_required(app_id).await {
                    warn!(app_id = %app_id, error = %e, "Preload failed at startup");
                }
            }
        });
        futures::future::join_all(preloads).await;
    }

    let admin = AdminService::new(registry.clone());
    tokio::select! {
        result = serve_admin(&admin) => result?,
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
    }

    let drained = registry.close().await;
    if let Some(monitor) = idle_monitor {
        monitor.abort();
    }
    event_log.abort();
    if !drained && registry.active_count() > 0 {
        warn!(remaining = registry.active_count(), "Exiting with execution contexts still stopping");
    }
    info!("Webhost stopped");
    Ok(())
}

async fn serve_admin(admin: &AdminService) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("Failed to read admin command")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = admin.handle_line(line).await;
        stdout.write_all(response.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    info!("Admin channel closed");
    Ok(())
}

async fn log_events(events: EventBus) {
    let mut receiver = events.subscribe();
    loop {
        match receiver.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::debug!(event = %json, "Hosting event"),
                Err(e) => warn!(error = %e, "Failed to serialize hosting event"),
            },
            Err(webhost_core::infrastructure::event_bus::EventBusError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}
