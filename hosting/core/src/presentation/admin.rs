// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Administrative Commands
//!
//! JSON command surface used by the hosting process's control channel.
//! Each line in is one [`AdminCommand`]; each line out is one
//! [`AdminResponse`]. All work is delegated to the [`DomainRegistry`].

use crate::application::registry::{DomainRegistry, ResumeToken};
use crate::domain::context::{ApplicationInfo, DomainInfo};
use crate::domain::hosting::PingCallback;
use crate::domain::identity::ApplicationId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, warn};

const PING_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AdminCommand {
    StartApplication {
        app_id: String,
        #[serde(default)]
        physical_path: Option<PathBuf>,
    },
    ShutdownApplication {
        app_id: String,
    },
    ShutdownAll,
    SetPreloadState {
        preload_context: String,
        app_id: String,
        enabled: bool,
    },
    Preload {
        app_id: String,
    },
    ReduceContexts {
        limit: usize,
    },
    ListRunning,
    EnumerateDomains,
    IsIdle,
    Suspend,
    Resume,
    StopListening,
    Ping,
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminResponse {
    Ok,
    Started { domain: DomainInfo },
    Accepted { accepted: bool },
    Count { count: usize },
    Applications { applications: Vec<ApplicationInfo> },
    Domains { domains: Vec<DomainInfo> },
    Idle { idle: bool },
    Pong,
    Drained { drained: bool },
    Status {
        accessible: usize,
        active: usize,
        shutting_down: bool,
        fatal_error: Option<String>,
    },
    Error { message: String },
}

impl AdminResponse {
    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

struct ChannelPingCallback {
    sender: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
}

impl PingCallback for ChannelPingCallback {
    fn respond(&self) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(());
        }
    }
}

pub struct AdminService {
    registry: DomainRegistry,
    suspended: AsyncMutex<Option<ResumeToken>>,
}

impl AdminService {
    pub fn new(registry: DomainRegistry) -> Self {
        Self {
            registry,
            suspended: AsyncMutex::new(None),
        }
    }

    /// Parse one JSON command and return one JSON response line.
    pub async fn handle_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<AdminCommand>(line) {
            Ok(command) => self.handle(command).await,
            Err(e) => AdminResponse::error(format!("Invalid command: {}", e)),
        };
        serde_json::to_string(&response)
            .unwrap_or_else(|e| format!(r#"{{"status":"error","message":"{}"}}"#, e))
    }

    pub async fn handle(&self, command: AdminCommand) -> AdminResponse {
        debug!(?command, "Handling admin command");
        match command {
            AdminCommand::StartApplication { app_id, physical_path } => {
                match self.registry.start_application(&ApplicationId::new(app_id), physical_path) {
                    Ok(context) => AdminResponse::Started {
                        domain: context.domain_info(),
                    },
                    Err(e) => AdminResponse::error(e.to_string()),
                }
            }
            AdminCommand::ShutdownApplication { app_id } => AdminResponse::Accepted {
                accepted: self.registry.shutdown_application(&ApplicationId::new(app_id)),
            },
            AdminCommand::ShutdownAll => AdminResponse::Drained {
                drained: self.registry.shutdown_all().await,
            },
            AdminCommand::SetPreloadState {
                preload_context,
                app_id,
                enabled,
            } => {
                self.registry
                    .set_preload_state(&preload_context, &ApplicationId::new(app_id), enabled);
                AdminResponse::Ok
            }
            AdminCommand::Preload { app_id } => {
                match self.registry.preload_if_required(&ApplicationId::new(app_id)).await {
                    Ok(ran) => AdminResponse::Accepted { accepted: ran },
                    Err(e) => AdminResponse::error(e.to_string()),
                }
            }
            AdminCommand::ReduceContexts { limit } => AdminResponse::Count {
                count: self.registry.reduce_context_count(limit),
            },
            AdminCommand::ListRunning => AdminResponse::Applications {
                applications: self.registry.get_running_applications(),
            },
            AdminCommand::EnumerateDomains => AdminResponse::Domains {
                domains: self.registry.enumerate_domains(),
            },
            AdminCommand::IsIdle => AdminResponse::Idle {
                idle: self.registry.is_idle(),
            },
            AdminCommand::Suspend => self.suspend().await,
            AdminCommand::Resume => self.resume().await,
            AdminCommand::StopListening => AdminResponse::Count {
                count: self.registry.stop_listening_all(),
            },
            AdminCommand::Ping => self.ping().await,
            AdminCommand::Status => AdminResponse::Status {
                accessible: self.registry.accessible_count(),
                active: self.registry.active_count(),
                shutting_down: self.registry.is_shutting_down(),
                fatal_error: self.registry.fatal_error().map(str::to_string),
            },
        }
    }

    async fn suspend(&self) -> AdminResponse {
        let mut suspended = self.suspended.lock().await;
        if suspended.is_some() {
            return AdminResponse::error("Applications are already suspended");
        }
        let token = self.registry.suspend_all().await;
        let count = token.len();
        *suspended = Some(token);
        AdminResponse::Count { count }
    }

    async fn resume(&self) -> AdminResponse {
        match self.suspended.lock().await.take() {
            Some(token) => AdminResponse::Count {
                count: self.registry.resume_all(token).len(),
            },
            None => AdminResponse::error("Applications are not suspended"),
        }
    }

    async fn ping(&self) -> AdminResponse {
        let (sender, receiver) = oneshot::channel();
        let callback = Arc::new(ChannelPingCallback {
            sender: parking_lot::Mutex::new(Some(sender)),
        });
        if !self.registry.ping(callback) {
            // Another ping is in flight; its answer covers this one.
            return AdminResponse::Pong;
        }
        match tokio::time::timeout(PING_WAIT, receiver).await {
            Ok(Ok(())) => AdminResponse::Pong,
            _ => {
                warn!("Ping was not answered in time");
                AdminResponse::error("Ping timed out")
            }
        }
    }
}
