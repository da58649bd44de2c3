// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Host Configuration
//
// Tunables for the domain lifecycle manager plus the static application
// table consumed by the in-process context factory:
// - shutdown and drain bounds
// - preload throttling
// - context count limit and idle eviction
// - event bus sizing

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard upper bound for a single context's graceful stop window.
pub const MAX_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// How long registered objects get to stop gracefully before the
    /// immediate pass (clamped to [`MAX_SHUTDOWN_TIMEOUT`])
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Upper bound for `shutdown_all` waiting on contexts to finish teardown
    #[serde(default = "default_shutdown_all_ceiling", with = "humantime_serde")]
    pub shutdown_all_ceiling: Duration,

    /// Maximum number of preloads running at once
    #[serde(default = "default_max_concurrent_preloads")]
    pub max_concurrent_preloads: usize,

    /// Evict least-recently-used contexts before creating one past this count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_contexts: Option<usize>,

    /// Shut down contexts idle for longer than this
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub idle_timeout: Option<Duration>,

    #[serde(default = "default_idle_check_interval", with = "humantime_serde")]
    pub idle_check_interval: Duration,

    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Statically configured applications
    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Explicit id; derived from the paths and site when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub virtual_path: String,

    pub physical_path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,

    /// Preload context name; enables preload for this application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preload: Option<String>,

    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_all_ceiling() -> Duration {
    Duration::from_secs(300)
}

fn default_max_concurrent_preloads() -> usize {
    4
}

fn default_idle_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_event_bus_capacity() -> usize {
    1000
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: default_shutdown_timeout(),
            shutdown_all_ceiling: default_shutdown_all_ceiling(),
            max_concurrent_preloads: default_max_concurrent_preloads(),
            max_contexts: None,
            idle_timeout: None,
            idle_check_interval: default_idle_check_interval(),
            event_bus_capacity: default_event_bus_capacity(),
            applications: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Discover configuration file using precedence order
    /// 1. WEBHOST_CONFIG_PATH environment variable
    /// 2. ./webhost.yaml (working directory)
    /// 3. ~/.webhost/config.yaml (user home)
    /// 4. /etc/webhost/config.yaml (system, Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("WEBHOST_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./webhost.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".webhost").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/webhost/config.yaml");
            if system_config.exists() {
                return Some(system_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("WEBHOST_SHUTDOWN_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!("Environment override: WEBHOST_SHUTDOWN_TIMEOUT_SECS={}", secs);
                    self.shutdown_timeout = Duration::from_secs(secs);
                }
                Err(_) => tracing::warn!(
                    "Invalid value for WEBHOST_SHUTDOWN_TIMEOUT_SECS: '{}'. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("WEBHOST_MAX_CONTEXTS") {
            match val.parse::<usize>() {
                Ok(0) => self.max_contexts = None,
                Ok(n) => {
                    tracing::info!("Environment override: WEBHOST_MAX_CONTEXTS={}", n);
                    self.max_contexts = Some(n);
                }
                Err(_) => tracing::warn!("Invalid value for WEBHOST_MAX_CONTEXTS: '{}'. Ignoring.", val),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.shutdown_all_ceiling.is_zero() {
            anyhow::bail!("shutdown_all_ceiling must be greater than zero");
        }
        if self.max_concurrent_preloads == 0 {
            anyhow::bail!("max_concurrent_preloads must be at least 1");
        }
        if self.max_contexts == Some(0) {
            anyhow::bail!("max_contexts must be at least 1 when set");
        }
        if self.event_bus_capacity == 0 {
            anyhow::bail!("event_bus_capacity must be at least 1");
        }
        if self.idle_check_interval.is_zero() {
            anyhow::bail!("idle_check_interval must be greater than zero");
        }

        for app in &self.applications {
            if app.virtual_path.is_empty() || !app.virtual_path.starts_with('/') {
                anyhow::bail!("Application virtual_path must start with '/': '{}'", app.virtual_path);
            }
            if app.physical_path.as_os_str().is_empty() {
                anyhow::bail!("Application physical_path cannot be empty for: {}", app.virtual_path);
            }
        }

        Ok(())
    }

    /// Effective graceful stop window
    pub fn effective_shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout.min(MAX_SHUTDOWN_TIMEOUT)
    }
}
