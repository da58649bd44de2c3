// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Hosting Collaborators
//!
//! Traits for the pieces the lifecycle manager consumes but does not own:
//! how an application id maps to paths and settings, how an isolated
//! context is actually built, how preload warms it, and where failures and
//! ping answers go.

use crate::domain::context::{ContextDescriptor, ExecutionContext};
use crate::domain::error::HostingError;
use crate::domain::identity::ApplicationId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything needed to start one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupParameters {
    pub virtual_path: String,
    pub physical_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

impl StartupParameters {
    pub fn new(virtual_path: impl Into<String>, physical_path: impl Into<PathBuf>) -> Self {
        Self {
            virtual_path: virtual_path.into(),
            physical_path: physical_path.into(),
            site_id: None,
            settings: HashMap::new(),
        }
    }

    pub fn with_site(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn descriptor(&self, app_id: &ApplicationId) -> ContextDescriptor {
        ContextDescriptor {
            app_id: app_id.clone(),
            virtual_path: self.virtual_path.clone(),
            physical_path: self.physical_path.clone(),
            site_id: self.site_id.clone(),
        }
    }
}

/// Builds fully initialised execution contexts.
///
/// Called under the application's slot lock; implementations may block but
/// must not call back into the registry for the same application.
pub trait ContextFactory: Send + Sync {
    fn create(
        &self,
        app_id: &ApplicationId,
        params: &StartupParameters,
    ) -> Result<Arc<ExecutionContext>, HostingError>;
}

/// Maps an application id to its startup parameters.
pub trait ApplicationResolver: Send + Sync {
    fn resolve(&self, app_id: &ApplicationId) -> Result<StartupParameters, HostingError>;
}

/// Result of warming a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadInfo {
    /// False disables preload for the application from now on.
    pub keep_enabled: bool,
}

impl Default for PreloadInfo {
    fn default() -> Self {
        Self { keep_enabled: true }
    }
}

#[async_trait]
pub trait ApplicationPreloader: Send + Sync {
    async fn preload(
        &self,
        context: &Arc<ExecutionContext>,
        preload_context: &str,
    ) -> Result<PreloadInfo, HostingError>;
}

/// Preloader that only creates the context.
pub struct NoopPreloader;

#[async_trait]
impl ApplicationPreloader for NoopPreloader {
    async fn preload(
        &self,
        _context: &Arc<ExecutionContext>,
        _preload_context: &str,
    ) -> Result<PreloadInfo, HostingError> {
        Ok(PreloadInfo::default())
    }
}

/// Best-effort administrative failure channel. Never retried.
pub trait FailureReporter: Send + Sync {
    fn report_preload_failure(&self, preload_context: &str, error_code: i32, message: &str);
}

pub trait PingCallback: Send + Sync {
    fn respond(&self);
}
