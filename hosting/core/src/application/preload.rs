// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Preload Coordinator
//!
//! Warms applications marked for preload. At most
//! `max_concurrent_preloads` run at once. An attempt that fails on I/O is
//! retried exactly once after the half-built context is shut down; any
//! terminal failure goes to the [`FailureReporter`] and back to the caller.

use crate::application::registry::DomainRegistry;
use crate::domain::error::HostingError;
use crate::domain::events::HostingEvent;
use crate::domain::hosting::{ApplicationPreloader, FailureReporter};
use crate::domain::identity::ApplicationId;
use crate::domain::lifecycle::ShutdownReason;
use chrono::Utc;
use std::error::Error as StdError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Code reported when a failure carries no OS error number.
const GENERIC_FAILURE_CODE: i32 = -1;

pub struct PreloadCoordinator {
    permits: Semaphore,
    preloader: Arc<dyn ApplicationPreloader>,
    reporter: Arc<dyn FailureReporter>,
}

impl PreloadCoordinator {
    pub fn new(
        max_concurrent: usize,
        preloader: Arc<dyn ApplicationPreloader>,
        reporter: Arc<dyn FailureReporter>,
    ) -> Self {
        Self {
            permits: Semaphore::new(max_concurrent.max(1)),
            preloader,
            reporter,
        }
    }

    /// Preload `app_id` if it is marked for preload and has no live context.
    /// Returns whether a preload actually ran.
    pub async fn preload_if_required(
        &self,
        registry: &DomainRegistry,
        app_id: &ApplicationId,
    ) -> Result<bool, HostingError> {
        if pending_preload(registry, app_id).is_none() {
            return Ok(false);
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| HostingError::ShuttingDown)?;

        // State may have changed while queued for a permit.
        let Some(preload_context) = pending_preload(registry, app_id) else {
            return Ok(false);
        };
        debug!(app_id = %app_id, preload_context = %preload_context, "Preloading application");

        let first = match self.attempt(registry, app_id, &preload_context).await {
            Ok(()) => return Ok(true),
            Err(e) => e,
        };
        if !first.is_io_failure() {
            return Err(self.fail(registry, app_id, &preload_context, first));
        }

        warn!(app_id = %app_id, error = %first, "Preload hit an I/O failure, retrying once");
        let slot = registry.slot(app_id);
        slot.lock().retrying_preload = true;
        registry.shutdown_application_with_reason(app_id, ShutdownReason::PreloadRetry);
        let retried = self.attempt(registry, app_id, &preload_context).await;
        slot.lock().retrying_preload = false;

        match retried {
            Ok(()) => {
                info!(app_id = %app_id, "Preload succeeded on retry");
                Ok(true)
            }
            Err(e) => Err(self.fail(registry, app_id, &preload_context, e)),
        }
    }

    async fn attempt(
        &self,
        registry: &DomainRegistry,
        app_id: &ApplicationId,
        preload_context: &str,
    ) -> Result<(), HostingError> {
        let params = registry.resolve(app_id)?;
        let context = registry.get_or_create_context(app_id, &params)?;
        let info = self.preloader.preload(&context, preload_context).await?;
        if !info.keep_enabled {
            registry.set_preload_state(preload_context, app_id, false);
        }
        Ok(())
    }

    fn fail(
        &self,
        registry: &DomainRegistry,
        app_id: &ApplicationId,
        preload_context: &str,
        error: HostingError,
    ) -> HostingError {
        let message = error.to_string();
        error!(app_id = %app_id, preload_context, error = %message, "Preload failed");

        self.reporter
            .report_preload_failure(preload_context, failure_code(&error), &message);
        metrics::counter!("webhost_preload_failures_total").increment(1);
        registry.events().publish(HostingEvent::PreloadFailed {
            app_id: app_id.clone(),
            preload_context: preload_context.to_string(),
            message,
            failed_at: Utc::now(),
        });

        HostingError::PreloadFailed {
            app_id: app_id.clone(),
            source: Box::new(error),
        }
    }
}

/// The preload context to use if the application is marked for preload and
/// currently has no context.
fn pending_preload(registry: &DomainRegistry, app_id: &ApplicationId) -> Option<String> {
    let slot = registry.slot(app_id);
    let guard = slot.lock();
    match (&guard.preload_context, guard.context()) {
        (Some(preload_context), None) => Some(preload_context.clone()),
        _ => None,
    }
}

/// OS error number of the innermost I/O cause, if there is one.
fn failure_code(error: &HostingError) -> i32 {
    if let HostingError::Io(e) = error {
        return e.raw_os_error().unwrap_or(GENERIC_FAILURE_CODE);
    }
    std::iter::successors(Some(error as &(dyn StdError + 'static)), |&e| e.source())
        .filter_map(|e| e.downcast_ref::<std::io::Error>())
        .filter_map(std::io::Error::raw_os_error)
        .last()
        .unwrap_or(GENERIC_FAILURE_CODE)
}
