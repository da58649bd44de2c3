// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Request Dispatch Facade
//!
//! Entry points used by the request path: create or look up well-known
//! objects in an application's context, and run a unit of work inside it
//! with the context marked busy for the duration.

use crate::application::registry::DomainRegistry;
use crate::domain::context::ExecutionContext;
use crate::domain::error::HostingError;
use crate::domain::hosting::StartupParameters;
use crate::domain::identity::{ApplicationId, WellKnownKey};
use crate::domain::registered_object::RegisteredObject;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct RequestDispatchFacade {
    registry: DomainRegistry,
}

impl RequestDispatchFacade {
    pub fn new(registry: DomainRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }

    /// Get or create the application's context, then create the well-known
    /// object `key` inside it.
    pub fn create_object<F>(
        &self,
        app_id: &ApplicationId,
        params: &StartupParameters,
        key: WellKnownKey,
        fail_if_exists: bool,
        ctor: F,
    ) -> Result<Arc<dyn RegisteredObject>, HostingError>
    where
        F: FnOnce(&Arc<ExecutionContext>) -> Result<Arc<dyn RegisteredObject>, HostingError>,
    {
        let context = self.registry.get_or_create_context(app_id, params)?;
        context.create_well_known(key, fail_if_exists, || ctor(&context))
    }

    /// Look up a well-known object without creating anything.
    pub fn get_object(&self, app_id: &ApplicationId, key: &WellKnownKey) -> Option<Arc<dyn RegisteredObject>> {
        let slot = self.registry.slot(app_id);
        let guard = slot.lock();
        guard.context()?.find_well_known(key)
    }

    /// Ask a well-known object to stop. Returns false if the application has
    /// no live context or no such object.
    pub async fn stop_object(&self, app_id: &ApplicationId, key: &WellKnownKey) -> Result<bool, HostingError> {
        let Some(context) = self.registry.get_context(app_id) else {
            debug!(app_id = %app_id, key = %key, "No live context for stop request");
            return Ok(false);
        };
        context.stop_well_known(key).await
    }

    pub fn remove_from_table_if_runtime_exists(&self, app_id: &ApplicationId, key: &WellKnownKey) -> bool {
        self.registry.remove_from_table_if_runtime_exists(app_id, key)
    }

    /// Run `work` inside the application's context.
    ///
    /// The context counts as busy until `work` completes, and any pending
    /// ping is answered since the host is evidently alive.
    pub async fn dispatch<F, Fut, T>(
        &self,
        app_id: &ApplicationId,
        params: &StartupParameters,
        work: F,
    ) -> Result<T, HostingError>
    where
        F: FnOnce(Arc<ExecutionContext>) -> Fut,
        Fut: Future<Output = Result<T, HostingError>>,
    {
        let context = self.registry.get_or_create_context(app_id, params)?;
        let _busy = context.enter_busy();
        self.registry.respond_to_ping_if_needed();
        work(context).await
    }
}
