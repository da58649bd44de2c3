// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the registry integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use webhost_core::application::registry::DomainRegistry;
use webhost_core::context::{ExecutionContext, Registration};
use webhost_core::error::HostingError;
use webhost_core::host_config::HostConfig;
use webhost_core::hosting::{ApplicationResolver, ContextFactory, StartupParameters};
use webhost_core::identity::ApplicationId;
use webhost_core::registered_object::RegisteredObject;

pub struct StaticResolver;

impl ApplicationResolver for StaticResolver {
    fn resolve(&self, app_id: &ApplicationId) -> Result<StartupParameters, HostingError> {
        Ok(params(app_id.as_str()))
    }
}

pub fn params(app: &str) -> StartupParameters {
    StartupParameters::new(format!("/{app}"), format!("/srv/{app}"))
}

/// Factory that counts calls and fails the first `io_failures` with an
/// I/O error wrapped in `CreationFailed`.
#[derive(Default)]
pub struct TestFactory {
    pub calls: AtomicUsize,
    pub io_failures: usize,
    pub delay: Option<Duration>,
}

impl TestFactory {
    pub fn failing(io_failures: usize) -> Self {
        Self {
            io_failures,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ContextFactory for TestFactory {
    fn create(&self, app_id: &ApplicationId, params: &StartupParameters) -> Result<Arc<ExecutionContext>, HostingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if call <= self.io_failures {
            return Err(HostingError::creation(
                app_id.clone(),
                io::Error::new(io::ErrorKind::PermissionDenied, "application root is locked"),
            ));
        }
        Ok(ExecutionContext::new(params.descriptor(app_id)))
    }
}

/// Object that unregisters itself as soon as it is asked to stop.
#[derive(Default)]
pub struct CooperativeObject {
    pub stops: AtomicUsize,
}

#[async_trait]
impl RegisteredObject for CooperativeObject {
    async fn stop(&self, _immediate: bool, registration: Registration) -> Result<(), HostingError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        registration.unregister();
        Ok(())
    }
}

/// Object that never finishes stopping.
pub struct StubbornObject;

#[async_trait]
impl RegisteredObject for StubbornObject {
    async fn stop(&self, _immediate: bool, _registration: Registration) -> Result<(), HostingError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

pub fn build_registry(config: HostConfig, factory: Arc<TestFactory>) -> DomainRegistry {
    DomainRegistry::builder(config, factory, Arc::new(StaticResolver))
        .build()
        .expect("registry inside runtime")
}
