// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Registered Background Objects
//!
//! Contracts for objects that live inside an execution context and take part
//! in its shutdown, suspend and stop-listening protocols.
//!
//! Optional capabilities are exposed through `into_*` queries that the
//! context evaluates once, at registration time, and caches.

use crate::domain::context::Registration;
use crate::domain::error::HostingError;
use crate::domain::identity::ApplicationId;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

#[async_trait]
pub trait RegisteredObject: Send + Sync {
    /// Ask the object to stop.
    ///
    /// With `immediate == false` the object may finish asynchronously and call
    /// [`Registration::unregister`] once it is done. With `immediate == true`
    /// it should unregister before returning; anything still registered after
    /// the immediate pass is dropped by the forced teardown.
    async fn stop(&self, immediate: bool, registration: Registration) -> Result<(), HostingError>;

    fn into_suspendible(self: Arc<Self>) -> Option<Arc<dyn Suspendible>> {
        None
    }

    fn into_stop_listener(self: Arc<Self>) -> Option<Arc<dyn StopListener>> {
        None
    }
}

impl fmt::Debug for dyn RegisteredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RegisteredObject(..)")
    }
}

#[async_trait]
pub trait Suspendible: Send + Sync {
    async fn suspend(&self) -> Result<SuspendToken, HostingError>;
    async fn resume(&self, token: SuspendToken) -> Result<(), HostingError>;
}

pub trait StopListener: Send + Sync {
    fn on_stop_listening(&self);
}

/// Opaque value produced by [`Suspendible::suspend`] and handed back to
/// [`Suspendible::resume`] on the same object.
pub struct SuspendToken(Box<dyn Any + Send + Sync>);

impl SuspendToken {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn empty() -> Self {
        Self::new(())
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        match self.0.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(inner) => Err(Self(inner)),
        }
    }
}

impl fmt::Debug for SuspendToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SuspendToken(..)")
    }
}

/// Per-context suspend state. Owned by the caller between suspend and
/// resume; its contents are not inspectable.
pub struct SuspendState {
    pub(crate) app_id: ApplicationId,
    pub(crate) entries: Vec<(Arc<dyn Suspendible>, SuspendToken)>,
}

impl SuspendState {
    pub fn application(&self) -> &ApplicationId {
        &self.app_id
    }
}

impl fmt::Debug for SuspendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendState")
            .field("app_id", &self.app_id)
            .field("entries", &self.entries.len())
            .finish()
    }
}
