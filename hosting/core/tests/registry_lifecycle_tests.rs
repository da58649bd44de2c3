// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the domain registry.
//!
//! Covers the properties the request path relies on:
//! - at most one live context per application under concurrent lookups
//! - idempotent shutdown and exactly-once stop delivery
//! - least-recently-used eviction order
//! - bounded host shutdown with misbehaving objects
//! - single-flight ping
//! - suspend/resume handing tokens back to the right objects

mod common;

use async_trait::async_trait;
use common::{build_registry, params, CooperativeObject, StubbornObject, TestFactory};
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use webhost_core::application::dispatch::RequestDispatchFacade;
use webhost_core::context::{ExecutionContext, Registration};
use webhost_core::error::HostingError;
use webhost_core::events::HostingEvent;
use webhost_core::host_config::HostConfig;
use webhost_core::hosting::PingCallback;
use webhost_core::identity::{ApplicationId, WellKnownKey};
use webhost_core::lifecycle::ShutdownReason;
use webhost_core::registered_object::{RegisteredObject, SuspendToken, Suspendible};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookups_create_one_context() {
    let factory = Arc::new(TestFactory {
        delay: Some(Duration::from_millis(20)),
        ..Default::default()
    });
    let registry = build_registry(HostConfig::default(), factory.clone());
    let id = ApplicationId::new("shop");

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.get_or_create_context(&id, &params("shop")) })
        })
        .collect();

    let mut contexts = Vec::new();
    for task in tasks {
        contexts.push(task.await.unwrap().unwrap());
    }

    assert_eq!(factory.calls(), 1);
    assert!(contexts.iter().all(|ctx| Arc::ptr_eq(ctx, &contexts[0])));
    assert_eq!(registry.accessible_count(), 1);
    assert_eq!(registry.active_count(), 1);
}

#[tokio::test]
async fn test_failed_creation_leaves_slot_empty() {
    let factory = Arc::new(TestFactory::failing(1));
    let registry = build_registry(HostConfig::default(), factory.clone());
    let id = ApplicationId::new("shop");

    let err = registry.get_or_create_context(&id, &params("shop")).unwrap_err();
    assert!(err.is_io_failure());
    assert!(registry.get_context(&id).is_none());
    assert_eq!(registry.accessible_count(), 0);

    assert!(registry.get_or_create_context(&id, &params("shop")).is_ok());
    assert_eq!(factory.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_is_idempotent() {
    let factory = Arc::new(TestFactory::default());
    let registry = build_registry(HostConfig::default(), factory);
    let mut events = registry.events().subscribe();
    let id = ApplicationId::new("shop");

    let ctx = registry.get_or_create_context(&id, &params("shop")).unwrap();
    let objects: Vec<_> = (0..3).map(|_| Arc::new(CooperativeObject::default())).collect();
    for object in &objects {
        ctx.register(object.clone());
    }

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.shutdown_application(&id) })
        })
        .collect();
    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    ctx.wait_torn_down().await;
    assert!(objects.iter().all(|o| o.stops.load(Ordering::SeqCst) == 1));
    assert_eq!(registry.active_count(), 0);
    assert!(!ctx.initiate_shutdown(ShutdownReason::AdministrativeCommand));

    let initiated = events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, HostingEvent::ShutdownInitiated { .. }))
        .count();
    assert_eq!(initiated, 1);
}

#[tokio::test]
async fn test_last_unregister_detaches_context() {
    let factory = Arc::new(TestFactory::default());
    let registry = build_registry(HostConfig::default(), factory.clone());
    let id = ApplicationId::new("shop");

    let ctx = registry.get_or_create_context(&id, &params("shop")).unwrap();
    let registration = ctx.register(Arc::new(CooperativeObject::default()));
    registration.unregister();

    assert!(registry.get_context(&id).is_none());
    ctx.wait_torn_down().await;

    let replacement = registry.get_or_create_context(&id, &params("shop")).unwrap();
    assert!(!Arc::ptr_eq(&ctx, &replacement));
    assert_eq!(factory.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_eviction_prefers_longest_idle() {
    let factory = Arc::new(TestFactory::default());
    let registry = build_registry(HostConfig::default(), factory);

    let oldest = registry.get_or_create_context(&ApplicationId::new("a"), &params("a")).unwrap();
    tokio::time::advance(Duration::from_secs(50)).await;
    let recent = registry.get_or_create_context(&ApplicationId::new("b"), &params("b")).unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    let busy = registry.get_or_create_context(&ApplicationId::new("c"), &params("c")).unwrap();
    let _guards: Vec<_> = (0..3).map(|_| busy.enter_busy()).collect();

    assert!(oldest.lru_score() < recent.lru_score());
    assert!(recent.lru_score() < busy.lru_score());

    assert_eq!(registry.reduce_context_count(3), 1);
    assert_eq!(oldest.shutdown_reason(), Some(ShutdownReason::Evicted));
    assert!(!recent.is_shutdown_initiated());

    assert_eq!(registry.reduce_context_count(2), 1);
    assert_eq!(recent.shutdown_reason(), Some(ShutdownReason::Evicted));
    assert!(!busy.is_shutdown_initiated());
    assert_eq!(registry.accessible_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_max_contexts_evicts_before_create() {
    let factory = Arc::new(TestFactory::default());
    let config = HostConfig {
        max_contexts: Some(2),
        ..Default::default()
    };
    let registry = build_registry(config, factory);

    let first = registry.get_or_create_context(&ApplicationId::new("a"), &params("a")).unwrap();
    tokio::time::advance(Duration::from_secs(5)).await;
    registry.get_or_create_context(&ApplicationId::new("b"), &params("b")).unwrap();
    tokio::time::advance(Duration::from_secs(5)).await;

    // Re-using a live context never evicts.
    registry.get_or_create_context(&ApplicationId::new("b"), &params("b")).unwrap();
    assert_eq!(registry.accessible_count(), 2);

    registry.get_or_create_context(&ApplicationId::new("c"), &params("c")).unwrap();
    assert_eq!(first.shutdown_reason(), Some(ShutdownReason::Evicted));
    assert_eq!(registry.accessible_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_all_returns_within_ceiling() {
    let factory = Arc::new(TestFactory::default());
    let config = HostConfig {
        shutdown_timeout: Duration::from_secs(60),
        shutdown_all_ceiling: Duration::from_secs(10),
        ..Default::default()
    };
    let registry = build_registry(config, factory);

    let polite = registry.get_or_create_context(&ApplicationId::new("polite"), &params("polite")).unwrap();
    polite.register(Arc::new(CooperativeObject::default()));
    let stuck = registry.get_or_create_context(&ApplicationId::new("stuck"), &params("stuck")).unwrap();
    stuck.register(Arc::new(StubbornObject));

    let started = tokio::time::Instant::now();
    let drained = registry.shutdown_all().await;

    assert!(!drained);
    assert!(started.elapsed() <= Duration::from_secs(11));
    assert!(polite.is_unloaded());
    assert!(!stuck.is_unloaded());
    assert_eq!(registry.accessible_count(), 0);
    assert_eq!(registry.slot_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stubborn_object_is_forced_out_after_both_passes() {
    let factory = Arc::new(TestFactory::default());
    let config = HostConfig {
        shutdown_timeout: Duration::from_secs(5),
        shutdown_all_ceiling: Duration::from_secs(60),
        ..Default::default()
    };
    let registry = build_registry(config, factory);
    let ctx = registry.get_or_create_context(&ApplicationId::new("stuck"), &params("stuck")).unwrap();
    ctx.register(Arc::new(StubbornObject));

    assert!(registry.shutdown_all().await);
    assert!(ctx.is_unloaded());
    assert_eq!(ctx.registered_count(), 0);
    assert_eq!(registry.active_count(), 0);
}

struct CountingPing(Arc<std::sync::atomic::AtomicUsize>);

impl PingCallback for CountingPing {
    fn respond(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_ping_is_single_flight() {
    let factory = Arc::new(TestFactory::default());
    let registry = build_registry(HostConfig::default(), factory);
    let facade = RequestDispatchFacade::new(registry.clone());
    let responses = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let accepted = (0..5)
        .filter(|_| registry.ping(Arc::new(CountingPing(responses.clone()))))
        .count();
    assert_eq!(accepted, 1);

    // Request activity answers the pending ping before the deferred task runs.
    let id = ApplicationId::new("shop");
    let busy_inside = facade
        .dispatch(&id, &params("shop"), |ctx| async move { Ok(ctx.busy_count()) })
        .await
        .unwrap();
    assert_eq!(busy_inside, 1);

    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert_eq!(responses.load(Ordering::SeqCst), 1);
    assert!(!registry.respond_to_ping_if_needed());
}

struct Checkpointing {
    name: &'static str,
    value: u32,
    resumed: mpsc::UnboundedSender<(&'static str, u32)>,
}

#[async_trait]
impl RegisteredObject for Checkpointing {
    async fn stop(&self, _immediate: bool, registration: Registration) -> Result<(), HostingError> {
        registration.unregister();
        Ok(())
    }

    fn into_suspendible(self: Arc<Self>) -> Option<Arc<dyn Suspendible>> {
        Some(self)
    }
}

#[async_trait]
impl Suspendible for Checkpointing {
    async fn suspend(&self) -> Result<SuspendToken, HostingError> {
        Ok(SuspendToken::new(self.value))
    }

    async fn resume(&self, token: SuspendToken) -> Result<(), HostingError> {
        let value = token
            .downcast::<u32>()
            .map_err(|_| HostingError::SuspendFailed("foreign token".to_string()))?;
        let _ = self.resumed.send((self.name, value));
        Ok(())
    }
}

#[tokio::test]
async fn test_suspend_resume_round_trip() {
    let factory = Arc::new(TestFactory::default());
    let registry = build_registry(HostConfig::default(), factory);
    let (tx, mut rx) = mpsc::unbounded_channel();

    for (name, value) in [("a", 1u32), ("b", 2), ("c", 3)] {
        let ctx = registry
            .get_or_create_context(&ApplicationId::new(name), &params(name))
            .unwrap();
        ctx.register(Arc::new(Checkpointing {
            name,
            value,
            resumed: tx.clone(),
        }));
    }

    let token = registry.suspend_all().await;
    assert_eq!(token.len(), 3);
    assert!(token.failures().is_empty());

    futures::future::join_all(registry.resume_all(token)).await;

    let mut resumed = Vec::new();
    for _ in 0..3 {
        resumed.push(rx.recv().await.unwrap());
    }
    resumed.sort();
    assert_eq!(resumed, vec![("a", 1), ("b", 2), ("c", 3)]);
}

/// Suspendible whose checkpoint store is unavailable.
struct RefusingCheckpoint;

#[async_trait]
impl RegisteredObject for RefusingCheckpoint {
    async fn stop(&self, _immediate: bool, registration: Registration) -> Result<(), HostingError> {
        registration.unregister();
        Ok(())
    }

    fn into_suspendible(self: Arc<Self>) -> Option<Arc<dyn Suspendible>> {
        Some(self)
    }
}

#[async_trait]
impl Suspendible for RefusingCheckpoint {
    async fn suspend(&self) -> Result<SuspendToken, HostingError> {
        Err(HostingError::SuspendFailed("checkpoint store offline".to_string()))
    }

    async fn resume(&self, _token: SuspendToken) -> Result<(), HostingError> {
        Ok(())
    }
}

/// Suspendible that shuts its own context down while being suspended.
#[derive(Default)]
struct SelfUnloading {
    context: OnceLock<Weak<ExecutionContext>>,
}

#[async_trait]
impl RegisteredObject for SelfUnloading {
    async fn stop(&self, _immediate: bool, registration: Registration) -> Result<(), HostingError> {
        registration.unregister();
        Ok(())
    }

    fn into_suspendible(self: Arc<Self>) -> Option<Arc<dyn Suspendible>> {
        Some(self)
    }
}

#[async_trait]
impl Suspendible for SelfUnloading {
    async fn suspend(&self) -> Result<SuspendToken, HostingError> {
        if let Some(context) = self.context.get().and_then(Weak::upgrade) {
            context.initiate_shutdown(ShutdownReason::AdministrativeCommand);
            context.wait_torn_down().await;
        }
        Ok(SuspendToken::new(0u32))
    }

    async fn resume(&self, _token: SuspendToken) -> Result<(), HostingError> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_suspend_all_skips_unloaded_and_collects_failures() {
    let factory = Arc::new(TestFactory::default());
    let registry = build_registry(HostConfig::default(), factory);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let healthy = registry
        .get_or_create_context(&ApplicationId::new("healthy"), &params("healthy"))
        .unwrap();
    healthy.register(Arc::new(Checkpointing {
        name: "healthy",
        value: 9,
        resumed: tx,
    }));

    let refusing = registry
        .get_or_create_context(&ApplicationId::new("refusing"), &params("refusing"))
        .unwrap();
    refusing.register(Arc::new(RefusingCheckpoint));

    let unloading = registry
        .get_or_create_context(&ApplicationId::new("unloading"), &params("unloading"))
        .unwrap();
    let object = Arc::new(SelfUnloading::default());
    let _ = object.context.set(Arc::downgrade(&unloading));
    unloading.register(object);

    let token = registry.suspend_all().await;

    assert_eq!(token.len(), 1);
    assert_eq!(token.applications(), vec![ApplicationId::new("healthy")]);
    assert_eq!(token.failures().len(), 1);
    assert_eq!(token.failures()[0].0, ApplicationId::new("refusing"));
    assert!(unloading.is_unloaded());
    assert!(!refusing.is_unloaded());

    futures::future::join_all(registry.resume_all(token)).await;
    assert_eq!(rx.recv().await, Some(("healthy", 9)));
}

#[tokio::test]
async fn test_well_known_object_flow() {
    let factory = Arc::new(TestFactory::default());
    let registry = build_registry(HostConfig::default(), factory.clone());
    let facade = RequestDispatchFacade::new(registry.clone());
    let id = ApplicationId::new("shop");
    let key = WellKnownKey::new("runtime");

    let created = facade
        .create_object(&id, &params("shop"), key.clone(), true, |_ctx| {
            Ok(Arc::new(CooperativeObject::default()) as Arc<dyn RegisteredObject>)
        })
        .unwrap();
    let found = facade.get_object(&id, &key).unwrap();
    assert!(Arc::ptr_eq(&created, &found));

    let err = facade
        .create_object(&id, &params("shop"), key.clone(), true, |_ctx| {
            Ok(Arc::new(CooperativeObject::default()) as Arc<dyn RegisteredObject>)
        })
        .unwrap_err();
    assert!(matches!(err, HostingError::ObjectAlreadyExists { .. }));

    // The only object unregisters on stop, which shuts the context down.
    let ctx = registry.get_context(&id).unwrap();
    assert!(facade.stop_object(&id, &key).await.unwrap());
    assert!(facade.get_object(&id, &key).is_none());
    ctx.wait_torn_down().await;
    assert!(!facade.stop_object(&id, &key).await.unwrap());
    assert_eq!(factory.calls(), 1);
}

#[tokio::test]
async fn test_remove_from_table_if_runtime_exists() {
    let factory = Arc::new(TestFactory::default());
    let registry = build_registry(HostConfig::default(), factory.clone());
    let facade = RequestDispatchFacade::new(registry.clone());
    let id = ApplicationId::new("shop");
    let key = WellKnownKey::new("runtime");

    assert!(!facade.remove_from_table_if_runtime_exists(&id, &key));
    facade
        .create_object(&id, &params("shop"), key.clone(), false, |_ctx| {
            Ok(Arc::new(CooperativeObject::default()) as Arc<dyn RegisteredObject>)
        })
        .unwrap();

    assert!(facade.remove_from_table_if_runtime_exists(&id, &key));
    assert!(registry.get_context(&id).is_none());

    let fresh = registry.get_or_create_context(&id, &params("shop")).unwrap();
    assert!(fresh.find_well_known(&key).is_none());
    assert_eq!(factory.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_idle_monitor_shuts_down_idle_contexts() {
    let factory = Arc::new(TestFactory::default());
    let config = HostConfig {
        idle_timeout: Some(Duration::from_secs(30)),
        idle_check_interval: Duration::from_secs(5),
        ..Default::default()
    };
    let registry = build_registry(config, factory);
    let idle = registry.get_or_create_context(&ApplicationId::new("idle"), &params("idle")).unwrap();
    let busy = registry.get_or_create_context(&ApplicationId::new("busy"), &params("busy")).unwrap();
    let _guard = busy.enter_busy();

    let monitor = registry.spawn_idle_monitor().unwrap();
    tokio::time::sleep(Duration::from_secs(40)).await;

    assert_eq!(idle.shutdown_reason(), Some(ShutdownReason::IdleTimeout));
    assert!(!busy.is_shutdown_initiated());
    monitor.abort();
}

#[tokio::test]
async fn test_enumeration_and_idleness() {
    let factory = Arc::new(TestFactory::default());
    let registry = build_registry(HostConfig::default(), factory);
    assert!(registry.is_idle());

    let a = registry.get_or_create_context(&ApplicationId::new("a"), &params("a")).unwrap();
    registry.get_or_create_context(&ApplicationId::new("b"), &params("b")).unwrap();

    let mut running: Vec<_> = registry
        .get_running_applications()
        .into_iter()
        .map(|info| info.virtual_path)
        .collect();
    running.sort();
    assert_eq!(running, vec!["/a", "/b"]);
    assert_eq!(registry.enumerate_domains().len(), 2);

    let guard = a.enter_busy();
    assert!(!registry.is_idle());
    drop(guard);
    assert!(registry.is_idle());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_creation_racing_shutdown_all_leaves_nothing_running() {
    for round in 0..50 {
        let config = HostConfig {
            shutdown_all_ceiling: Duration::from_secs(5),
            ..Default::default()
        };
        let registry = build_registry(config, Arc::new(TestFactory::default()));

        let creators: Vec<_> = (0..6)
            .map(|creator| {
                let registry = registry.clone();
                tokio::task::spawn_blocking(move || {
                    let mut created = Vec::new();
                    for n in 0..20 {
                        let app = format!("app-{round}-{creator}-{n}");
                        match registry.get_or_create_context(&ApplicationId::new(app.as_str()), &params(&app)) {
                            Ok(ctx) => created.push(ctx),
                            Err(HostingError::ShuttingDown) => break,
                            Err(e) => panic!("unexpected creation error: {e}"),
                        }
                    }
                    created
                })
            })
            .collect();

        tokio::task::yield_now().await;
        let drained = registry.shutdown_all().await;

        for creator in creators {
            for ctx in creator.await.unwrap() {
                assert!(
                    ctx.is_shutdown_initiated(),
                    "context {} outlived shutdown_all",
                    ctx.app_id()
                );
            }
        }
        assert!(drained, "round {round} did not drain");
        assert_eq!(registry.active_count(), 0);
    }
}
