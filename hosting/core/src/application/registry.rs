// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Registry
//!
//! Owns the application-id → [`ExecutionContextSlot`] map and every bulk
//! operation over it: reference-counted open/close, create-or-get,
//! per-application and host-wide shutdown, LRU eviction, enumeration,
//! suspend/resume and ping.
//!
//! ## Locking
//!
//! | Lock | Guards | Held across |
//! |------|--------|-------------|
//! | manager (`slots`) | map insert / clone / swap | nothing else |
//! | slot | that slot's `context` field | the factory call, never an `.await` |
//! | context | registered objects, phase | never user code |
//!
//! Scans over many slots take one slot lock at a time and re-check state
//! after acquiring it.
//!
//! ## Counters
//!
//! - `accessible`: slots currently holding a context.
//! - `active`: contexts not yet torn down. Lags `accessible` while stop
//!   sequences run; `shutdown_all` waits (bounded) for it to reach zero.

use crate::application::idle_monitor;
use crate::application::ping::PingResponder;
use crate::application::preload::PreloadCoordinator;
use crate::application::slot::{ExecutionContextSlot, SlotGuard};
use crate::domain::context::{
    ApplicationInfo, ContextObserver, DomainInfo, ExecutionContext, HostLink,
};
use crate::domain::error::HostingError;
use crate::domain::events::HostingEvent;
use crate::domain::host_config::HostConfig;
use crate::domain::hosting::{
    ApplicationPreloader, ApplicationResolver, ContextFactory, FailureReporter, NoopPreloader,
    PingCallback, StartupParameters,
};
use crate::domain::identity::{ApplicationId, WellKnownKey};
use crate::domain::lifecycle::ShutdownReason;
use crate::domain::registered_object::SuspendState;
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

static GLOBAL_REGISTRY: OnceLock<DomainRegistry> = OnceLock::new();

/// Shared handle to the registry. Cloning is cheap.
#[derive(Clone)]
pub struct DomainRegistry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    config: HostConfig,
    factory: Arc<dyn ContextFactory>,
    resolver: Arc<dyn ApplicationResolver>,
    events: EventBus,
    runtime: Handle,
    slots: Mutex<HashMap<ApplicationId, Arc<ExecutionContextSlot>>>,
    open_count: AtomicIsize,
    shutdown_in_progress: AtomicBool,
    accessible: AtomicUsize,
    active: AtomicUsize,
    drained: Notify,
    ping: Arc<PingResponder>,
    preload: PreloadCoordinator,
    fatal_error: OnceLock<String>,
    self_ref: Weak<RegistryInner>,
}

/// Everything `suspend_all` collected, to be handed back to `resume_all`.
///
/// Contexts that unloaded mid-suspend contribute nothing; contexts whose
/// suspend failed are listed in [`ResumeToken::failures`].
#[derive(Debug, Default)]
pub struct ResumeToken {
    entries: Vec<(Arc<ExecutionContext>, SuspendState)>,
    failures: Vec<(ApplicationId, String)>,
}

impl ResumeToken {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failures(&self) -> &[(ApplicationId, String)] {
        &self.failures
    }

    pub fn applications(&self) -> Vec<ApplicationId> {
        self.entries.iter().map(|(ctx, _)| ctx.app_id().clone()).collect()
    }
}

pub struct DomainRegistryBuilder {
    config: HostConfig,
    factory: Arc<dyn ContextFactory>,
    resolver: Arc<dyn ApplicationResolver>,
    preloader: Arc<dyn ApplicationPreloader>,
    reporter: Option<Arc<dyn FailureReporter>>,
    events: Option<EventBus>,
    runtime: Option<Handle>,
}

impl DomainRegistryBuilder {
    pub fn preloader(mut self, preloader: Arc<dyn ApplicationPreloader>) -> Self {
        self.preloader = preloader;
        self
    }

    pub fn failure_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<DomainRegistry, HostingError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| {
                HostingError::Config("DomainRegistry must be built inside a tokio runtime".to_string())
            })?,
        };
        let events = self
            .events
            .unwrap_or_else(|| EventBus::new(self.config.event_bus_capacity));
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(crate::infrastructure::failure_reporter::LoggingFailureReporter::new()));
        let preload = PreloadCoordinator::new(self.config.max_concurrent_preloads, self.preloader, reporter);
        let ping = Arc::new(PingResponder::new(runtime.clone()));

        let inner = Arc::new_cyclic(|self_ref| RegistryInner {
            config: self.config,
            factory: self.factory,
            resolver: self.resolver,
            events,
            runtime,
            slots: Mutex::new(HashMap::new()),
            open_count: AtomicIsize::new(0),
            shutdown_in_progress: AtomicBool::new(false),
            accessible: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            drained: Notify::new(),
            ping,
            preload,
            fatal_error: OnceLock::new(),
            self_ref: self_ref.clone(),
        });
        Ok(DomainRegistry { inner })
    }
}

impl DomainRegistry {
    pub fn builder(
        config: HostConfig,
        factory: Arc<dyn ContextFactory>,
        resolver: Arc<dyn ApplicationResolver>,
    ) -> DomainRegistryBuilder {
        DomainRegistryBuilder {
            config,
            factory,
            resolver,
            preloader: Arc::new(NoopPreloader),
            reporter: None,
            events: None,
            runtime: None,
        }
    }

    // ------------------------------------------------------------------
    // Process-wide accessor
    // ------------------------------------------------------------------

    /// Make `registry` reachable through [`DomainRegistry::global`].
    /// Fails (returning the argument) if one is already installed.
    pub fn install_global(registry: DomainRegistry) -> Result<(), DomainRegistry> {
        GLOBAL_REGISTRY.set(registry)
    }

    pub fn global() -> Option<&'static DomainRegistry> {
        GLOBAL_REGISTRY.get()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn accessible_count(&self) -> usize {
        self.inner.accessible.load(Ordering::Acquire)
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown_in_progress.load(Ordering::Acquire)
    }

    pub fn slot_count(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Keep the first fatal error reported; later ones are ignored.
    pub fn record_fatal_error(&self, message: impl Into<String>) -> bool {
        let accepted = self.inner.fatal_error.set(message.into()).is_ok();
        if accepted {
            error!(error = ?self.inner.fatal_error.get(), "Fatal hosting error recorded");
        }
        accepted
    }

    pub fn fatal_error(&self) -> Option<&str> {
        self.inner.fatal_error.get().map(String::as_str)
    }

    // ------------------------------------------------------------------
    // Open / close
    // ------------------------------------------------------------------

    pub fn open(&self) {
        self.inner.open_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference; the last close shuts everything down.
    /// Returns true when this call ran `shutdown_all`.
    pub async fn close(&self) -> bool {
        if self.inner.open_count.fetch_sub(1, Ordering::AcqRel) - 1 > 0 {
            return false;
        }
        self.shutdown_all().await;
        true
    }

    // ------------------------------------------------------------------
    // Slots and contexts
    // ------------------------------------------------------------------

    /// The slot for `app_id`, created on first use.
    pub fn slot(&self, app_id: &ApplicationId) -> Arc<ExecutionContextSlot> {
        self.inner.slot(app_id)
    }

    fn snapshot_slots(&self) -> Vec<Arc<ExecutionContextSlot>> {
        self.inner.slots.lock().values().cloned().collect()
    }

    fn live_contexts(&self) -> Vec<Arc<ExecutionContext>> {
        self.snapshot_slots()
            .iter()
            .filter(|slot| slot.looks_occupied())
            .filter_map(|slot| slot.current())
            .collect()
    }

    pub fn resolve(&self, app_id: &ApplicationId) -> Result<StartupParameters, HostingError> {
        self.inner.resolver.resolve(app_id)
    }

    /// The live context for `app_id`, if any. Never creates one.
    pub fn get_context(&self, app_id: &ApplicationId) -> Option<Arc<ExecutionContext>> {
        self.slot(app_id).current()
    }

    /// Return the live context for `app_id`, creating it through the factory
    /// when there is none.
    ///
    /// Exactly one caller per application builds a context; concurrent
    /// callers wait on the slot lock and receive the same instance. Factory
    /// errors leave the slot empty and are returned unchanged.
    pub fn get_or_create_context(
        &self,
        app_id: &ApplicationId,
        params: &StartupParameters,
    ) -> Result<Arc<ExecutionContext>, HostingError> {
        if self.is_shutting_down() {
            return Err(HostingError::ShuttingDown);
        }

        let slot = self.slot(app_id);
        if let Some(limit) = self.inner.config.max_contexts {
            if !slot.looks_occupied() {
                self.reduce_context_count(limit);
            }
        }

        let mut guard = slot.lock();
        // shutdown_all sets the flag before swapping the table, so a slot
        // locked after the swap always observes it here.
        if self.is_shutting_down() {
            return Err(HostingError::ShuttingDown);
        }
        if let Some(existing) = guard.context().cloned() {
            if existing.is_shutdown_initiated() || existing.is_unloaded() {
                self.inner.detach_locked(&mut guard, &existing);
            } else if existing.physical_path() != params.physical_path {
                info!(
                    app_id = %app_id,
                    old = %existing.physical_path().display(),
                    new = %params.physical_path.display(),
                    "Physical path changed, replacing execution context"
                );
                self.inner
                    .initiate_locked(&mut guard, &existing, ShutdownReason::PhysicalPathChanged);
            } else {
                existing.touch();
                return Ok(existing);
            }
        }

        let context = match self.inner.factory.create(app_id, params) {
            Ok(context) => context,
            Err(e) => {
                error!(app_id = %app_id, error = %e, "Failed to create execution context");
                return Err(e);
            }
        };
        self.inner.adopt_locked(&mut guard, &context);
        Ok(context)
    }

    /// Administrative start: resolve parameters for `app_id`, optionally
    /// overriding the physical path, and get or create its context.
    pub fn start_application(
        &self,
        app_id: &ApplicationId,
        physical_path: Option<PathBuf>,
    ) -> Result<Arc<ExecutionContext>, HostingError> {
        let mut params = self.resolve(app_id)?;
        if let Some(path) = physical_path {
            params.physical_path = path;
        }
        self.get_or_create_context(app_id, &params)
    }

    /// Initiate shutdown of the application's context. Idempotent; returns
    /// true only for the call that actually started the shutdown.
    pub fn shutdown_application(&self, app_id: &ApplicationId) -> bool {
        self.shutdown_application_with_reason(app_id, ShutdownReason::AdministrativeCommand)
    }

    pub fn shutdown_application_with_reason(&self, app_id: &ApplicationId, reason: ShutdownReason) -> bool {
        let slot = self.slot(app_id);
        let mut guard = slot.lock();
        match guard.context().cloned() {
            Some(context) => self.inner.initiate_locked(&mut guard, &context, reason),
            None => false,
        }
    }

    /// Shut down every context and wait, bounded by the configured ceiling,
    /// for all of them to finish tearing down. Returns false if the ceiling
    /// was hit first.
    pub async fn shutdown_all(&self) -> bool {
        self.inner.shutdown_in_progress.store(true, Ordering::Release);
        let old_slots = std::mem::take(&mut *self.inner.slots.lock());
        info!(applications = old_slots.len(), "Shutting down all applications");

        for slot in old_slots.values() {
            let mut guard = slot.lock();
            if let Some(context) = guard.context().cloned() {
                if !self
                    .inner
                    .initiate_locked(&mut guard, &context, ShutdownReason::HostShutdown)
                {
                    // Already stopping on its own; just drop it from the table.
                    self.inner.detach_locked(&mut guard, &context);
                }
            }
        }

        let ceiling = self.inner.config.shutdown_all_ceiling;
        let drained = tokio::time::timeout(ceiling, self.inner.wait_for_drain())
            .await
            .is_ok();
        if drained {
            info!("All execution contexts torn down");
        } else {
            warn!(
                remaining = self.active_count(),
                ceiling_secs = ceiling.as_secs(),
                "Gave up waiting for execution contexts to tear down"
            );
        }
        drained
    }

    /// Evict least-recently-used contexts until fewer than `limit` remain
    /// accessible. Returns how many shutdowns were initiated.
    ///
    /// Among equal scores the first slot encountered wins; map iteration
    /// order is unspecified.
    pub fn reduce_context_count(&self, limit: usize) -> usize {
        let slots = self.snapshot_slots();
        let mut evicted = 0;

        while self.accessible_count() >= limit && !self.is_shutting_down() {
            let mut best: Option<(Arc<ExecutionContextSlot>, i64)> = None;

            for slot in &slots {
                // Check before locking: two contexts evicting each other must
                // not wait on each other's slot.
                if !slot.looks_occupied() {
                    continue;
                }
                let guard = slot.lock();
                let Some(context) = guard.context() else {
                    continue;
                };
                let score = context.lru_score();
                if best.as_ref().is_none_or(|(_, best_score)| score < *best_score) {
                    best = Some((slot.clone(), score));
                }
            }

            let Some((victim, score)) = best else {
                break;
            };

            let mut guard = victim.lock();
            let Some(context) = guard.context().cloned() else {
                continue;
            };
            if self.inner.initiate_locked(&mut guard, &context, ShutdownReason::Evicted) {
                evicted += 1;
                metrics::counter!("webhost_contexts_evicted_total").increment(1);
                info!(app_id = %context.app_id(), lru_score = score, "Evicted execution context");
                self.inner.events.publish(HostingEvent::ContextEvicted {
                    app_id: context.app_id().clone(),
                    lru_score: score,
                    evicted_at: Utc::now(),
                });
            } else {
                self.inner.detach_locked(&mut guard, &context);
            }
        }

        evicted
    }

    /// If the context for `app_id` already holds the well-known object
    /// `key`, drop it from the table so the next request builds a fresh one.
    /// The old context is left to finish on its own.
    pub fn remove_from_table_if_runtime_exists(&self, app_id: &ApplicationId, key: &WellKnownKey) -> bool {
        let slot = self.slot(app_id);
        let mut guard = slot.lock();
        let Some(context) = guard.context().cloned() else {
            return false;
        };
        if context.find_well_known(key).is_none() {
            return false;
        }
        debug!(app_id = %app_id, key = %key, "Removing context with existing runtime from table");
        self.inner.detach_locked(&mut guard, &context)
    }

    // ------------------------------------------------------------------
    // Enumeration
    // ------------------------------------------------------------------

    pub fn get_running_applications(&self) -> Vec<ApplicationInfo> {
        self.snapshot_slots()
            .iter()
            .filter_map(|slot| slot.lock().context().map(|ctx| ctx.application_info()))
            .collect()
    }

    pub fn enumerate_domains(&self) -> Vec<DomainInfo> {
        self.snapshot_slots()
            .iter()
            .filter_map(|slot| slot.lock().context().map(|ctx| ctx.domain_info()))
            .collect()
    }

    /// True when no live context has outstanding work.
    pub fn is_idle(&self) -> bool {
        self.snapshot_slots().iter().all(|slot| {
            let guard = slot.lock();
            guard.context().is_none_or(|ctx| ctx.is_idle())
        })
    }

    /// Invoke stop-listening callbacks in every live context.
    pub fn stop_listening_all(&self) -> usize {
        self.live_contexts().iter().map(|ctx| ctx.stop_listening()).sum()
    }

    // ------------------------------------------------------------------
    // Suspend / resume
    // ------------------------------------------------------------------

    /// Suspend every live context in parallel and wait for all of them.
    pub async fn suspend_all(&self) -> ResumeToken {
        let tasks: Vec<_> = self
            .live_contexts()
            .into_iter()
            .map(|context| {
                let app_id = context.app_id().clone();
                // Plain spawn: the caller's span and task-locals are not carried over.
                let task = self.inner.runtime.spawn(async move {
                    let state = context.suspend().await?;
                    Ok::<_, HostingError>((context, state))
                });
                (app_id, task)
            })
            .collect();

        let mut token = ResumeToken::default();
        for (app_id, task) in tasks {
            match task.await {
                Ok(Ok(entry)) => token.entries.push(entry),
                Ok(Err(e)) if e.is_unloaded() => {
                    debug!(app_id = %app_id, "Context unloaded during suspend");
                }
                Ok(Err(e)) => {
                    warn!(app_id = %app_id, error = %e, "Failed to suspend application");
                    token.failures.push((app_id, e.to_string()));
                }
                Err(e) => {
                    warn!(app_id = %app_id, error = %e, "Suspend task aborted");
                    token.failures.push((app_id, e.to_string()));
                }
            }
        }

        info!(suspended = token.len(), failed = token.failures.len(), "Suspended applications");
        self.inner.events.publish(HostingEvent::ApplicationsSuspended {
            count: token.len(),
            suspended_at: Utc::now(),
        });
        token
    }

    /// Schedule a resume per suspended context and return immediately.
    /// Each resume runs in its own task; failures are logged there.
    pub fn resume_all(&self, token: ResumeToken) -> Vec<JoinHandle<()>> {
        let count = token.entries.len();
        let handles = token
            .entries
            .into_iter()
            .map(|(context, state)| {
                self.inner.runtime.spawn(async move {
                    match context.resume(state).await {
                        Ok(()) => {}
                        Err(e) if e.is_unloaded() => {
                            debug!(app_id = %context.app_id(), "Context unloaded before resume");
                        }
                        Err(e) => {
                            warn!(app_id = %context.app_id(), error = %e, "Failed to resume application");
                        }
                    }
                })
            })
            .collect();

        self.inner.events.publish(HostingEvent::ApplicationsResumed {
            count,
            resumed_at: Utc::now(),
        });
        handles
    }

    // ------------------------------------------------------------------
    // Preload
    // ------------------------------------------------------------------

    /// Enable or disable preload for `app_id` under the given preload context.
    pub fn set_preload_state(&self, preload_context: &str, app_id: &ApplicationId, enabled: bool) {
        let slot = self.slot(app_id);
        let mut guard = slot.lock();
        guard.preload_context = enabled.then(|| preload_context.to_string());
        debug!(app_id = %app_id, preload_context, enabled, "Preload state changed");
    }

    pub async fn preload_if_required(&self, app_id: &ApplicationId) -> Result<bool, HostingError> {
        self.inner.preload.preload_if_required(self, app_id).await
    }

    // ------------------------------------------------------------------
    // Ping and idle monitoring
    // ------------------------------------------------------------------

    pub fn ping(&self, callback: Arc<dyn PingCallback>) -> bool {
        self.inner.ping.ping(callback)
    }

    pub fn respond_to_ping_if_needed(&self) -> bool {
        self.inner.ping.respond_if_needed()
    }

    /// Start the idle monitor if an idle timeout is configured.
    pub fn spawn_idle_monitor(&self) -> Option<JoinHandle<()>> {
        let timeout = self.inner.config.idle_timeout?;
        let interval = self.inner.config.idle_check_interval;
        let registry = self.clone();
        Some(
            self.inner
                .runtime
                .spawn(idle_monitor::run(registry, timeout, interval)),
        )
    }

    /// Shut down every live, non-busy context idle for at least `timeout`.
    pub fn shutdown_idle_contexts(&self, timeout: Duration) -> usize {
        self.live_contexts()
            .into_iter()
            .filter(|ctx| ctx.is_idle() && ctx.idle_for() >= timeout)
            .filter(|ctx| ctx.initiate_shutdown(ShutdownReason::IdleTimeout))
            .count()
    }
}

impl RegistryInner {
    fn slot(&self, app_id: &ApplicationId) -> Arc<ExecutionContextSlot> {
        let mut slots = self.slots.lock();
        slots
            .entry(app_id.clone())
            .or_insert_with(|| Arc::new(ExecutionContextSlot::new(app_id.clone())))
            .clone()
    }

    fn registry(&self) -> Option<DomainRegistry> {
        self.self_ref.upgrade().map(|inner| DomainRegistry { inner })
    }

    /// Bind a freshly built context to this registry and install it.
    fn adopt_locked(&self, guard: &mut SlotGuard<'_>, context: &Arc<ExecutionContext>) {
        let observer: Weak<dyn ContextObserver> = self.self_ref.clone();
        let bound = context.bind(HostLink {
            observer,
            runtime: self.runtime.clone(),
            shutdown_timeout: self.config.effective_shutdown_timeout(),
        });
        if !bound {
            warn!(app_id = %context.app_id(), "Factory returned a context already bound to a registry");
        }

        if let Some(previous) = guard.install(context.clone()) {
            // Only reachable if a caller installed over a live context.
            warn!(app_id = %previous.app_id(), "Replaced context without detaching it");
            self.accessible.fetch_sub(1, Ordering::AcqRel);
        }
        let accessible = self.accessible.fetch_add(1, Ordering::AcqRel) + 1;
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::gauge!("webhost_contexts_accessible").set(accessible as f64);
        metrics::gauge!("webhost_contexts_active").set(active as f64);
        metrics::counter!("webhost_contexts_created_total").increment(1);

        info!(app_id = %context.app_id(), instance = %context.instance_id(), "Execution context created");
        self.events.publish(HostingEvent::ContextCreated {
            app_id: context.app_id().clone(),
            instance_id: context.instance_id().to_string(),
            created_at: context.created_at(),
        });
    }

    /// Remove `context` from the slot if it is still installed there.
    fn detach_locked(&self, guard: &mut SlotGuard<'_>, context: &Arc<ExecutionContext>) -> bool {
        if !guard.detach(context) {
            return false;
        }
        let accessible = self
            .accessible
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1);
        metrics::gauge!("webhost_contexts_accessible").set(accessible as f64);
        true
    }

    /// Shutdown initiation for callers already holding the slot lock.
    fn initiate_locked(
        &self,
        guard: &mut SlotGuard<'_>,
        context: &Arc<ExecutionContext>,
        reason: ShutdownReason,
    ) -> bool {
        if !context.try_begin_shutdown(reason) {
            return false;
        }
        self.after_shutdown_initiated(guard, context, reason);
        context.schedule_stop();
        true
    }

    fn after_shutdown_initiated(
        &self,
        guard: &mut SlotGuard<'_>,
        context: &Arc<ExecutionContext>,
        reason: ShutdownReason,
    ) {
        let detached = self.detach_locked(guard, context);
        self.events.publish(HostingEvent::ShutdownInitiated {
            app_id: context.app_id().clone(),
            instance_id: context.instance_id().to_string(),
            reason,
            initiated_at: Utc::now(),
        });

        // Restart right away if the application is marked for preload.
        if detached
            && !self.shutdown_in_progress.load(Ordering::Acquire)
            && guard.preload_context.is_some()
            && !guard.retrying_preload
        {
            if let Some(registry) = self.registry() {
                let app_id = context.app_id().clone();
                self.runtime.spawn(async move {
                    if let Err(e) = registry.preload_if_required(&app_id).await {
                        warn!(app_id = %app_id, error = %e, "Automatic restart preload failed");
                    }
                });
            }
        }
    }

    async fn wait_for_drain(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl ContextObserver for RegistryInner {
    fn context_shutdown_initiated(&self, context: &Arc<ExecutionContext>, reason: ShutdownReason) {
        if self.shutdown_in_progress.load(Ordering::Acquire) {
            // The table was swapped out; shutdown_all detaches old slots itself.
            self.events.publish(HostingEvent::ShutdownInitiated {
                app_id: context.app_id().clone(),
                instance_id: context.instance_id().to_string(),
                reason,
                initiated_at: Utc::now(),
            });
            return;
        }
        let slot = self.slot(context.app_id());
        let mut guard = slot.lock();
        self.after_shutdown_initiated(&mut guard, context, reason);
    }

    fn context_torn_down(&self, context: &ExecutionContext) {
        let remaining = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|previous| previous - 1)
            .unwrap_or(0);
        metrics::gauge!("webhost_contexts_active").set(remaining as f64);

        self.events.publish(HostingEvent::ContextTornDown {
            app_id: context.app_id().clone(),
            instance_id: context.instance_id().to_string(),
            torn_down_at: Utc::now(),
        });
        if remaining == 0 {
            self.drained.notify_waiters();
        }
    }
}
