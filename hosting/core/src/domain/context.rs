// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Context
//!
//! One live, isolated instance of a hosted application together with its
//! shutdown/registration state machine.
//!
//! ## Locks
//!
//! - `state` guards the registered-object set, the well-known table, the
//!   phase and the teardown hooks. It is never held across a callback into
//!   user code and a context never locks another context.
//! - `creation` hands out one lock per well-known key so each key is built
//!   at most once. User constructors run under the key's lock, not under
//!   `state`, and may create objects for other keys on the same context.
//!
//! ## Shutdown
//!
//! [`ExecutionContext::initiate_shutdown`] flips a one-way flag; exactly one
//! caller wins. The winner detaches the context from its registry slot
//! synchronously and schedules the stop sequence on the runtime, so the
//! triggering request never blocks on teardown.

use crate::domain::error::HostingError;
use crate::domain::identity::{ApplicationId, WellKnownKey};
use crate::domain::lifecycle::{ActivityTracker, BusyGuard, ShutdownPhase, ShutdownReason};
use crate::domain::registered_object::{RegisteredObject, StopListener, SuspendState, SuspendToken, Suspendible};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

static CONTEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Callbacks from a context into whatever registry owns it.
pub trait ContextObserver: Send + Sync {
    /// The context has won its shutdown race and must be detached from its slot.
    fn context_shutdown_initiated(&self, context: &Arc<ExecutionContext>, reason: ShutdownReason);

    /// Teardown finished; the context will never run again.
    fn context_torn_down(&self, context: &ExecutionContext);
}

/// Binding installed by the registry when it adopts a context.
#[derive(Clone)]
pub struct HostLink {
    pub observer: Weak<dyn ContextObserver>,
    pub runtime: Handle,
    pub shutdown_timeout: Duration,
}

/// What a factory needs to describe a new context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDescriptor {
    pub app_id: ApplicationId,
    pub virtual_path: String,
    pub physical_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub id: ApplicationId,
    pub virtual_path: String,
    pub physical_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub id: ApplicationId,
    pub instance_id: String,
    pub virtual_path: String,
    pub physical_path: PathBuf,
    pub site_id: Option<String>,
    pub is_idle: bool,
    pub lru_score: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegistrationId(u64);

impl RegistrationId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Handle given to a registered object so it can remove itself.
#[derive(Clone)]
pub struct Registration {
    id: RegistrationId,
    context: Weak<ExecutionContext>,
}

impl Registration {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Remove the object from its context. Idempotent; a no-op once the
    /// context is gone.
    pub fn unregister(&self) {
        if let Some(context) = self.context.upgrade() {
            context.unregister(self.id);
        }
    }

    pub fn context(&self) -> Option<Arc<ExecutionContext>> {
        self.context.upgrade()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

type TeardownHook = Box<dyn FnOnce() + Send + 'static>;

struct RegisteredEntry {
    object: Arc<dyn RegisteredObject>,
    suspendible: Option<Arc<dyn Suspendible>>,
    stop_listener: Option<Arc<dyn StopListener>>,
    well_known: bool,
}

struct LifecycleState {
    phase: ShutdownPhase,
    reason: Option<ShutdownReason>,
    next_registration: u64,
    objects: HashMap<RegistrationId, RegisteredEntry>,
    well_known: HashMap<WellKnownKey, RegistrationId>,
    teardown_hooks: Vec<TeardownHook>,
}

pub struct ExecutionContext {
    descriptor: ContextDescriptor,
    instance_id: String,
    created_at: DateTime<Utc>,
    activity: Arc<ActivityTracker>,
    shutdown_initiated: AtomicBool,
    teardown_complete: AtomicBool,
    state: Mutex<LifecycleState>,
    creation: Mutex<HashMap<WellKnownKey, Arc<Mutex<()>>>>,
    drained: Notify,
    torn_down: Notify,
    host: OnceLock<HostLink>,
    self_ref: Weak<ExecutionContext>,
}

impl ExecutionContext {
    pub fn new(descriptor: ContextDescriptor) -> Arc<Self> {
        let sequence = CONTEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1;
        let created_at = Utc::now();
        let instance_id = format!(
            "{}-{}-{}",
            descriptor.app_id,
            sequence,
            created_at.timestamp_millis()
        );
        Arc::new_cyclic(|self_ref| Self {
            descriptor,
            instance_id,
            created_at,
            activity: Arc::new(ActivityTracker::new()),
            shutdown_initiated: AtomicBool::new(false),
            teardown_complete: AtomicBool::new(false),
            state: Mutex::new(LifecycleState {
                phase: ShutdownPhase::Running,
                reason: None,
                next_registration: 0,
                objects: HashMap::new(),
                well_known: HashMap::new(),
                teardown_hooks: Vec::new(),
            }),
            creation: Mutex::new(HashMap::new()),
            drained: Notify::new(),
            torn_down: Notify::new(),
            host: OnceLock::new(),
            self_ref: self_ref.clone(),
        })
    }

    /// Attach the context to a registry. Only the first binding sticks.
    pub fn bind(&self, link: HostLink) -> bool {
        self.host.set(link).is_ok()
    }

    pub fn app_id(&self) -> &ApplicationId {
        &self.descriptor.app_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn virtual_path(&self) -> &str {
        &self.descriptor.virtual_path
    }

    pub fn physical_path(&self) -> &Path {
        &self.descriptor.physical_path
    }

    pub fn descriptor(&self) -> &ContextDescriptor {
        &self.descriptor
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.state.lock().phase
    }

    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.state.lock().reason
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn is_unloaded(&self) -> bool {
        self.phase() == ShutdownPhase::Torndown
    }

    pub fn ensure_loaded(&self) -> Result<(), HostingError> {
        if self.is_unloaded() {
            Err(HostingError::ContextUnloaded(self.app_id().clone()))
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Activity
    // ------------------------------------------------------------------

    /// Mark the context busy until the returned guard is dropped.
    pub fn enter_busy(&self) -> BusyGuard {
        BusyGuard::new(self.activity.clone())
    }

    pub fn touch(&self) {
        self.activity.touch();
    }

    pub fn busy_count(&self) -> usize {
        self.activity.busy_count()
    }

    pub fn idle_for(&self) -> Duration {
        self.activity.idle_for()
    }

    pub fn is_idle(&self) -> bool {
        self.activity.busy_count() == 0
    }

    pub fn lru_score(&self) -> i64 {
        self.activity.lru_score()
    }

    pub fn application_info(&self) -> ApplicationInfo {
        ApplicationInfo {
            id: self.descriptor.app_id.clone(),
            virtual_path: self.descriptor.virtual_path.clone(),
            physical_path: self.descriptor.physical_path.clone(),
        }
    }

    pub fn domain_info(&self) -> DomainInfo {
        DomainInfo {
            id: self.descriptor.app_id.clone(),
            instance_id: self.instance_id.clone(),
            virtual_path: self.descriptor.virtual_path.clone(),
            physical_path: self.descriptor.physical_path.clone(),
            site_id: self.descriptor.site_id.clone(),
            is_idle: self.is_idle(),
            lru_score: self.lru_score(),
            created_at: self.created_at,
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a background object.
    ///
    /// Registration stays open during shutdown. An object registered after
    /// teardown has started may be dropped by the forced clear without ever
    /// being stopped.
    pub fn register(&self, object: Arc<dyn RegisteredObject>) -> Registration {
        self.register_entry(object, false)
    }

    fn register_entry(&self, object: Arc<dyn RegisteredObject>, well_known: bool) -> Registration {
        let suspendible = object.clone().into_suspendible();
        let stop_listener = object.clone().into_stop_listener();

        let mut state = self.state.lock();
        state.next_registration += 1;
        let id = RegistrationId(state.next_registration);
        if state.phase == ShutdownPhase::Torndown {
            debug!(app_id = %self.app_id(), registration = id.0, "Dropping registration on torn down context");
        } else {
            state.objects.insert(
                id,
                RegisteredEntry {
                    object,
                    suspendible,
                    stop_listener,
                    well_known,
                },
            );
        }
        Registration {
            id,
            context: self.self_ref.clone(),
        }
    }

    /// Remove a registered object. Removing the last one starts shutdown.
    pub fn unregister(&self, id: RegistrationId) {
        let (removed, now_empty, phase) = {
            let mut state = self.state.lock();
            let removed = state.objects.remove(&id);
            if let Some(entry) = &removed {
                if entry.well_known {
                    state.well_known.retain(|_, rid| *rid != id);
                }
            }
            (removed.is_some(), state.objects.is_empty(), state.phase)
        };

        if !removed {
            return;
        }
        debug!(app_id = %self.app_id(), registration = id.0, "Unregistered object");

        if now_empty {
            self.drained.notify_waiters();
            if phase == ShutdownPhase::Running {
                self.initiate_shutdown(ShutdownReason::LastObjectUnregistered);
            }
        }
    }

    pub fn registered_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Run `hook` exactly once when the context is torn down.
    pub fn add_teardown_hook(&self, hook: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        if state.phase == ShutdownPhase::Torndown {
            drop(state);
            run_hook(self.app_id(), Box::new(hook));
        } else {
            state.teardown_hooks.push(Box::new(hook));
        }
    }

    // ------------------------------------------------------------------
    // Well-known objects
    // ------------------------------------------------------------------

    /// Create the well-known object for `key` unless it already exists.
    ///
    /// With `fail_if_exists` an existing instance is an error; otherwise the
    /// existing instance is returned and `ctor` is never called.
    ///
    /// Construction is serialised per key. `ctor` may create well-known
    /// objects for other keys on this context; asking for its own key from
    /// inside `ctor` deadlocks.
    pub fn create_well_known<F>(
        &self,
        key: WellKnownKey,
        fail_if_exists: bool,
        ctor: F,
    ) -> Result<Arc<dyn RegisteredObject>, HostingError>
    where
        F: FnOnce() -> Result<Arc<dyn RegisteredObject>, HostingError>,
    {
        let key_lock = self.creation.lock().entry(key.clone()).or_default().clone();
        let _creating = key_lock.lock();
        self.ensure_loaded()?;

        if let Some(existing) = self.find_well_known(&key) {
            if fail_if_exists {
                return Err(HostingError::ObjectAlreadyExists {
                    app_id: self.app_id().clone(),
                    key,
                });
            }
            return Ok(existing);
        }

        let object = ctor()?;
        let registration = self.register_entry(object.clone(), true);
        let mut state = self.state.lock();
        if state.objects.contains_key(&registration.id) {
            state.well_known.insert(key.clone(), registration.id);
        }
        drop(state);
        debug!(app_id = %self.app_id(), key = %key, "Created well-known object");
        Ok(object)
    }

    pub fn find_well_known(&self, key: &WellKnownKey) -> Option<Arc<dyn RegisteredObject>> {
        let state = self.state.lock();
        let id = state.well_known.get(key)?;
        state.objects.get(id).map(|entry| entry.object.clone())
    }

    /// Ask the well-known object for `key` to stop gracefully.
    ///
    /// Returns false when no such object exists. The object stays registered
    /// until it unregisters itself.
    pub async fn stop_well_known(&self, key: &WellKnownKey) -> Result<bool, HostingError> {
        let target = {
            let mut state = self.state.lock();
            match state.well_known.remove(key) {
                Some(id) => state.objects.get(&id).map(|e| (id, e.object.clone())),
                None => None,
            }
        };

        let Some((id, object)) = target else {
            return Ok(false);
        };
        let registration = Registration {
            id,
            context: self.self_ref.clone(),
        };
        object.stop(false, registration).await?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Suspend / resume / stop listening
    // ------------------------------------------------------------------

    pub async fn suspend(&self) -> Result<SuspendState, HostingError> {
        self.ensure_loaded()?;
        let targets: Vec<Arc<dyn Suspendible>> = {
            let state = self.state.lock();
            state
                .objects
                .values()
                .filter_map(|entry| entry.suspendible.clone())
                .collect()
        };

        let mut entries = Vec::with_capacity(targets.len());
        for target in targets {
            match target.suspend().await {
                Ok(token) => entries.push((target, token)),
                Err(e) => {
                    if !self.is_unloaded() {
                        self.undo_suspend(entries).await;
                    }
                    return Err(e);
                }
            }
        }
        // Torn down while suspending: the tokens have nothing left to resume.
        self.ensure_loaded()?;
        debug!(app_id = %self.app_id(), objects = entries.len(), "Suspended context");
        Ok(SuspendState {
            app_id: self.app_id().clone(),
            entries,
        })
    }

    async fn undo_suspend(&self, entries: Vec<(Arc<dyn Suspendible>, SuspendToken)>) {
        let count = entries.len();
        for (target, token) in entries {
            if let Err(e) = target.resume(token).await {
                warn!(app_id = %self.app_id(), error = %e, "Failed to resume object after aborted suspend");
            }
        }
        if count > 0 {
            debug!(app_id = %self.app_id(), objects = count, "Resumed objects after aborted suspend");
        }
    }

    pub async fn resume(&self, suspended: SuspendState) -> Result<(), HostingError> {
        self.ensure_loaded()?;
        for (target, token) in suspended.entries {
            if let Err(e) = target.resume(token).await {
                warn!(app_id = %self.app_id(), error = %e, "Failed to resume object");
            }
        }
        Ok(())
    }

    pub fn stop_listening(&self) -> usize {
        let listeners: Vec<Arc<dyn StopListener>> = {
            let state = self.state.lock();
            state
                .objects
                .values()
                .filter_map(|entry| entry.stop_listener.clone())
                .collect()
        };
        for listener in &listeners {
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener.on_stop_listening())).is_err() {
                warn!(app_id = %self.app_id(), "Stop-listening callback panicked");
            }
        }
        listeners.len()
    }

    // ------------------------------------------------------------------
    // Shutdown state machine
    // ------------------------------------------------------------------

    /// Flip the one-way shutdown flag. Returns true for the single winner.
    pub fn try_begin_shutdown(&self, reason: ShutdownReason) -> bool {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let mut state = self.state.lock();
        if state.phase == ShutdownPhase::Running {
            state.phase = ShutdownPhase::ShutdownInitiated;
        }
        state.reason = Some(reason);
        drop(state);
        info!(app_id = %self.app_id(), instance = %self.instance_id, ?reason, "Shutdown initiated");
        true
    }

    /// Start shutdown from inside the context (idle timeout, last object
    /// gone, administrative request without a slot lock held).
    pub fn initiate_shutdown(&self, reason: ShutdownReason) -> bool {
        if !self.try_begin_shutdown(reason) {
            return false;
        }
        if let (Some(link), Some(me)) = (self.host.get(), self.self_ref.upgrade()) {
            if let Some(observer) = link.observer.upgrade() {
                observer.context_shutdown_initiated(&me, reason);
            }
        }
        self.schedule_stop();
        true
    }

    /// Run the stop sequence in the background. Callers must already have
    /// won [`Self::try_begin_shutdown`].
    pub fn schedule_stop(&self) {
        let Some(me) = self.self_ref.upgrade() else {
            return;
        };
        let runtime = self
            .host
            .get()
            .map(|link| link.runtime.clone())
            .or_else(|| Handle::try_current().ok());
        match runtime {
            Some(runtime) => {
                runtime.spawn(async move { me.run_stop_sequence().await });
            }
            None => {
                warn!(app_id = %self.app_id(), "No runtime available, forcing teardown");
                self.finish_teardown();
            }
        }
    }

    fn shutdown_timeout(&self) -> Duration {
        self.host
            .get()
            .map(|link| link.shutdown_timeout)
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    async fn run_stop_sequence(self: Arc<Self>) {
        let timeout = self.shutdown_timeout();

        if self.registered_count() > 0 {
            self.set_phase(ShutdownPhase::StoppingGraceful);
            let graceful = async {
                self.stop_all(false).await;
                self.wait_until_drained().await;
            };
            if tokio::time::timeout(timeout, graceful).await.is_err() && self.registered_count() > 0 {
                warn!(
                    app_id = %self.app_id(),
                    remaining = self.registered_count(),
                    timeout_secs = timeout.as_secs(),
                    "Graceful stop timed out, stopping immediately"
                );
                self.set_phase(ShutdownPhase::StoppingImmediate);
                if tokio::time::timeout(timeout, self.stop_all(true)).await.is_err() {
                    warn!(app_id = %self.app_id(), "Immediate stop timed out, forcing teardown");
                }
            }
        }

        self.finish_teardown();
    }

    /// Stop every registered object, well-known objects first.
    async fn stop_all(&self, immediate: bool) {
        let (well_known, plain): (Vec<_>, Vec<_>) = {
            let state = self.state.lock();
            state
                .objects
                .iter()
                .map(|(id, entry)| (*id, entry.object.clone(), entry.well_known))
                .partition(|(_, _, wk)| *wk)
        };

        for group in [well_known, plain] {
            let stops = group.into_iter().map(|(id, object, _)| {
                let registration = Registration {
                    id,
                    context: self.self_ref.clone(),
                };
                self.stop_one(object, immediate, registration)
            });
            futures::future::join_all(stops).await;
        }
    }

    async fn stop_one(&self, object: Arc<dyn RegisteredObject>, immediate: bool, registration: Registration) {
        let id = registration.id;
        match AssertUnwindSafe(object.stop(immediate, registration)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(app_id = %self.app_id(), registration = id.0, immediate, error = %e, "Registered object failed to stop");
            }
            Err(_) => {
                warn!(app_id = %self.app_id(), registration = id.0, immediate, "Registered object panicked while stopping");
            }
        }
    }

    async fn wait_until_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.registered_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        let mut state = self.state.lock();
        if state.phase != ShutdownPhase::Torndown {
            state.phase = phase;
        }
    }

    /// Clear the registered set, release held resources and tell the host.
    /// Runs at most once.
    pub(crate) fn finish_teardown(&self) {
        let (objects, hooks) = {
            let mut state = self.state.lock();
            if state.phase == ShutdownPhase::Torndown {
                return;
            }
            state.phase = ShutdownPhase::Torndown;
            state.well_known.clear();
            (
                std::mem::take(&mut state.objects),
                std::mem::take(&mut state.teardown_hooks),
            )
        };
        // Shutdown may have been forced without going through the flag.
        self.shutdown_initiated.store(true, Ordering::Release);

        if !objects.is_empty() {
            debug!(app_id = %self.app_id(), dropped = objects.len(), "Forcibly cleared registered objects");
        }
        drop(objects);
        for hook in hooks {
            run_hook(self.app_id(), hook);
        }

        info!(app_id = %self.app_id(), instance = %self.instance_id, "Execution context torn down");
        if let Some(observer) = self.host.get().and_then(|link| link.observer.upgrade()) {
            observer.context_torn_down(self);
        }

        self.teardown_complete.store(true, Ordering::Release);
        self.drained.notify_waiters();
        self.torn_down.notify_waiters();
    }

    /// Wait until teardown, including the host notification, has completed.
    pub async fn wait_torn_down(&self) {
        loop {
            let notified = self.torn_down.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.teardown_complete.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

fn run_hook(app_id: &ApplicationId, hook: TeardownHook) {
    if std::panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
        warn!(app_id = %app_id, "Teardown hook panicked");
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("app_id", self.app_id())
            .field("instance_id", &self.instance_id)
            .field("phase", &self.phase())
            .finish()
    }
}
