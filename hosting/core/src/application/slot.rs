// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Context Slot
//!
//! The stable registry entry for one application id. A slot is created on
//! first lookup and never replaced, so its lock identity is the same for
//! every caller for the life of the registry map; only the `context` field
//! inside it is swapped.

use crate::domain::context::ExecutionContext;
use crate::domain::identity::ApplicationId;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct SlotState {
    context: Option<Arc<ExecutionContext>>,
    pub preload_context: Option<String>,
    pub retrying_preload: bool,
}

impl SlotState {
    pub fn context(&self) -> Option<&Arc<ExecutionContext>> {
        self.context.as_ref()
    }
}

pub struct ExecutionContextSlot {
    app_id: ApplicationId,
    state: Mutex<SlotState>,
    // Mirror of `state.context.is_some()`, readable without the lock.
    occupied: AtomicBool,
}

impl ExecutionContextSlot {
    pub fn new(app_id: ApplicationId) -> Self {
        Self {
            app_id,
            state: Mutex::new(SlotState::default()),
            occupied: AtomicBool::new(false),
        }
    }

    pub fn app_id(&self) -> &ApplicationId {
        &self.app_id
    }

    pub fn lock(&self) -> SlotGuard<'_> {
        SlotGuard {
            slot: self,
            state: self.state.lock(),
        }
    }

    /// Unlocked hint used by scans before taking the lock. The answer may be
    /// stale; callers re-check under [`Self::lock`].
    pub fn looks_occupied(&self) -> bool {
        self.occupied.load(Ordering::Acquire)
    }

    /// Current context, taken under the lock and released immediately.
    pub fn current(&self) -> Option<Arc<ExecutionContext>> {
        self.lock().context().cloned()
    }
}

/// Exclusive access to one slot. Context installs and removals go through
/// here so the unlocked occupancy hint stays in step.
pub struct SlotGuard<'a> {
    slot: &'a ExecutionContextSlot,
    state: MutexGuard<'a, SlotState>,
}

impl SlotGuard<'_> {
    pub fn install(&mut self, context: Arc<ExecutionContext>) -> Option<Arc<ExecutionContext>> {
        let previous = self.state.context.replace(context);
        self.slot.occupied.store(true, Ordering::Release);
        previous
    }

    /// Remove `context` if it is the one installed. Returns true on removal.
    pub fn detach(&mut self, context: &Arc<ExecutionContext>) -> bool {
        match &self.state.context {
            Some(current) if Arc::ptr_eq(current, context) => {
                self.state.context = None;
                self.slot.occupied.store(false, Ordering::Release);
                true
            }
            _ => false,
        }
    }
}

impl std::ops::Deref for SlotGuard<'_> {
    type Target = SlotState;

    fn deref(&self) -> &SlotState {
        &self.state
    }
}

impl std::ops::DerefMut for SlotGuard<'_> {
    fn deref_mut(&mut self) -> &mut SlotState {
        &mut self.state
    }
}
