// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Ping Responder
//!
//! Single-flight health check. A ping is only remembered when no other ping
//! is pending; duplicates that arrive meanwhile are dropped. The stored
//! callback is answered exactly once, either by the deferred responder task
//! or by request activity calling [`PingResponder::respond_if_needed`] first.

use crate::domain::hosting::PingCallback;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

pub struct PingResponder {
    pending: Mutex<Option<Arc<dyn PingCallback>>>,
    runtime: Handle,
}

impl PingResponder {
    pub fn new(runtime: Handle) -> Self {
        Self {
            pending: Mutex::new(None),
            runtime,
        }
    }

    /// Remember `callback` if nothing is pending and schedule a response.
    /// Returns false when the ping was dropped as a duplicate.
    pub fn ping(self: &Arc<Self>, callback: Arc<dyn PingCallback>) -> bool {
        {
            let mut pending = self.pending.lock();
            if pending.is_some() {
                debug!("Ping already pending, dropping duplicate");
                return false;
            }
            *pending = Some(callback);
        }

        let responder = Arc::clone(self);
        self.runtime.spawn(async move {
            responder.respond_if_needed();
        });
        true
    }

    /// Take whatever callback is pending and answer it.
    ///
    /// Ownership moves out under the lock, so concurrent callers can never
    /// both invoke the same callback. The callback itself runs unlocked and
    /// its panics are the caller's concern.
    pub fn respond_if_needed(&self) -> bool {
        let taken = self.pending.lock().take();
        match taken {
            Some(callback) => {
                callback.respond();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}
