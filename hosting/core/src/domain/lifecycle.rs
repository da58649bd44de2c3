// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Context Lifecycle Primitives
//!
//! Phase and reason enums for the execution-context shutdown state machine,
//! plus the busy/activity tracker that feeds LRU eviction scoring.
//!
//! ```text
//! Running -> ShutdownInitiated -> StoppingGraceful -> StoppingImmediate -> Torndown
//!                              \__________________________________________/
//!                                 (registered set empty: skip to Torndown)
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPhase {
    Running,
    ShutdownInitiated,
    StoppingGraceful,
    StoppingImmediate,
    Torndown,
}

impl ShutdownPhase {
    pub fn is_shutting_down(&self) -> bool {
        !matches!(self, ShutdownPhase::Running)
    }
}

/// Why a context was asked to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    AdministrativeCommand,
    HostShutdown,
    IdleTimeout,
    PhysicalPathChanged,
    Evicted,
    LastObjectUnregistered,
    RuntimeReplaced,
    PreloadRetry,
}

/// Busy counter and last-activity clock for one context.
///
/// Both fields are atomics touched outside any lock; this sits on the
/// request hot path.
#[derive(Debug)]
pub struct ActivityTracker {
    origin: Instant,
    busy: AtomicUsize,
    last_activity_ms: AtomicU64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            busy: AtomicUsize::new(0),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    pub fn enter(&self) {
        self.busy.fetch_add(1, Ordering::AcqRel);
        self.touch();
    }

    pub fn exit(&self) {
        self.touch();
        // Saturate rather than wrap on an unbalanced exit.
        let _ = self
            .busy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn busy_count(&self) -> usize {
        self.busy.load(Ordering::Acquire)
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }

    /// Eviction score: lowest is evicted first.
    ///
    /// Busy contexts score their positive busy count; idle ones score the
    /// negated whole seconds since their last activity.
    pub fn lru_score(&self) -> i64 {
        let busy = self.busy_count();
        if busy > 0 {
            busy as i64
        } else {
            -(self.idle_for().as_secs() as i64)
        }
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII marker for outstanding work; drops decrement the busy count.
pub struct BusyGuard {
    tracker: Arc<ActivityTracker>,
}

impl BusyGuard {
    pub(crate) fn new(tracker: Arc<ActivityTracker>) -> Self {
        tracker.enter();
        Self { tracker }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.tracker.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_idle_score_grows_negative() {
        let tracker = ActivityTracker::new();
        tokio::time::advance(Duration::from_secs(42)).await;
        assert_eq!(tracker.lru_score(), -42);
        tracker.touch();
        assert_eq!(tracker.lru_score(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_score_is_positive() {
        let tracker = Arc::new(ActivityTracker::new());
        tokio::time::advance(Duration::from_secs(100)).await;
        let g1 = BusyGuard::new(tracker.clone());
        let g2 = BusyGuard::new(tracker.clone());
        let _g3 = BusyGuard::new(tracker.clone());
        assert_eq!(tracker.lru_score(), 3);
        drop(g1);
        drop(g2);
        assert_eq!(tracker.busy_count(), 1);
    }

    #[test]
    fn test_unbalanced_exit_saturates() {
        let tracker = ActivityTracker::new();
        tracker.exit();
        assert_eq!(tracker.busy_count(), 0);
    }
}
