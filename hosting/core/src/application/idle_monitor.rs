// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Idle Monitor
//
// Periodically shuts down contexts that have had no busy work for longer
// than the configured idle timeout. Stops once host shutdown begins.

use crate::application::registry::DomainRegistry;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub(crate) async fn run(registry: DomainRegistry, idle_timeout: Duration, check_interval: Duration) {
    info!(
        idle_timeout_secs = idle_timeout.as_secs(),
        interval_secs = check_interval.as_secs(),
        "Idle monitor started"
    );
    let mut ticker = tokio::time::interval(check_interval.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if registry.is_shutting_down() {
            debug!("Idle monitor exiting, host is shutting down");
            break;
        }
        let stopped = registry.shutdown_idle_contexts(idle_timeout);
        if stopped > 0 {
            info!(stopped, "Shut down idle execution contexts");
        }
    }
}
