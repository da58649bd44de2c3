// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Failure Reporter - log-backed administrative failure channel
//
// Records preload failures to the tracing pipeline and keeps a small ring
// of the most recent ones for the admin surface.

use crate::domain::hosting::FailureReporter;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::error;

const DEFAULT_HISTORY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub preload_context: String,
    pub error_code: i32,
    pub message: String,
    pub reported_at: DateTime<Utc>,
}

pub struct LoggingFailureReporter {
    history: Mutex<VecDeque<FailureRecord>>,
    capacity: usize,
}

impl LoggingFailureReporter {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    pub fn with_history(capacity: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Most recent failures, oldest first.
    pub fn recent(&self) -> Vec<FailureRecord> {
        self.history.lock().iter().cloned().collect()
    }
}

impl Default for LoggingFailureReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureReporter for LoggingFailureReporter {
    fn report_preload_failure(&self, preload_context: &str, error_code: i32, message: &str) {
        error!(preload_context, error_code, message, "Application preload failed");

        let mut history = self.history.lock();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(FailureRecord {
            preload_context: preload_context.to_string(),
            error_code,
            message: message.to_string(),
            reported_at: Utc::now(),
        });
    }
}
