// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::identity::ApplicationId;
use crate::domain::lifecycle::ShutdownReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostingEvent {
    ContextCreated {
        app_id: ApplicationId,
        instance_id: String,
        created_at: DateTime<Utc>,
    },
    ShutdownInitiated {
        app_id: ApplicationId,
        instance_id: String,
        reason: ShutdownReason,
        initiated_at: DateTime<Utc>,
    },
    ContextTornDown {
        app_id: ApplicationId,
        instance_id: String,
        torn_down_at: DateTime<Utc>,
    },
    ContextEvicted {
        app_id: ApplicationId,
        lru_score: i64,
        evicted_at: DateTime<Utc>,
    },
    PreloadFailed {
        app_id: ApplicationId,
        preload_context: String,
        message: String,
        failed_at: DateTime<Utc>,
    },
    ApplicationsSuspended {
        count: usize,
        suspended_at: DateTime<Utc>,
    },
    ApplicationsResumed {
        count: usize,
        resumed_at: DateTime<Utc>,
    },
}

impl HostingEvent {
    /// The application this event concerns, if it is about a single one.
    pub fn app_id(&self) -> Option<&ApplicationId> {
        match self {
            HostingEvent::ContextCreated { app_id, .. }
            | HostingEvent::ShutdownInitiated { app_id, .. }
            | HostingEvent::ContextTornDown { app_id, .. }
            | HostingEvent::ContextEvicted { app_id, .. }
            | HostingEvent::PreloadFailed { app_id, .. } => Some(app_id),
            HostingEvent::ApplicationsSuspended { .. } | HostingEvent::ApplicationsResumed { .. } => None,
        }
    }
}
