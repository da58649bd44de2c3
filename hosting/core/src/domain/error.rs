// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::identity::{ApplicationId, WellKnownKey};
use std::error::Error as StdError;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum HostingError {
    #[error("Failed to create execution context for {app_id}: {source}")]
    CreationFailed {
        app_id: ApplicationId,
        #[source]
        source: BoxError,
    },
    #[error("Execution context for {0} has been unloaded")]
    ContextUnloaded(ApplicationId),
    #[error("Host is shutting down")]
    ShuttingDown,
    #[error("Object '{key}' already exists in application {app_id}")]
    ObjectAlreadyExists { app_id: ApplicationId, key: WellKnownKey },
    #[error("Object '{key}' not found in application {app_id}")]
    ObjectNotFound { app_id: ApplicationId, key: WellKnownKey },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Failed to stop object: {0}")]
    StopFailed(String),
    #[error("Failed to suspend application: {0}")]
    SuspendFailed(String),
    #[error("Preload of {app_id} failed: {source}")]
    PreloadFailed {
        app_id: ApplicationId,
        #[source]
        source: Box<HostingError>,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HostingError {
    pub fn creation(app_id: ApplicationId, source: impl Into<BoxError>) -> Self {
        Self::CreationFailed {
            app_id,
            source: source.into(),
        }
    }

    /// True when the context was already gone; callers treat this as a no-op.
    pub fn is_unloaded(&self) -> bool {
        matches!(self, Self::ContextUnloaded(_))
    }

    /// True when the innermost cause of this error is an I/O error.
    ///
    /// Follows `source()` to the end of the chain, so an I/O error wrapped by
    /// a factory inside `CreationFailed` is still detected. `PreloadFailed`
    /// is classified by the error it wraps.
    pub fn is_io_failure(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::PreloadFailed { source, .. } => source.is_io_failure(),
            _ => std::iter::successors(Some(self as &(dyn StdError + 'static)), |&e| e.source())
                .last()
                .is_some_and(|e| {
                    e.is::<std::io::Error>() || matches!(e.downcast_ref::<HostingError>(), Some(HostingError::Io(_)))
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_classification_walks_sources() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "sharing violation");
        let err = HostingError::creation(ApplicationId::new("app"), io_err);
        assert!(err.is_io_failure());

        let wrapped = HostingError::PreloadFailed {
            app_id: ApplicationId::new("app"),
            source: Box::new(err),
        };
        assert!(wrapped.is_io_failure());
    }

    #[test]
    fn test_non_io_errors_are_not_classified() {
        let err = HostingError::creation(ApplicationId::new("app"), "bad configuration");
        assert!(!err.is_io_failure());
        assert!(!HostingError::ShuttingDown.is_io_failure());
        assert!(HostingError::Io(io::Error::other("disk")).is_io_failure());
    }

    #[test]
    fn test_unloaded_detection() {
        assert!(HostingError::ContextUnloaded(ApplicationId::new("a")).is_unloaded());
        assert!(!HostingError::ShuttingDown.is_unloaded());
    }
}
