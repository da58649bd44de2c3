// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Configured Applications
//
// Resolver and in-process context factory backed by the `applications`
// table of the host configuration.

use crate::domain::context::ExecutionContext;
use crate::domain::error::HostingError;
use crate::domain::host_config::{ApplicationConfig, HostConfig};
use crate::domain::hosting::{ApplicationResolver, ContextFactory, StartupParameters};
use crate::domain::identity::ApplicationId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Static application table keyed by application id.
pub struct ConfiguredApplications {
    applications: HashMap<ApplicationId, ApplicationConfig>,
}

impl ConfiguredApplications {
    pub fn from_config(config: &HostConfig) -> Self {
        let applications = config
            .applications
            .iter()
            .map(|app| (Self::id_for(app), app.clone()))
            .collect();
        Self { applications }
    }

    /// Explicit id if configured, otherwise derived from the paths and site.
    pub fn id_for(app: &ApplicationConfig) -> ApplicationId {
        match &app.id {
            Some(id) => ApplicationId::new(id.clone()),
            None => ApplicationId::from_paths(
                &app.virtual_path,
                &app.physical_path.to_string_lossy(),
                app.site.as_deref(),
            ),
        }
    }

    pub fn ids(&self) -> Vec<ApplicationId> {
        self.applications.keys().cloned().collect()
    }

    /// `(id, preload context)` for every application marked for preload.
    pub fn preload_targets(&self) -> Vec<(ApplicationId, String)> {
        self.applications
            .iter()
            .filter_map(|(id, app)| app.preload.clone().map(|ctx| (id.clone(), ctx)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}

impl ApplicationResolver for ConfiguredApplications {
    fn resolve(&self, app_id: &ApplicationId) -> Result<StartupParameters, HostingError> {
        let app = self
            .applications
            .get(app_id)
            .ok_or_else(|| HostingError::InvalidArgument(format!("Unknown application: {}", app_id)))?;

        let mut params = StartupParameters::new(app.virtual_path.clone(), app.physical_path.clone());
        params.site_id = app.site.clone();
        params.settings = app.parameters.clone();
        Ok(params)
    }
}

/// Builds contexts inside this process after checking the application root.
pub struct InProcessContextFactory {
    require_existing_root: bool,
}

impl InProcessContextFactory {
    pub fn new() -> Self {
        Self {
            require_existing_root: true,
        }
    }

    /// Skip the physical path check (for hosts serving virtual content).
    pub fn without_root_check() -> Self {
        Self {
            require_existing_root: false,
        }
    }
}

impl Default for InProcessContextFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextFactory for InProcessContextFactory {
    fn create(
        &self,
        app_id: &ApplicationId,
        params: &StartupParameters,
    ) -> Result<Arc<ExecutionContext>, HostingError> {
        if self.require_existing_root {
            let metadata = std::fs::metadata(&params.physical_path)
                .map_err(|e| HostingError::creation(app_id.clone(), e))?;
            if !metadata.is_dir() {
                return Err(HostingError::creation(
                    app_id.clone(),
                    format!("{} is not a directory", params.physical_path.display()),
                ));
            }
        }

        let context = ExecutionContext::new(params.descriptor(app_id));
        let instance = context.instance_id().to_string();
        context.add_teardown_hook(move || {
            debug!(instance = %instance, "Released execution context resources");
        });
        info!(
            app_id = %app_id,
            physical_path = %params.physical_path.display(),
            settings = params.settings.len(),
            "Built in-process execution context"
        );
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn app(id: Option<&str>, physical: PathBuf, preload: Option<&str>) -> ApplicationConfig {
        ApplicationConfig {
            id: id.map(str::to_string),
            virtual_path: "/shop".to_string(),
            physical_path: physical,
            site: Some("1".to_string()),
            preload: preload.map(str::to_string),
            parameters: HashMap::from([("mode".to_string(), "prod".to_string())]),
        }
    }

    #[test]
    fn test_resolver_uses_configured_and_derived_ids() {
        let config = HostConfig {
            applications: vec![
                app(Some("Shop"), PathBuf::from("/srv/shop"), Some("warmup")),
                app(None, PathBuf::from("/srv/blog"), None),
            ],
            ..Default::default()
        };
        let apps = ConfiguredApplications::from_config(&config);
        assert_eq!(apps.len(), 2);

        let params = apps.resolve(&ApplicationId::new("shop")).unwrap();
        assert_eq!(params.physical_path, PathBuf::from("/srv/shop"));
        assert_eq!(params.site_id.as_deref(), Some("1"));
        assert_eq!(params.settings.get("mode").map(String::as_str), Some("prod"));

        let derived = ConfiguredApplications::id_for(&config.applications[1]);
        assert!(apps.resolve(&derived).is_ok());
        assert_eq!(apps.preload_targets(), vec![(ApplicationId::new("shop"), "warmup".to_string())]);

        let err = apps.resolve(&ApplicationId::new("missing")).unwrap_err();
        assert!(matches!(err, HostingError::InvalidArgument(_)));
    }

    #[test]
    fn test_factory_checks_physical_root() {
        let dir = tempfile::tempdir().unwrap();
        let factory = InProcessContextFactory::new();
        let id = ApplicationId::new("shop");

        let ok = factory.create(&id, &StartupParameters::new("/shop", dir.path()));
        assert!(ok.is_ok());

        let missing = dir.path().join("nope");
        let err = factory
            .create(&id, &StartupParameters::new("/shop", missing.clone()))
            .unwrap_err();
        assert!(err.is_io_failure());

        let relaxed = InProcessContextFactory::without_root_check();
        assert!(relaxed.create(&id, &StartupParameters::new("/shop", missing)).is_ok());
    }
}
