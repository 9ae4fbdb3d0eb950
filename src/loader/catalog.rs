//! Job factories keyed by manifest `kind`.

use crate::error::{BatchillerError, Result};
use crate::jobs::{CommandJob, EchoJob};
use crate::loader::JobSpec;
use crate::models::Job;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a job from its manifest entry
pub trait JobFactory: Send + Sync {
    fn create(&self, spec: &JobSpec) -> anyhow::Result<Arc<dyn Job>>;
}

impl<F> JobFactory for F
where
    F: Fn(&JobSpec) -> anyhow::Result<Arc<dyn Job>> + Send + Sync,
{
    fn create(&self, spec: &JobSpec) -> anyhow::Result<Arc<dyn Job>> {
        self(spec)
    }
}

#[derive(Clone, Default)]
pub struct JobFactoryCatalog {
    factories: HashMap<String, Arc<dyn JobFactory>>,
}

impl JobFactoryCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the `echo` and `command` kinds registered
    pub fn with_builtin_kinds() -> Self {
        let mut catalog = Self::new();
        catalog.register("echo", EchoJob::from_spec);
        catalog.register("command", CommandJob::from_spec);
        catalog
    }

    /// Register or replace the factory for `kind`
    pub fn register(&mut self, kind: impl Into<String>, factory: impl JobFactory + 'static) {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn create(&self, spec: &JobSpec) -> Result<Arc<dyn Job>> {
        let factory = self.factories.get(&spec.kind).ok_or_else(|| {
            BatchillerError::loader(&spec.name, format!("unknown job kind '{}'", spec.kind))
        })?;
        factory
            .create(spec)
            .map_err(|error| BatchillerError::loader(&spec.name, format!("{error:#}")))
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for JobFactoryCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobFactoryCatalog")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: &str) -> JobSpec {
        serde_json::from_value(serde_json::json!({ "name": "nightly", "kind": kind })).unwrap()
    }

    #[test]
    fn test_builtin_kinds() {
        let catalog = JobFactoryCatalog::with_builtin_kinds();
        assert_eq!(catalog.kinds(), vec!["command", "echo"]);

        let job = catalog.create(&spec("echo")).unwrap();
        assert_eq!(job.name(), "nightly");
    }

    #[test]
    fn test_unknown_kind_is_loader_error() {
        let catalog = JobFactoryCatalog::with_builtin_kinds();
        let error = match catalog.create(&spec("python")) {
            Err(error) => error,
            Ok(_) => panic!("unknown kind must not construct a job"),
        };
        assert!(matches!(error, BatchillerError::LoaderError { .. }));
        assert!(error.to_string().contains("python"));
    }

    #[test]
    fn test_command_without_program_is_rejected() {
        let catalog = JobFactoryCatalog::with_builtin_kinds();
        assert!(catalog.create(&spec("command")).is_err());
    }
}
