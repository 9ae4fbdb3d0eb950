//! # Hot-Swap Loader
//!
//! ## Architecture
//!
//! The loader polls a [`BundleSource`] on a fixed interval and keeps the engine's
//! registry in step with it. It remembers the last marker seen per bundle:
//!
//! - a new bundle, or one whose marker advanced, is opened and every entry is
//!   constructed and registered
//! - a bundle that disappeared has everything it contributed unregistered
//!
//! Each loaded job is tracked by a [`LoadedUnit`] holding a shared
//! [`IsolationScope`] of the bundle version it came from. Supersession goes
//! through [`ExecutionEngine::replace_job`], so the registry maps the name to the
//! old or the new job at every instant. The old job's shutdown hook runs once,
//! and its scope is released when the last unit built from that bundle version
//! is retired.
//!
//! A unit only owns its name while the engine still maps the name to the job
//! the unit installed. Once another registration supersedes it, or it is
//! unregistered outside the loader, the unit is detached: it is dropped from
//! the bookkeeping, its scope reference goes with it, and removing the bundle
//! later leaves the name untouched.
//!
//! ## Key Features
//!
//! - **Failure isolation**: a bundle that cannot be opened, or an entry that
//!   cannot be constructed or registered, is logged and skipped
//! - **Stale entry retirement**: reloading a bundle drops jobs and pipelines the
//!   new version no longer declares
//! - **Scan reports**: every scan returns a [`ScanReport`]

pub mod bundle;
pub mod catalog;
pub mod manifest;

pub use bundle::{
    Bundle, BundleId, BundleItem, BundleMarker, BundleSource, BundleStamp, IsolationScope,
};
pub use catalog::{JobFactory, JobFactoryCatalog};
pub use manifest::{BundleManifest, JobSpec, ManifestBundle, ManifestDirectorySource, PipelineSpec};

use crate::config::LoaderConfig;
use crate::engine::ExecutionEngine;
use crate::error::{BatchillerError, Result};
use crate::logging::{log_error, log_loader_operation};
use crate::models::Job;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bookkeeping entry for one loader-managed job name
#[derive(Clone)]
pub struct LoadedUnit {
    pub job_name: String,
    pub bundle_id: BundleId,
    pub marker: BundleMarker,
    pub loaded_at: DateTime<Utc>,
    job: Arc<dyn Job>,
    scope: Arc<IsolationScope>,
}

impl LoadedUnit {
    pub fn scope(&self) -> &Arc<IsolationScope> {
        &self.scope
    }

    /// The job instance this unit installed
    pub fn job(&self) -> &Arc<dyn Job> {
        &self.job
    }

    /// Whether the engine still maps the name to this unit's job
    pub fn is_current(&self, engine: &ExecutionEngine) -> bool {
        engine
            .job(&self.job_name)
            .is_some_and(|registered| Arc::ptr_eq(&registered, &self.job))
    }

    fn summary(&self) -> LoadedUnitSummary {
        LoadedUnitSummary {
            job_name: self.job_name.clone(),
            bundle: self.bundle_id.to_string(),
            version: self.scope.bundle().version().map(str::to_string),
            loaded_at: self.loaded_at,
        }
    }
}

impl std::fmt::Debug for LoadedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedUnit")
            .field("job_name", &self.job_name)
            .field("bundle_id", &self.bundle_id)
            .field("marker", &self.marker)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedUnitSummary {
    pub job_name: String,
    pub bundle: String,
    pub version: Option<String>,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub bundle: String,
    /// `None` when the bundle itself could not be listed or opened
    pub entry: Option<String>,
    pub reason: String,
}

/// What one scan changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub loaded_bundles: Vec<String>,
    pub unloaded_bundles: Vec<String>,
    pub jobs_loaded: Vec<String>,
    /// Job names whose previous registration was replaced
    pub superseded: Vec<String>,
    pub jobs_unloaded: Vec<String>,
    pub pipelines_loaded: Vec<String>,
    pub pipelines_unloaded: Vec<String>,
    pub failures: Vec<LoadFailure>,
}

impl ScanReport {
    pub fn has_changes(&self) -> bool {
        !(self.loaded_bundles.is_empty() && self.unloaded_bundles.is_empty())
    }

    fn fail(&mut self, bundle: &BundleId, entry: Option<&str>, reason: String) {
        log_error(
            "loader",
            entry.map_or("open_bundle", |_| "construct_entry"),
            &reason,
            Some(bundle.as_str()),
        );
        self.failures.push(LoadFailure {
            bundle: bundle.to_string(),
            entry: entry.map(str::to_string),
            reason,
        });
    }
}

#[derive(Default)]
struct LoaderState {
    stamps: HashMap<BundleId, BundleMarker>,
    /// Keyed by job name; at most one unit per name
    units: HashMap<String, LoadedUnit>,
    pipelines: HashMap<String, BundleId>,
}

pub struct HotSwapLoader {
    config: LoaderConfig,
    source: Arc<dyn BundleSource>,
    engine: ExecutionEngine,
    state: Mutex<LoaderState>,
    shutdown: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl HotSwapLoader {
    pub fn new(config: LoaderConfig, source: Arc<dyn BundleSource>, engine: ExecutionEngine) -> Self {
        Self {
            config,
            source,
            engine,
            state: Mutex::new(LoaderState::default()),
            shutdown: CancellationToken::new(),
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Loader over `config.jobs_directory` with the built-in job kinds
    pub fn from_config(config: LoaderConfig, engine: ExecutionEngine) -> Self {
        let source = ManifestDirectorySource::new(
            config.jobs_directory.clone(),
            JobFactoryCatalog::with_builtin_kinds(),
        );
        Self::new(config, Arc::new(source), engine)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Prepare the source, run an initial scan and start the periodic scan task.
    /// Returns `Ok(false)` without doing anything when the loader is disabled.
    pub async fn start(self: &Arc<Self>) -> Result<bool> {
        if !self.config.enabled {
            info!("Hot-swap loader disabled by configuration");
            return Ok(false);
        }
        if self.is_running() {
            debug!("Hot-swap loader already running");
            return Ok(true);
        }

        self.source
            .prepare()
            .await
            .map_err(|error| BatchillerError::loader("source", format!("{error:#}")))?;

        let report = self.scan().await;
        info!(
            bundles = report.loaded_bundles.len(),
            jobs = report.jobs_loaded.len(),
            failures = report.failures.len(),
            "🔥 Hot-swap loader initial scan complete"
        );

        let period = match self.config.scan_interval() {
            Duration::ZERO => Duration::from_secs(1),
            period => period,
        };
        let loader = Arc::clone(self);
        let token = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = loader.scan().await;
                        if report.has_changes() || !report.failures.is_empty() {
                            debug!(?report, "Hot-swap scan applied changes");
                        }
                    }
                }
            }
            debug!("Hot-swap scan task stopped");
        });
        *self.task.lock() = Some(handle);
        Ok(true)
    }

    /// Run one scan. Scans are serialised; failures are reported, never raised.
    pub async fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();
        let listed = match self.source.list_bundles().await {
            Ok(listed) => listed,
            Err(error) => {
                report.fail(&BundleId::new("source"), None, format!("{error:#}"));
                return report;
            }
        };

        let mut state = self.state.lock().await;
        self.prune_detached(&mut state);

        let present: HashSet<&BundleId> = listed.iter().map(|stamp| &stamp.id).collect();
        let removed: Vec<BundleId> = state
            .stamps
            .keys()
            .filter(|id| !present.contains(id))
            .cloned()
            .collect();
        for bundle_id in removed {
            self.unload_bundle(&mut state, &bundle_id, &mut report).await;
        }

        for stamp in &listed {
            if let Some(previous) = state.stamps.get(&stamp.id) {
                if *previous >= stamp.marker {
                    continue;
                }
            }
            self.load_bundle(&mut state, stamp, &mut report).await;
            // Recorded even when the bundle failed so it is retried only after it changes
            state.stamps.insert(stamp.id.clone(), stamp.marker);
        }

        report
    }

    async fn load_bundle(&self, state: &mut LoaderState, stamp: &BundleStamp, report: &mut ScanReport) {
        let bundle = match self.source.open_bundle(stamp).await {
            Ok(bundle) => bundle,
            Err(error) => {
                report.fail(&stamp.id, None, format!("{error:#}"));
                return;
            }
        };
        let scope = Arc::new(IsolationScope::new(bundle, stamp.marker));
        let version = scope.bundle().version().map(str::to_string);

        let mut provided_jobs = HashSet::new();
        let mut provided_pipelines = HashSet::new();

        for entry in scope.bundle().entries() {
            let item = match scope.bundle().construct(&entry) {
                Ok(item) => item,
                Err(error) => {
                    report.fail(&stamp.id, Some(&entry), format!("{error:#}"));
                    continue;
                }
            };

            match item {
                BundleItem::Job(job) => {
                    let name = job.name().to_string();
                    match self.engine.replace_job(Arc::clone(&job)).await {
                        Ok(previous) => {
                            let unit = LoadedUnit {
                                job_name: name.clone(),
                                bundle_id: stamp.id.clone(),
                                marker: stamp.marker,
                                loaded_at: Utc::now(),
                                job,
                                scope: Arc::clone(&scope),
                            };
                            // Dropping the retired unit releases its scope once unreferenced
                            let retired = state.units.insert(name.clone(), unit);
                            if previous.is_some() || retired.is_some() {
                                report.superseded.push(name.clone());
                            }
                            log_loader_operation(
                                if previous.is_some() { "supersede" } else { "load" },
                                Some(stamp.id.as_str()),
                                Some(&name),
                                "success",
                                version.as_deref(),
                            );
                            provided_jobs.insert(name.clone());
                            report.jobs_loaded.push(name);
                        }
                        Err(error) => report.fail(&stamp.id, Some(&entry), error.to_string()),
                    }
                }
                BundleItem::Pipeline(descriptor) => {
                    let name = descriptor.name().to_string();
                    match self.engine.register_pipeline(descriptor) {
                        Ok(()) => {
                            state.pipelines.insert(name.clone(), stamp.id.clone());
                            provided_pipelines.insert(name.clone());
                            report.pipelines_loaded.push(name);
                        }
                        Err(error) => report.fail(&stamp.id, Some(&entry), error.to_string()),
                    }
                }
            }
        }

        self.retire_stale(state, &stamp.id, &provided_jobs, &provided_pipelines, report)
            .await;
        report.loaded_bundles.push(stamp.id.to_string());
    }

    /// Drop what an earlier version of `bundle_id` provided but the current one does not
    async fn retire_stale(
        &self,
        state: &mut LoaderState,
        bundle_id: &BundleId,
        provided_jobs: &HashSet<String>,
        provided_pipelines: &HashSet<String>,
        report: &mut ScanReport,
    ) {
        let stale_jobs: Vec<String> = state
            .units
            .values()
            .filter(|unit| &unit.bundle_id == bundle_id && !provided_jobs.contains(&unit.job_name))
            .map(|unit| unit.job_name.clone())
            .collect();
        for name in stale_jobs {
            self.retire_unit(state, &name, report).await;
        }

        let stale_pipelines: Vec<String> = state
            .pipelines
            .iter()
            .filter(|(name, owner)| *owner == bundle_id && !provided_pipelines.contains(*name))
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale_pipelines {
            state.pipelines.remove(&name);
            self.engine.unregister_pipeline(&name);
            report.pipelines_unloaded.push(name);
        }
    }

    async fn unload_bundle(&self, state: &mut LoaderState, bundle_id: &BundleId, report: &mut ScanReport) {
        self.retire_stale(state, bundle_id, &HashSet::new(), &HashSet::new(), report)
            .await;
        state.stamps.remove(bundle_id);
        log_loader_operation("unload", Some(bundle_id.as_str()), None, "success", None);
        report.unloaded_bundles.push(bundle_id.to_string());
    }

    async fn retire_unit(&self, state: &mut LoaderState, job_name: &str, report: &mut ScanReport) {
        let Some(unit) = state.units.remove(job_name) else {
            return;
        };
        if !self.engine.unregister_job_instance(&unit.job).await {
            log_loader_operation(
                "detach",
                Some(unit.bundle_id.as_str()),
                Some(job_name),
                "skipped",
                Some("name registered elsewhere"),
            );
            return;
        }
        log_loader_operation(
            "retire",
            Some(unit.bundle_id.as_str()),
            Some(job_name),
            "success",
            None,
        );
        report.jobs_unloaded.push(job_name.to_string());
    }

    /// Forget units whose job was superseded or unregistered outside the loader
    fn prune_detached(&self, state: &mut LoaderState) {
        state.units.retain(|name, unit| {
            let current = unit.is_current(&self.engine);
            if !current {
                log_loader_operation(
                    "detach",
                    Some(unit.bundle_id.as_str()),
                    Some(name.as_str()),
                    "success",
                    Some("name registered elsewhere"),
                );
            }
            current
        });
    }

    /// Job names currently managed by the loader, sorted
    pub async fn loaded_units(&self) -> Vec<LoadedUnitSummary> {
        let mut state = self.state.lock().await;
        self.prune_detached(&mut state);
        let mut units: Vec<LoadedUnitSummary> = state.units.values().map(LoadedUnit::summary).collect();
        units.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        units
    }

    pub async fn loaded_unit(&self, job_name: &str) -> Option<LoadedUnit> {
        let mut state = self.state.lock().await;
        self.prune_detached(&mut state);
        state.units.get(job_name).cloned()
    }

    /// Stop the scan task, release every isolation scope and clear bookkeeping.
    /// Registered jobs stay registered. Safe to call when never started.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(error = %error, "Hot-swap scan task ended abnormally");
            }
        }

        let mut state = self.state.lock().await;
        for unit in state.units.values() {
            unit.scope.release();
        }
        let released = state.units.len();
        state.units.clear();
        state.pipelines.clear();
        state.stamps.clear();
        info!(released, "Hot-swap loader shut down");
    }
}

impl std::fmt::Debug for HotSwapLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotSwapLoader")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}
