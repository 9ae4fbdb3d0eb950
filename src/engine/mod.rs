//! # Execution Engine
//!
//! ## Architecture: Bounded Worker Pool with Per-Execution Lifecycle
//!
//! The engine owns the job registry and the event dispatcher and runs every
//! execution as its own tokio task. A `Semaphore` sized by
//! `executor.max_concurrent_jobs` is the worker pool: an execution waiting for a
//! permit is Queued, one holding a permit is Running. Callers never block;
//! [`ExecutionEngine::execute_job`] returns an [`ExecutionHandle`] immediately.
//!
//! ## Key Features
//!
//! - **Lifecycle hooks**: `init` at registration, `before_start` / `after_end`
//!   around every attempt, `shutdown` at unregistration or supersession
//! - **Timeouts**: each attempt runs under `tokio::time::timeout`; an expired
//!   attempt is dropped and the execution ends TimedOut
//! - **Retries**: jobs that opt in are re-attempted with exponential backoff
//! - **Cancellation**: per-execution `CancellationToken`
//! - **Persistence**: every state change is written to the [`ExecutionStore`]
//! - **Graceful shutdown**: bounded drain, then force-cancel
//!
//! ## Usage
//!
//! ```rust
//! use batchiller_core::config::ExecutorConfig;
//! use batchiller_core::constants::TriggerType;
//! use batchiller_core::engine::ExecutionEngine;
//! use batchiller_core::jobs::EchoJob;
//! use batchiller_core::models::Parameters;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let engine = ExecutionEngine::in_memory(ExecutorConfig::default());
//! engine.register_job(Arc::new(EchoJob::new("hello"))).await.unwrap();
//!
//! let outcome = engine
//!     .execute_job("hello", Parameters::new(), "operator", TriggerType::Manual)
//!     .await;
//! assert!(outcome.is_success());
//! # });
//! ```

pub mod handle;
pub mod metrics;
pub mod request;
mod worker;

pub use handle::ExecutionHandle;
pub use metrics::EngineMetrics;
pub use request::ExecutionRequest;

use crate::config::ExecutorConfig;
use crate::constants::{
    TriggerType, INIT_EXECUTION_PREFIX, JOB_NOT_FOUND, SHUTDOWN_EXECUTION_PREFIX,
};
use crate::error::{BatchillerError, LifecycleHook, Result};
use crate::events::{DispatcherStats, EventDispatcher, JobEventListener, JobListener};
use crate::logging::{log_error, log_job_operation};
use crate::models::{
    ExecutionContext, ExecutionRecord, Job, JobMetadata, JobOutcome, LifecycleEvent, Parameters,
    PipelineDescriptor,
};
use crate::registry::JobRegistry;
use crate::store::{ExecutionStore, InMemoryExecutionStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::EngineCounters;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
pub(crate) use worker::guard;

/// How long force-cancelled executions get to unwind at shutdown
const FORCE_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Cancellation signal plus the reason given by whoever pulled it
#[derive(Clone)]
pub(crate) struct ExecutionControl {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl ExecutionControl {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// First reason wins
    fn cancel(&self, reason: &str) {
        {
            let mut current = self.reason.lock();
            if current.is_none() {
                *current = Some(reason.to_string());
            }
        }
        self.token.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn reason(&self) -> String {
        self.reason
            .lock()
            .clone()
            .unwrap_or_else(|| "cancelled".to_string())
    }
}

struct InFlightExecution {
    job_name: String,
    control: ExecutionControl,
    submitted_at: DateTime<Utc>,
}

/// Summary of an execution that has not reached a terminal state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightSummary {
    pub execution_id: String,
    pub job_name: String,
    pub submitted_at: DateTime<Utc>,
}

/// Job execution engine for bounded concurrent job execution
pub struct ExecutionEngine {
    registry: Arc<JobRegistry>,
    dispatcher: Arc<EventDispatcher>,
    store: Arc<dyn ExecutionStore>,
    config: ExecutorConfig,
    /// Semaphore to control concurrent execution
    workers: Arc<Semaphore>,
    in_flight: Arc<DashMap<String, InFlightExecution>>,
    counters: Arc<EngineCounters>,
    accepting: Arc<AtomicBool>,
}

impl ExecutionEngine {
    pub fn new(config: ExecutorConfig, store: Arc<dyn ExecutionStore>) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            registry: Arc::new(JobRegistry::new()),
            dispatcher: Arc::new(EventDispatcher::new()),
            store,
            config,
            workers,
            in_flight: Arc::new(DashMap::new()),
            counters: Arc::new(EngineCounters::default()),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Engine backed by an unbounded in-memory record store
    pub fn in_memory(config: ExecutorConfig) -> Self {
        Self::new(config, Arc::new(InMemoryExecutionStore::new()))
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn ExecutionStore> {
        Arc::clone(&self.store)
    }

    pub(crate) fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    // ----------------------------------------------------------------------
    // Registration
    // ----------------------------------------------------------------------

    /// Validate, initialise and register a job. An existing job with the same
    /// name is overwritten.
    pub async fn register_job(&self, job: Arc<dyn Job>) -> Result<()> {
        self.install(job).await.map(|_| ())
    }

    /// Register `job` in place of any job with the same name, then run the
    /// replaced job's shutdown hook. The name resolves to the old job until the
    /// swap and to the new one afterwards.
    pub async fn replace_job(&self, job: Arc<dyn Job>) -> Result<Option<Arc<dyn Job>>> {
        let previous = self.install(Arc::clone(&job)).await?;
        if let Some(old) = &previous {
            if !Arc::ptr_eq(old, &job) {
                self.run_shutdown_hook(old).await;
            }
        }
        Ok(previous)
    }

    async fn install(&self, job: Arc<dyn Job>) -> Result<Option<Arc<dyn Job>>> {
        JobRegistry::validate_job(job.as_ref())?;
        let name = job.name().to_string();

        if let Some(lifecycle) = job.lifecycle() {
            let context = ExecutionContext::system(&name, INIT_EXECUTION_PREFIX, TriggerType::Init);
            if let Err(error) = guard(lifecycle.init(&context)).await {
                log_error("engine", "init", &format!("{error:#}"), Some(&name));
                return Err(BatchillerError::hook(LifecycleHook::Init, &name, &error));
            }
        }

        let previous = self.registry.insert(Arc::clone(&job));
        self.dispatcher.replace_owned(
            &name,
            Arc::clone(&job).job_listener(),
            Arc::clone(&job).event_listener(),
        );

        log_job_operation(
            "register",
            Some(&name),
            None,
            "success",
            previous.as_ref().map(|_| "replaced existing registration"),
        );
        Ok(previous)
    }

    /// Remove a job, drop the listeners it contributed and run its shutdown hook.
    /// Returns false when no job was registered under the name.
    pub async fn unregister_job(&self, name: &str) -> bool {
        let Some(job) = self.registry.remove(name) else {
            debug!(job_name = name, "Unregister requested for unknown job");
            return false;
        };
        self.finish_unregister(name, &job).await;
        true
    }

    /// Like [`unregister_job`](Self::unregister_job), but only when `job` is still
    /// the registered instance. A name taken over by another registration is
    /// left alone and false is returned.
    pub async fn unregister_job_instance(&self, job: &Arc<dyn Job>) -> bool {
        let Some(removed) = self.registry.remove_instance(job) else {
            debug!(job_name = job.name(), "Job instance no longer registered; nothing to unregister");
            return false;
        };
        self.finish_unregister(removed.name(), &removed).await;
        true
    }

    async fn finish_unregister(&self, name: &str, job: &Arc<dyn Job>) {
        let listeners = self.dispatcher.remove_owned(name);
        self.run_shutdown_hook(job).await;

        log_job_operation(
            "unregister",
            Some(name),
            None,
            "success",
            (listeners > 0).then_some("removed job-owned listeners"),
        );
    }

    async fn run_shutdown_hook(&self, job: &Arc<dyn Job>) {
        let Some(lifecycle) = job.lifecycle() else {
            return;
        };
        let context =
            ExecutionContext::system(job.name(), SHUTDOWN_EXECUTION_PREFIX, TriggerType::Shutdown);
        if let Err(error) = guard(lifecycle.shutdown(&context)).await {
            warn!(
                job_name = job.name(),
                error = %format!("{error:#}"),
                "Shutdown hook failed"
            );
        }
    }

    pub fn register_pipeline(&self, descriptor: PipelineDescriptor) -> Result<()> {
        descriptor.validate()?;
        let name = descriptor.name().to_string();
        let flow = descriptor.flow();
        let previous = self.registry.insert_pipeline(descriptor);
        info!(
            pipeline_name = %name,
            flow = %flow,
            replaced = previous.is_some(),
            "Registered pipeline"
        );
        Ok(())
    }

    /// Register every constituent job, then the pipeline itself
    pub async fn register_pipeline_with_jobs(
        &self,
        descriptor: PipelineDescriptor,
        jobs: Vec<Arc<dyn Job>>,
    ) -> Result<()> {
        descriptor.validate()?;
        for job in jobs {
            self.register_job(job).await?;
        }
        self.register_pipeline(descriptor)
    }

    pub fn unregister_pipeline(&self, name: &str) -> bool {
        let removed = self.registry.remove_pipeline(name).is_some();
        if removed {
            info!(pipeline_name = name, "Unregistered pipeline");
        }
        removed
    }

    // ----------------------------------------------------------------------
    // Queries
    // ----------------------------------------------------------------------

    pub fn job(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.registry.get(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn job_names(&self) -> Vec<String> {
        self.registry.job_names()
    }

    pub fn job_metadata(&self) -> Vec<JobMetadata> {
        self.registry.list_metadata()
    }

    pub fn pipeline(&self, name: &str) -> Option<PipelineDescriptor> {
        self.registry.get_pipeline(name)
    }

    pub fn pipeline_names(&self) -> Vec<String> {
        self.registry.pipeline_names()
    }

    pub async fn history(&self, job_name: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        self.store.get_history(job_name, limit).await
    }

    pub fn in_flight(&self) -> Vec<InFlightSummary> {
        let mut summaries: Vec<InFlightSummary> = self
            .in_flight
            .iter()
            .map(|entry| InFlightSummary {
                execution_id: entry.key().clone(),
                job_name: entry.job_name.clone(),
                submitted_at: entry.submitted_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        summaries
    }

    // ----------------------------------------------------------------------
    // Listeners
    // ----------------------------------------------------------------------

    pub fn add_job_listener(&self, listener: Arc<dyn JobListener>) {
        self.dispatcher.add_job_listener(listener);
    }

    pub fn add_event_listener(&self, listener: Arc<dyn JobEventListener>) {
        self.dispatcher.add_event_listener(listener);
    }

    /// Async feed of every lifecycle event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.dispatcher.subscribe()
    }

    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    // ----------------------------------------------------------------------
    // Execution
    // ----------------------------------------------------------------------

    /// Submit a job by name; see [`ExecutionEngine::submit`]
    pub fn execute_job(
        &self,
        job_name: &str,
        parameters: Parameters,
        triggered_by: &str,
        trigger_type: TriggerType,
    ) -> ExecutionHandle {
        self.submit(
            ExecutionRequest::new(job_name)
                .with_parameters(parameters)
                .triggered_by(triggered_by)
                .trigger_type(trigger_type),
        )
    }

    /// Submit an execution and return immediately.
    ///
    /// Unknown jobs, a full queue and a shutting-down engine resolve at once to
    /// a Failure outcome without spawning anything or touching the record store.
    /// Must be called from within a tokio runtime.
    #[instrument(skip(self, request), fields(job_name = %request.job_name()))]
    pub fn submit(&self, request: ExecutionRequest) -> ExecutionHandle {
        if !self.accepting.load(Ordering::Acquire) {
            EngineCounters::increment(&self.counters.rejected);
            return ExecutionHandle::ready(JobOutcome::failure("engine is shutting down"));
        }

        let Some(job) = self.registry.get(request.job_name()) else {
            EngineCounters::increment(&self.counters.not_found);
            warn!("Execution requested for unknown job");
            return ExecutionHandle::ready(JobOutcome::failure(format!(
                "{JOB_NOT_FOUND}: {}",
                request.job_name()
            )));
        };

        // Reserve the queue slot in one step so concurrent submitters cannot overshoot
        let capacity = self.config.queue_capacity as u64;
        let reserved = self
            .counters
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |waiting| {
                if self.workers.available_permits() == 0 && waiting >= capacity {
                    None
                } else {
                    Some(waiting + 1)
                }
            });
        if let Err(waiting) = reserved {
            EngineCounters::increment(&self.counters.rejected);
            warn!(waiting, capacity = self.config.queue_capacity, "Execution queue is full");
            return ExecutionHandle::ready(JobOutcome::failure(format!(
                "execution queue is full ({} waiting)",
                waiting
            )));
        }

        let context = request.into_context();
        let execution_id = context.execution_id().to_string();
        let control = ExecutionControl::new();
        self.in_flight.insert(
            execution_id.clone(),
            InFlightExecution {
                job_name: context.job_name().to_string(),
                control: control.clone(),
                submitted_at: context.started_at(),
            },
        );
        EngineCounters::increment(&self.counters.submitted);

        debug!(execution_id = %execution_id, "Execution submitted");
        let engine = self.clone();
        let handle = tokio::spawn(async move { engine.run_execution(job, context, control).await });
        ExecutionHandle::spawned(execution_id, handle)
    }

    /// Request cancellation of a queued or running execution
    pub fn cancel_execution(&self, execution_id: &str, reason: &str) -> bool {
        match self.in_flight.get(execution_id) {
            Some(entry) => {
                entry.control.cancel(reason);
                info!(
                    execution_id = execution_id,
                    job_name = %entry.job_name,
                    reason = reason,
                    "Cancellation requested"
                );
                true
            }
            None => false,
        }
    }

    fn cancel_all(&self, reason: &str) -> usize {
        let mut cancelled = 0;
        for entry in self.in_flight.iter() {
            entry.control.cancel(reason);
            cancelled += 1;
        }
        cancelled
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> EngineMetrics {
        let registry = self.registry.stats();
        EngineMetrics {
            registered_jobs: registry.total_jobs,
            registered_pipelines: registry.total_pipelines,
            max_concurrency: self.config.max_concurrent_jobs.max(1),
            available_workers: self.workers.available_permits(),
            in_flight: self.in_flight.len(),
            queued: EngineCounters::read(&self.counters.queued),
            running: EngineCounters::read(&self.counters.running),
            submitted: EngineCounters::read(&self.counters.submitted),
            rejected: EngineCounters::read(&self.counters.rejected),
            not_found: EngineCounters::read(&self.counters.not_found),
            completed: EngineCounters::read(&self.counters.completed),
            failed: EngineCounters::read(&self.counters.failed),
            timed_out: EngineCounters::read(&self.counters.timed_out),
            cancelled: EngineCounters::read(&self.counters.cancelled),
            retries: EngineCounters::read(&self.counters.retries),
            listener_failures: self.dispatcher.stats().listener_failures,
        }
    }

    /// Stop accepting work, drain within `shutdown_timeout_secs`, cancel what is
    /// left, then unregister every job (running shutdown hooks) and close the pool.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            debug!("Execution engine already shut down");
            return;
        }
        info!(in_flight = self.in_flight.len(), "🛑 Execution engine shutting down");

        if !self.wait_for_drain(self.config.shutdown_timeout()).await {
            let remaining = self.cancel_all("engine shutdown");
            warn!(remaining, "Graceful drain timed out, cancelling remaining executions");
            if !self.wait_for_drain(FORCE_CANCEL_GRACE).await {
                warn!(
                    remaining = self.in_flight.len(),
                    "Executions still unwinding after forced cancellation"
                );
            }
        }

        for name in self.registry.job_names() {
            self.unregister_job(&name).await;
        }
        self.registry.clear();
        self.workers.close();
        info!("Execution engine shut down");
    }

    async fn wait_for_drain(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, async {
            while !self.in_flight.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }
}

// Clone implementation for concurrent usage
impl Clone for ExecutionEngine {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            workers: self.workers.clone(),
            in_flight: self.in_flight.clone(),
            counters: self.counters.clone(),
            accepting: self.accepting.clone(),
        }
    }
}
