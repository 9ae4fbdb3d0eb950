#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Batchiller Core
//!
//! Batch-job orchestration core: register jobs, run them on a bounded worker
//! pool with lifecycle hooks, timeouts and retries, compose them into pipelines,
//! and hot-swap their implementations from versioned bundles while the system
//! keeps running.
//!
//! ## Architecture
//!
//! An external trigger (API call, CLI, scheduler tick) asks the
//! [`engine::ExecutionEngine`] to run a job or the
//! [`pipeline::PipelineOrchestrator`] to run a pipeline. The orchestrator breaks
//! a pipeline into ordinary engine submissions. The engine looks the job up in
//! its registry, runs it on the worker pool, publishes lifecycle events through
//! the dispatcher and writes every state change to the record store. The
//! [`loader::HotSwapLoader`] runs on its own timer and swaps registry entries
//! out-of-band from in-flight executions.
//!
//! ## Key Features
//!
//! - **Bounded execution**: semaphore-sized worker pool with a bounded wait queue
//! - **Lifecycle hooks**: init / before_start / after_end / shutdown per job
//! - **Timeouts and retries**: per-job timeout, opt-in exponential-backoff retries
//! - **Events**: coarse and fine-grained listeners plus a broadcast feed
//! - **Pipelines**: sequential, parallel and branch-routed conditional flows
//! - **Hot swap**: atomic supersession of jobs from JSON job manifests
//!
//! ## Module Organization
//!
//! - [`models`] - Jobs, contexts, outcomes, records, events, pipelines
//! - [`engine`] - Execution engine and worker pool
//! - [`pipeline`] - Pipeline orchestration
//! - [`loader`] - Hot-swap bundle loader
//! - [`events`] - Listener traits and the event dispatcher
//! - [`registry`] - Job and pipeline registry
//! - [`store`] - Execution record store
//! - [`trigger`] - Scheduled-task trigger dispatch
//! - [`jobs`] - Built-in job kinds
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust
//! use batchiller_core::prelude::*;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let engine = ExecutionEngine::in_memory(ExecutorConfig::default());
//! engine
//!     .register_pipeline_with_jobs(
//!         PipelineDescriptor::new("EchoTwice", FlowStrategy::Sequential).with_jobs(["Echo", "Echo"]),
//!         vec![Arc::new(EchoJob::new("Echo").with_message("ok")) as Arc<dyn Job>],
//!     )
//!     .await
//!     .unwrap();
//!
//! let orchestrator = PipelineOrchestrator::new(engine.clone());
//! let outcome = orchestrator
//!     .execute_pipeline("EchoTwice", "operator", TriggerType::Manual)
//!     .await
//!     .unwrap();
//! assert!(outcome.success);
//! assert_eq!(outcome.executed().count(), 2);
//! # });
//! ```

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod events;
pub mod jobs;
pub mod loader;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod trigger;

pub use bootstrap::{BatchillerSystem, SystemStatus};
pub use config::{BatchillerConfig, ConfigManager, ExecutorConfig, LoaderConfig, RetryConfig};
pub use constants::{ExecutionStatus, TriggerType};
pub use engine::{EngineMetrics, ExecutionEngine, ExecutionHandle, ExecutionRequest};
pub use error::{BatchillerError, LifecycleHook, Result};
pub use events::{EventDispatcher, JobEventListener, JobListener, LoggingEventListener};
pub use loader::{HotSwapLoader, ScanReport};
pub use models::{
    ExecutionContext, ExecutionRecord, Job, JobLifecycle, JobOutcome, LifecycleEvent,
    OutcomeStatus, Parameters, PipelineDescriptor,
};
pub use pipeline::{PipelineOrchestrator, PipelineOutcome};
pub use store::{ExecutionStore, InMemoryExecutionStore};
pub use trigger::TriggerDispatcher;

/// Common imports for job authors and embedders
pub mod prelude {
    pub use crate::config::{BatchillerConfig, ExecutorConfig};
    pub use crate::constants::{ExecutionStatus, TriggerType};
    pub use crate::engine::{ExecutionEngine, ExecutionHandle, ExecutionRequest};
    pub use crate::error::{BatchillerError, Result};
    pub use crate::events::{JobEventListener, JobListener};
    pub use crate::jobs::{CommandJob, EchoJob};
    pub use crate::models::{
        Branch, ExecutionContext, FlowStrategy, Job, JobLifecycle, JobOutcome, LifecycleEvent,
        Parameters, PipelineDescriptor, PipelineHooks,
    };
    pub use crate::pipeline::{PipelineOrchestrator, PipelineOutcome};
}
