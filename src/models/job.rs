//! # Job Contract
//!
//! ## Architecture
//!
//! A job is a named unit of work with declared execution policy (timeout,
//! retryability, retry budget). Optional capabilities are discovered at
//! registration time through accessor methods that default to `None`:
//!
//! - [`Job::lifecycle`] exposes [`JobLifecycle`] hooks (`init`, `before_start`,
//!   `after_end`, `shutdown`)
//! - [`Job::event_listener`] and [`Job::job_listener`] let a job observe the
//!   engine's lifecycle events; the engine registers those listeners on behalf
//!   of the job and removes them again when the job is unregistered or superseded
//!
//! ## Usage
//!
//! ```rust
//! use async_trait::async_trait;
//! use batchiller_core::models::{ExecutionContext, Job, JobOutcome};
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Job for Greeter {
//!     fn name(&self) -> &str {
//!         "greeter"
//!     }
//!
//!     async fn execute(&self, context: &ExecutionContext) -> anyhow::Result<JobOutcome> {
//!         let who = context.parameter_as::<String>("who").unwrap_or_else(|| "world".into());
//!         Ok(JobOutcome::success(format!("hello, {who}")))
//!     }
//! }
//! ```

use crate::constants::{DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_RETRIES};
use crate::events::{JobEventListener, JobListener};
use crate::models::{ExecutionContext, JobOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait Job: Send + Sync {
    /// Unique name; the registry key
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn timeout(&self) -> Duration {
        DEFAULT_JOB_TIMEOUT
    }

    fn is_retryable(&self) -> bool {
        false
    }

    /// Attempts after the first one; only consulted when retryable
    fn max_retries(&self) -> u32 {
        DEFAULT_MAX_RETRIES
    }

    async fn execute(&self, context: &ExecutionContext) -> anyhow::Result<JobOutcome>;

    fn lifecycle(&self) -> Option<&dyn JobLifecycle> {
        None
    }

    fn event_listener(self: Arc<Self>) -> Option<Arc<dyn JobEventListener>> {
        None
    }

    fn job_listener(self: Arc<Self>) -> Option<Arc<dyn JobListener>> {
        None
    }
}

/// Optional lifecycle hooks. `init` runs once at registration with a synthetic
/// context; `shutdown` runs once at unregistration or supersession.
#[async_trait]
pub trait JobLifecycle: Send + Sync {
    async fn init(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// A failure aborts the attempt without running the job body
    async fn before_start(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after every attempt; failures are logged and never alter the outcome
    async fn after_end(&self, _context: &ExecutionContext, _outcome: &JobOutcome) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Registration-time snapshot of a job's declared policy
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct JobMetadata {
    pub name: String,
    pub description: String,
    pub timeout_ms: u64,
    pub retryable: bool,
    pub max_retries: u32,
    pub has_lifecycle: bool,
    pub registered_at: chrono::DateTime<chrono::Utc>,
}

impl JobMetadata {
    pub fn of(job: &dyn Job) -> Self {
        Self {
            name: job.name().to_string(),
            description: job.description().to_string(),
            timeout_ms: u64::try_from(job.timeout().as_millis()).unwrap_or(u64::MAX),
            retryable: job.is_retryable(),
            max_retries: job.max_retries(),
            has_lifecycle: job.lifecycle().is_some(),
            registered_at: chrono::Utc::now(),
        }
    }
}
