//! Listener contracts. Both shapes are synchronous and run on the worker that
//! produced the event; every method defaults to a no-op so implementors only
//! override what they observe. A panicking listener is logged and skipped.

use crate::models::{ExecutionContext, JobOutcome};

/// Coarse-grained listener: scheduling, start, completion, failure, retry, cancellation
pub trait JobListener: Send + Sync {
    fn on_job_scheduled(&self, _context: &ExecutionContext) {}

    fn on_job_start(&self, _context: &ExecutionContext) {}

    fn on_job_complete(&self, _context: &ExecutionContext, _outcome: &JobOutcome) {}

    fn on_job_failure(&self, _context: &ExecutionContext, _outcome: &JobOutcome) {}

    fn on_job_retry(&self, _context: &ExecutionContext, _attempt: u32) {}

    fn on_job_cancelled(&self, _context: &ExecutionContext, _reason: &str) {}
}

/// Fine-grained listener: one method per lifecycle event
pub trait JobEventListener: Send + Sync {
    fn on_pending(&self, _context: &ExecutionContext) {}

    fn on_queued(&self, _context: &ExecutionContext) {}

    fn on_start(&self, _context: &ExecutionContext) {}

    fn on_end(&self, _context: &ExecutionContext, _outcome: &JobOutcome) {}

    fn on_pass(&self, _context: &ExecutionContext, _outcome: &JobOutcome) {}

    fn on_failed(&self, _context: &ExecutionContext, _outcome: &JobOutcome) {}

    fn on_retry(&self, _context: &ExecutionContext, _attempt: u32) {}

    fn on_timeout(&self, _context: &ExecutionContext) {}

    fn on_cancelled(&self, _context: &ExecutionContext, _reason: &str) {}

    fn on_skipped(&self, _context: &ExecutionContext, _reason: &str) {}
}
