//! Listener that writes every lifecycle event to the structured log.

use crate::events::JobEventListener;
use crate::models::{ExecutionContext, JobOutcome};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventListener;

impl JobEventListener for LoggingEventListener {
    fn on_pending(&self, context: &ExecutionContext) {
        debug!(
            job_name = context.job_name(),
            execution_id = context.execution_id(),
            triggered_by = context.triggered_by(),
            trigger_type = %context.trigger_type(),
            "⏳ Job pending"
        );
    }

    fn on_queued(&self, context: &ExecutionContext) {
        debug!(
            job_name = context.job_name(),
            execution_id = context.execution_id(),
            "📥 Job picked up from queue"
        );
    }

    fn on_start(&self, context: &ExecutionContext) {
        info!(
            job_name = context.job_name(),
            execution_id = context.execution_id(),
            pipeline_name = context.pipeline_name(),
            "🚀 Job started"
        );
    }

    fn on_end(&self, context: &ExecutionContext, outcome: &JobOutcome) {
        info!(
            job_name = context.job_name(),
            execution_id = context.execution_id(),
            status = %outcome.status(),
            elapsed_ms = context.elapsed().num_milliseconds(),
            "🏁 Job ended"
        );
    }

    fn on_pass(&self, context: &ExecutionContext, outcome: &JobOutcome) {
        info!(
            job_name = context.job_name(),
            execution_id = context.execution_id(),
            message = outcome.message(),
            "✅ Job passed"
        );
    }

    fn on_failed(&self, context: &ExecutionContext, outcome: &JobOutcome) {
        error!(
            job_name = context.job_name(),
            execution_id = context.execution_id(),
            message = outcome.message(),
            "❌ Job failed"
        );
    }

    fn on_retry(&self, context: &ExecutionContext, attempt: u32) {
        warn!(
            job_name = context.job_name(),
            execution_id = context.execution_id(),
            attempt = attempt,
            "🔄 Job retrying"
        );
    }

    fn on_timeout(&self, context: &ExecutionContext) {
        warn!(
            job_name = context.job_name(),
            execution_id = context.execution_id(),
            "⏰ Job timed out"
        );
    }

    fn on_cancelled(&self, context: &ExecutionContext, reason: &str) {
        warn!(
            job_name = context.job_name(),
            execution_id = context.execution_id(),
            reason = reason,
            "🛑 Job cancelled"
        );
    }

    fn on_skipped(&self, context: &ExecutionContext, reason: &str) {
        info!(
            job_name = context.job_name(),
            pipeline_name = context.pipeline_name(),
            reason = reason,
            "⏭️ Job skipped"
        );
    }
}
