//! Per-execution task body: queue wait, attempts, retries and finalisation.

use super::metrics::EngineCounters;
use super::{ExecutionControl, ExecutionEngine};
use crate::constants::ExecutionStatus;
use crate::error::panic_message;
use crate::logging::log_job_operation;
use crate::models::{
    CapturedError, ExecutionContext, ExecutionRecord, Job, JobOutcome, LifecycleEvent,
};
use anyhow::anyhow;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Run a hook or job body, turning a panic into an error
pub(crate) async fn guard<T, F>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

enum AttemptResult {
    Completed(JobOutcome),
    Failed(JobOutcome),
    /// `before_start` refused the run; never retried
    Aborted(JobOutcome),
    TimedOut(JobOutcome),
    Cancelled { outcome: JobOutcome, reason: String },
}

impl AttemptResult {
    fn status(&self) -> ExecutionStatus {
        match self {
            Self::Completed(_) => ExecutionStatus::Completed,
            Self::Failed(_) | Self::Aborted(_) => ExecutionStatus::Failed,
            Self::TimedOut(_) => ExecutionStatus::TimedOut,
            Self::Cancelled { .. } => ExecutionStatus::Cancelled,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::TimedOut(_))
    }

    fn outcome(&self) -> &JobOutcome {
        match self {
            Self::Completed(outcome)
            | Self::Failed(outcome)
            | Self::Aborted(outcome)
            | Self::TimedOut(outcome)
            | Self::Cancelled { outcome, .. } => outcome,
        }
    }

    fn into_parts(self) -> (JobOutcome, Option<String>) {
        match self {
            Self::Completed(outcome)
            | Self::Failed(outcome)
            | Self::Aborted(outcome)
            | Self::TimedOut(outcome) => (outcome, None),
            Self::Cancelled { outcome, reason } => (outcome, Some(reason)),
        }
    }
}

/// Removes the execution from the in-flight table however the task ends
struct InFlightGuard<'a> {
    engine: &'a ExecutionEngine,
    execution_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.engine.in_flight.remove(&self.execution_id);
    }
}

impl ExecutionEngine {
    pub(super) async fn run_execution(
        self,
        job: Arc<dyn Job>,
        context: ExecutionContext,
        control: ExecutionControl,
    ) -> JobOutcome {
        let _in_flight = InFlightGuard {
            engine: &self,
            execution_id: context.execution_id().to_string(),
        };

        let mut record = ExecutionRecord::from_context(&context);
        self.advance(&mut record, ExecutionStatus::Queued);
        if let Err(error) = self.store.save_execution(&record).await {
            warn!(execution_id = %record.execution_id, error = %error, "Failed to persist execution record");
        }
        self.dispatcher.publish(LifecycleEvent::Pending {
            context: context.clone(),
        });

        let permit = tokio::select! {
            biased;
            _ = control.token.cancelled() => None,
            permit = Arc::clone(&self.workers).acquire_owned() => permit.ok(),
        };
        EngineCounters::decrement(&self.counters.queued);

        let Some(_permit) = permit else {
            let reason = if control.is_cancelled() {
                control.reason()
            } else {
                "worker pool closed".to_string()
            };
            let outcome = JobOutcome::failure(format!("execution cancelled: {reason}"));
            return self
                .finalize(
                    &context,
                    &mut record,
                    AttemptResult::Cancelled { outcome, reason },
                )
                .await;
        };

        EngineCounters::increment(&self.counters.running);
        record.worker = std::thread::current().name().map(str::to_string);
        self.dispatcher.publish(LifecycleEvent::Queued {
            context: context.clone(),
        });
        self.dispatcher.publish(LifecycleEvent::Started {
            context: context.clone(),
        });
        self.advance(&mut record, ExecutionStatus::Running);
        self.persist(&record).await;

        let max_attempts = if job.is_retryable() {
            job.max_retries().saturating_add(1)
        } else {
            1
        };

        let mut attempt_context = context.clone();
        let mut attempt = 0;
        let result = loop {
            let result = self.run_attempt(job.as_ref(), &attempt_context, &control).await;
            attempt += 1;
            if !result.is_retryable() || attempt >= max_attempts || control.is_cancelled() {
                break result;
            }

            EngineCounters::increment(&self.counters.retries);
            self.advance(&mut record, ExecutionStatus::Retrying);
            self.persist(&record).await;
            attempt_context = context.for_retry(attempt);
            self.dispatcher.publish(LifecycleEvent::Retrying {
                context: attempt_context.clone(),
                attempt,
            });

            let delay = self.config.retry.delay_for(attempt);
            debug!(
                execution_id = %context.execution_id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying execution after backoff"
            );
            let interrupted = tokio::select! {
                biased;
                _ = control.token.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if interrupted {
                let reason = control.reason();
                break AttemptResult::Cancelled {
                    outcome: JobOutcome::failure(format!("execution cancelled: {reason}")),
                    reason,
                };
            }

            record.mark_attempt(&attempt_context);
            self.advance(&mut record, ExecutionStatus::Running);
            self.persist(&record).await;
        };
        EngineCounters::decrement(&self.counters.running);

        self.finalize(&attempt_context, &mut record, result).await
    }

    /// One attempt: `before_start` and the body share the timeout and the
    /// cancellation token; `after_end` always runs, bounded by the same limit.
    async fn run_attempt(
        &self,
        job: &dyn Job,
        context: &ExecutionContext,
        control: &ExecutionControl,
    ) -> AttemptResult {
        let limit = job.timeout().min(self.config.max_job_timeout());
        let attempt = async {
            if let Some(lifecycle) = job.lifecycle() {
                if let Err(error) = guard(lifecycle.before_start(context)).await {
                    return Err(JobOutcome::failure_with_error(
                        format!("before_start hook failed: {error:#}"),
                        CapturedError::from_anyhow(&error),
                    ));
                }
            }
            Ok(guard(job.execute(context)).await)
        };

        let result = tokio::select! {
            biased;
            _ = control.token.cancelled() => {
                let reason = control.reason();
                AttemptResult::Cancelled {
                    outcome: JobOutcome::failure(format!("execution cancelled: {reason}")),
                    reason,
                }
            }
            finished = tokio::time::timeout(limit, attempt) => match finished {
                Err(_) => {
                    warn!(
                        execution_id = %context.execution_id(),
                        job_name = %context.job_name(),
                        timeout_ms = limit.as_millis() as u64,
                        "⏰ Execution timed out"
                    );
                    self.dispatcher.publish(LifecycleEvent::TimedOut {
                        context: context.clone(),
                    });
                    AttemptResult::TimedOut(JobOutcome::failure(format!(
                        "job timed out after {}ms",
                        limit.as_millis()
                    )))
                }
                Ok(Err(aborted)) => AttemptResult::Aborted(aborted),
                Ok(Ok(Err(error))) => AttemptResult::Failed(JobOutcome::failure_from_error(&error)),
                Ok(Ok(Ok(outcome))) if outcome.is_failure() => AttemptResult::Failed(outcome),
                Ok(Ok(Ok(outcome))) => AttemptResult::Completed(outcome),
            },
        };

        self.after_end(job, context, result.outcome(), limit, control).await;
        result
    }

    /// Interruptible by cancellation unless the attempt was itself cancelled,
    /// in which case only the time limit applies
    async fn after_end(
        &self,
        job: &dyn Job,
        context: &ExecutionContext,
        outcome: &JobOutcome,
        limit: Duration,
        control: &ExecutionControl,
    ) {
        let Some(lifecycle) = job.lifecycle() else {
            return;
        };
        let interruptible = !control.is_cancelled();
        let failure = tokio::select! {
            biased;
            _ = control.token.cancelled(), if interruptible => Some("interrupted by cancellation".to_string()),
            finished = tokio::time::timeout(limit, guard(lifecycle.after_end(context, outcome))) => match finished {
                Err(_) => Some(format!("timed out after {}ms", limit.as_millis())),
                Ok(Err(error)) => Some(format!("{error:#}")),
                Ok(Ok(())) => None,
            },
        };
        if let Some(error) = failure {
            warn!(
                execution_id = %context.execution_id(),
                job_name = %context.job_name(),
                error = %error,
                "after_end hook failed"
            );
        }
    }

    async fn finalize(
        &self,
        context: &ExecutionContext,
        record: &mut ExecutionRecord,
        result: AttemptResult,
    ) -> JobOutcome {
        let status = result.status();
        let (outcome, cancel_reason) = result.into_parts();

        if let Err(error) = record.complete(status, &outcome) {
            warn!(execution_id = %record.execution_id, error = %error, "Invalid terminal transition");
        }
        self.persist(record).await;
        self.counters.record_terminal(status);

        if let Some(reason) = cancel_reason {
            self.dispatcher.publish(LifecycleEvent::Cancelled {
                context: context.clone(),
                reason,
            });
        }
        if outcome.is_failure() {
            self.dispatcher.publish(LifecycleEvent::Failed {
                context: context.clone(),
                outcome: outcome.clone(),
            });
        } else {
            self.dispatcher.publish(LifecycleEvent::Passed {
                context: context.clone(),
                outcome: outcome.clone(),
            });
        }
        self.dispatcher.publish(LifecycleEvent::Ended {
            context: context.clone(),
            outcome: outcome.clone(),
        });

        let status_text = status.to_string();
        log_job_operation(
            "execute",
            Some(context.job_name()),
            Some(context.execution_id()),
            &status_text,
            Some(outcome.message()),
        );
        outcome
    }

    fn advance(&self, record: &mut ExecutionRecord, next: ExecutionStatus) {
        if let Err(error) = record.transition(next) {
            warn!(execution_id = %record.execution_id, error = %error, "Invalid status transition");
        }
    }

    async fn persist(&self, record: &ExecutionRecord) {
        if let Err(error) = self.store.update_execution(record).await {
            warn!(execution_id = %record.execution_id, error = %error, "Failed to persist execution record");
        }
    }
}
