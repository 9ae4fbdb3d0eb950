//! # Pipeline Orchestrator
//!
//! ## Architecture
//!
//! The orchestrator turns a [`PipelineDescriptor`] into a series of ordinary
//! engine submissions and aggregates their outcomes. It adds nothing around an
//! individual job: every constituent goes through the full execution contract
//! (events, persistence, hooks, retries). A run is a spawned task, so
//! [`PipelineOrchestrator::execute_pipeline`] returns immediately.
//!
//! ## Flow Strategies
//!
//! - **Sequential**: declared order, stop at the first non-success; every job
//!   not run is published as `Skipped`
//! - **Parallel**: submit all, wait for all, success iff all succeeded
//! - **Conditional**: after each job, follow its branch table entry
//!   (`on_success` / `on_failure`). Without an entry, success continues with the
//!   next declared job and failure stops. Each position runs at most once; the
//!   run succeeds iff the last job executed succeeded.

use crate::constants::{TriggerType, SYSTEM_PRINCIPAL};
use crate::engine::{guard, ExecutionEngine, ExecutionRequest};
use crate::error::{BatchillerError, Result};
use crate::logging::log_pipeline_operation;
use crate::models::{
    ExecutionContext, FlowStrategy, LifecycleEvent, Parameters, PipelineDescriptor,
};
use crate::pipeline::{PipelineOutcome, PipelineStep};
use chrono::Utc;
use futures::future::join_all;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Shared inputs of every constituent submission in one run
struct RunContext {
    descriptor: PipelineDescriptor,
    parameters: Parameters,
    triggered_by: String,
    trigger_type: TriggerType,
}

impl RunContext {
    fn request(&self, job_name: &str) -> ExecutionRequest {
        ExecutionRequest::new(job_name)
            .with_parameters(self.parameters.clone())
            .triggered_by(self.triggered_by.clone())
            .trigger_type(self.trigger_type)
            .in_pipeline(self.descriptor.name())
    }

    fn skip_context(&self, job_name: &str) -> ExecutionContext {
        ExecutionContext::new(
            job_name,
            self.parameters.clone(),
            self.triggered_by.clone(),
            self.trigger_type,
        )
        .with_pipeline(self.descriptor.name())
    }
}

enum HandleState {
    Ready(Option<Result<PipelineOutcome>>),
    Spawned(JoinHandle<Result<PipelineOutcome>>),
}

/// Resolves to the outcome of a pipeline run
pub struct PipelineHandle {
    pipeline_name: String,
    state: HandleState,
}

impl PipelineHandle {
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }
}

impl Future for PipelineHandle {
    type Output = Result<PipelineOutcome>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            HandleState::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(BatchillerError::InvalidState(
                    "pipeline handle polled after completion".to_string(),
                ))
            })),
            HandleState::Spawned(handle) => match Pin::new(handle).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(error)) => Poll::Ready(Err(BatchillerError::pipeline(
                    this.pipeline_name.clone(),
                    format!("pipeline task aborted: {error}"),
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("pipeline_name", &self.pipeline_name)
            .field("finished", &matches!(self.state, HandleState::Ready(None)))
            .finish()
    }
}

/// Composes engine executions per a pipeline's flow strategy
#[derive(Clone)]
pub struct PipelineOrchestrator {
    engine: ExecutionEngine,
}

impl PipelineOrchestrator {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn execute_pipeline(
        &self,
        pipeline_name: &str,
        triggered_by: &str,
        trigger_type: TriggerType,
    ) -> PipelineHandle {
        self.execute_pipeline_with_parameters(
            pipeline_name,
            Parameters::new(),
            triggered_by,
            trigger_type,
        )
    }

    /// Start a run that forwards `parameters` to every constituent job.
    /// An unknown pipeline resolves at once to `PipelineError`.
    #[instrument(skip(self, parameters))]
    pub fn execute_pipeline_with_parameters(
        &self,
        pipeline_name: &str,
        parameters: Parameters,
        triggered_by: &str,
        trigger_type: TriggerType,
    ) -> PipelineHandle {
        let Some(descriptor) = self.engine.pipeline(pipeline_name) else {
            warn!("Pipeline requested but not registered");
            return PipelineHandle {
                pipeline_name: pipeline_name.to_string(),
                state: HandleState::Ready(Some(Err(BatchillerError::pipeline(
                    pipeline_name,
                    "pipeline not found",
                )))),
            };
        };

        let run = RunContext {
            descriptor,
            parameters,
            triggered_by: triggered_by.to_string(),
            trigger_type,
        };
        let orchestrator = self.clone();
        let handle = tokio::spawn(async move { orchestrator.run_pipeline(run).await });
        PipelineHandle {
            pipeline_name: pipeline_name.to_string(),
            state: HandleState::Spawned(handle),
        }
    }

    /// Run a scheduled pipeline on behalf of the system principal
    pub fn execute_scheduled(&self, pipeline_name: &str, parameters: Parameters) -> PipelineHandle {
        self.execute_pipeline_with_parameters(
            pipeline_name,
            parameters,
            SYSTEM_PRINCIPAL,
            TriggerType::Scheduled,
        )
    }

    async fn run_pipeline(self, run: RunContext) -> Result<PipelineOutcome> {
        let name = run.descriptor.name().to_string();
        let flow = run.descriptor.flow();
        let hook_context = ExecutionContext::new(
            name.clone(),
            run.parameters.clone(),
            run.triggered_by.clone(),
            run.trigger_type,
        )
        .with_pipeline(name.clone());
        let run_id = hook_context.execution_id().to_string();
        let started_at = Utc::now();

        log_pipeline_operation("start", &name, Some(&run_id), "started", Some(&flow.to_string()));

        if let Some(hooks) = run.descriptor.hooks() {
            if let Err(error) = guard(hooks.on_start(&hook_context)).await {
                log_pipeline_operation(
                    "start",
                    &name,
                    Some(&run_id),
                    "failed",
                    Some(&format!("{error:#}")),
                );
                return Err(BatchillerError::pipeline(
                    name,
                    format!("on_start hook failed: {error:#}"),
                ));
            }
        }

        let (success, steps) = match flow {
            FlowStrategy::Sequential => self.run_sequential(&run).await,
            FlowStrategy::Parallel => self.run_parallel(&run).await,
            FlowStrategy::Conditional => self.run_conditional(&run).await,
        };

        if let Some(hooks) = run.descriptor.hooks() {
            if let Err(error) = guard(hooks.on_complete(&hook_context, success)).await {
                warn!(
                    pipeline_name = %name,
                    run_id = %run_id,
                    error = %format!("{error:#}"),
                    "on_complete hook failed"
                );
            }
        }

        let outcome = PipelineOutcome {
            pipeline_name: name,
            run_id,
            flow,
            success,
            steps,
            started_at,
            completed_at: Utc::now(),
        };
        let details = format!(
            "{} executed, {} skipped, {} failed",
            outcome.executed().count(),
            outcome.skipped().count(),
            outcome.failed().count()
        );
        log_pipeline_operation(
            "complete",
            &outcome.pipeline_name,
            Some(&outcome.run_id),
            if success { "success" } else { "failure" },
            Some(&details),
        );
        Ok(outcome)
    }

    async fn run_job(&self, run: &RunContext, job_name: &str) -> PipelineStep {
        let handle = self.engine.submit(run.request(job_name));
        let execution_id = handle.execution_id().map(str::to_string);
        let outcome = handle.await;
        PipelineStep::executed(job_name, execution_id, outcome)
    }

    fn skip(&self, run: &RunContext, job_name: &str, reason: &str) -> PipelineStep {
        debug!(pipeline_name = %run.descriptor.name(), job_name, reason, "Skipping pipeline job");
        self.engine.dispatcher().publish(LifecycleEvent::Skipped {
            context: run.skip_context(job_name),
            reason: reason.to_string(),
        });
        PipelineStep::skipped(job_name)
    }

    async fn run_sequential(&self, run: &RunContext) -> (bool, Vec<PipelineStep>) {
        let jobs = run.descriptor.jobs();
        let mut steps = Vec::with_capacity(jobs.len());
        let mut failed_at: Option<&str> = None;

        for job_name in jobs {
            if let Some(failed) = failed_at {
                steps.push(self.skip(run, job_name, &format!("previous job '{failed}' did not succeed")));
                continue;
            }
            let step = self.run_job(run, job_name).await;
            if !step.succeeded() {
                failed_at = Some(job_name);
            }
            steps.push(step);
        }

        (failed_at.is_none(), steps)
    }

    async fn run_parallel(&self, run: &RunContext) -> (bool, Vec<PipelineStep>) {
        let steps = join_all(
            run.descriptor
                .jobs()
                .iter()
                .map(|job_name| self.run_job(run, job_name)),
        )
        .await;
        let success = steps.iter().all(PipelineStep::succeeded);
        (success, steps)
    }

    async fn run_conditional(&self, run: &RunContext) -> (bool, Vec<PipelineStep>) {
        let jobs = run.descriptor.jobs();
        let branches = run.descriptor.branches();
        let mut results: Vec<Option<PipelineStep>> = vec![None; jobs.len()];
        let mut current = Some(0);
        let mut last_succeeded = false;

        while let Some(position) = current {
            let job_name = &jobs[position];
            let step = self.run_job(run, job_name).await;
            last_succeeded = step.succeeded();
            results[position] = Some(step);

            current = match branches.get(job_name).and_then(|b| b.target(last_succeeded)) {
                Some(target) => {
                    let next = jobs
                        .iter()
                        .enumerate()
                        .position(|(index, name)| name == target && results[index].is_none());
                    if next.is_none() {
                        debug!(
                            pipeline_name = %run.descriptor.name(),
                            from = %job_name,
                            target,
                            "Branch target already ran, stopping"
                        );
                    }
                    next
                }
                None if last_succeeded => {
                    (position + 1..jobs.len()).find(|index| results[*index].is_none())
                }
                None => None,
            };
        }

        let steps = results
            .into_iter()
            .zip(jobs)
            .map(|(step, job_name)| match step {
                Some(step) => step,
                None => self.skip(run, job_name, "not selected by branch routing"),
            })
            .collect();
        (last_succeeded, steps)
    }
}
