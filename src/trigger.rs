//! # Trigger Dispatcher
//!
//! Integration point for an external cron scheduler. The scheduler owns the
//! schedule semantics and decides when a [`ScheduledTask`] is due; it calls
//! [`TriggerDispatcher::fire`], which submits the target on behalf of the
//! system principal with trigger type `SCHEDULED` and stamps the task's last
//! execution time in the record store.

use crate::constants::{TriggerType, SYSTEM_PRINCIPAL};
use crate::engine::{ExecutionEngine, ExecutionHandle, ExecutionRequest};
use crate::error::{BatchillerError, Result};
use crate::models::{ScheduleTarget, ScheduledTask};
use crate::pipeline::{PipelineHandle, PipelineOrchestrator};
use crate::store::ExecutionStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What firing a task started
#[derive(Debug)]
pub enum TriggerReceipt {
    /// The task is disabled; nothing was submitted
    Skipped,
    Job(ExecutionHandle),
    Pipeline(PipelineHandle),
}

impl TriggerReceipt {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

#[derive(Clone)]
pub struct TriggerDispatcher {
    engine: ExecutionEngine,
    orchestrator: PipelineOrchestrator,
    store: Arc<dyn ExecutionStore>,
}

impl TriggerDispatcher {
    pub fn new(
        engine: ExecutionEngine,
        orchestrator: PipelineOrchestrator,
        store: Arc<dyn ExecutionStore>,
    ) -> Self {
        Self {
            engine,
            orchestrator,
            store,
        }
    }

    /// Validate and persist a task definition
    pub async fn register_task(&self, task: &ScheduledTask) -> Result<()> {
        task.validate()?;
        self.store.save_scheduled_task(task).await?;
        info!(
            task_id = %task.id,
            task_name = %task.name,
            target = %task.target_name,
            "Scheduled task registered"
        );
        Ok(())
    }

    pub async fn tasks(&self) -> Result<Vec<ScheduledTask>> {
        self.store.list_scheduled_tasks().await
    }

    /// Fire a due task. A failure to stamp the task is logged, not returned.
    pub async fn fire(&self, task: &ScheduledTask) -> Result<TriggerReceipt> {
        if !task.enabled {
            debug!(task_id = %task.id, task_name = %task.name, "Scheduled task disabled, skipping");
            return Ok(TriggerReceipt::Skipped);
        }

        let receipt = match task.target_type {
            ScheduleTarget::Job => {
                if !self.engine.is_registered(&task.target_name) {
                    warn!(task_id = %task.id, job_name = %task.target_name, "Scheduled job not registered");
                }
                TriggerReceipt::Job(
                    self.engine.submit(
                        ExecutionRequest::new(&task.target_name)
                            .with_parameters(task.parameters.clone())
                            .triggered_by(SYSTEM_PRINCIPAL)
                            .trigger_type(TriggerType::Scheduled),
                    ),
                )
            }
            ScheduleTarget::Pipeline => {
                if self.engine.pipeline(&task.target_name).is_none() {
                    return Err(BatchillerError::pipeline(
                        &task.target_name,
                        format!("scheduled task '{}' targets an unknown pipeline", task.name),
                    ));
                }
                TriggerReceipt::Pipeline(
                    self.orchestrator
                        .execute_scheduled(&task.target_name, task.parameters.clone()),
                )
            }
        };

        let mut fired = task.clone();
        fired.mark_fired(Utc::now());
        if let Err(error) = self.store.update_scheduled_task(&fired).await {
            warn!(task_id = %task.id, error = %error, "Failed to stamp scheduled task");
        }
        info!(task_id = %task.id, task_name = %task.name, target = %task.target_name, "⏰ Scheduled task fired");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::jobs::EchoJob;
    use crate::models::{FlowStrategy, Job, PipelineDescriptor};

    fn dispatcher() -> (TriggerDispatcher, ExecutionEngine) {
        let engine = ExecutionEngine::in_memory(ExecutorConfig::default());
        let orchestrator = PipelineOrchestrator::new(engine.clone());
        let dispatcher = TriggerDispatcher::new(engine.clone(), orchestrator, engine.store());
        (dispatcher, engine)
    }

    #[tokio::test]
    async fn test_fire_job_uses_scheduled_system_trigger() {
        let (dispatcher, engine) = dispatcher();
        engine.register_job(Arc::new(EchoJob::new("report"))).await.unwrap();
        let task = ScheduledTask::new("nightly", ScheduleTarget::Job, "report", "0 0 2 * * *");
        dispatcher.register_task(&task).await.unwrap();

        let receipt = dispatcher.fire(&task).await.unwrap();
        let TriggerReceipt::Job(handle) = receipt else {
            panic!("expected a job receipt");
        };
        let execution_id = handle.execution_id().unwrap().to_string();
        assert!(handle.await.is_success());

        let record = engine.store().get_execution(&execution_id).await.unwrap().unwrap();
        assert_eq!(record.trigger_type, TriggerType::Scheduled);
        assert_eq!(record.triggered_by, SYSTEM_PRINCIPAL);

        let stored = dispatcher.tasks().await.unwrap();
        assert!(stored[0].last_execution_time.is_some());
    }

    #[tokio::test]
    async fn test_fire_pipeline() {
        let (dispatcher, engine) = dispatcher();
        engine
            .register_pipeline_with_jobs(
                PipelineDescriptor::new("etl", FlowStrategy::Parallel).with_jobs(["a", "b"]),
                vec![Arc::new(EchoJob::new("a")) as Arc<dyn Job>, Arc::new(EchoJob::new("b"))],
            )
            .await
            .unwrap();
        let task = ScheduledTask::new("hourly", ScheduleTarget::Pipeline, "etl", "0 * * * *");

        let TriggerReceipt::Pipeline(handle) = dispatcher.fire(&task).await.unwrap() else {
            panic!("expected a pipeline receipt");
        };
        assert!(handle.await.unwrap().success);
    }

    #[tokio::test]
    async fn test_disabled_and_unknown_targets() {
        let (dispatcher, _engine) = dispatcher();
        let mut task = ScheduledTask::new("off", ScheduleTarget::Job, "report", "0 * * * *");
        task.enabled = false;
        assert!(dispatcher.fire(&task).await.unwrap().is_skipped());

        let task = ScheduledTask::new("ghost", ScheduleTarget::Pipeline, "missing", "0 * * * *");
        assert!(dispatcher.fire(&task).await.is_err());
    }
}
