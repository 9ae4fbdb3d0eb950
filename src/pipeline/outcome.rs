//! Aggregate result of one pipeline run.

use crate::models::{FlowStrategy, JobOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One position of the pipeline's job list, run or skipped
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStep {
    pub job_name: String,
    /// `None` for skipped steps and for submissions rejected before an execution existed
    pub execution_id: Option<String>,
    pub outcome: Option<JobOutcome>,
    pub skipped: bool,
}

impl PipelineStep {
    pub(crate) fn executed(
        job_name: impl Into<String>,
        execution_id: Option<String>,
        outcome: JobOutcome,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            execution_id,
            outcome: Some(outcome),
            skipped: false,
        }
    }

    pub(crate) fn skipped(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            execution_id: None,
            outcome: None,
            skipped: true,
        }
    }

    /// Partial outcomes do not count as success inside a pipeline
    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().is_some_and(JobOutcome::is_success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    pub pipeline_name: String,
    pub run_id: String,
    pub flow: FlowStrategy,
    pub success: bool,
    /// Steps in declared order
    pub steps: Vec<PipelineStep>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl PipelineOutcome {
    pub fn executed(&self) -> impl Iterator<Item = &PipelineStep> {
        self.steps.iter().filter(|step| !step.skipped)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &PipelineStep> {
        self.steps.iter().filter(|step| step.skipped)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PipelineStep> {
        self.executed().filter(|step| !step.succeeded())
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}
