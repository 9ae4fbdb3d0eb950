//! # Execution Record
//!
//! Persisted-facing projection of one execution. The engine owns the record for
//! the lifetime of the execution and pushes every state change to the record
//! store; `transition` refuses anything the lifecycle state machine forbids.

use crate::constants::{ExecutionStatus, TriggerType};
use crate::error::{BatchillerError, Result};
use crate::models::{ExecutionContext, JobOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub job_name: String,
    pub pipeline_name: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Worker thread that picked up the execution
    pub worker: Option<String>,
    pub triggered_by: String,
    pub trigger_type: TriggerType,
    pub is_retry: bool,
    pub retry_attempt: u32,
    pub result_message: Option<String>,
    pub error_message: Option<String>,
}

impl ExecutionRecord {
    pub fn from_context(context: &ExecutionContext) -> Self {
        Self {
            execution_id: context.execution_id().to_string(),
            job_name: context.job_name().to_string(),
            pipeline_name: context.pipeline_name().map(str::to_string),
            status: ExecutionStatus::Pending,
            started_at: context.started_at(),
            ended_at: None,
            duration_ms: None,
            worker: None,
            triggered_by: context.triggered_by().to_string(),
            trigger_type: context.trigger_type(),
            is_retry: context.is_retry(),
            retry_attempt: context.retry_attempt(),
            result_message: None,
            error_message: None,
        }
    }

    /// Move to `next`, rejecting transitions out of terminal states or backwards
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BatchillerError::InvalidState(format!(
                "execution {} cannot move from {} to {}",
                self.execution_id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Record the attempt number of the context that is about to run
    pub fn mark_attempt(&mut self, context: &ExecutionContext) {
        self.is_retry = context.is_retry();
        self.retry_attempt = context.retry_attempt();
    }

    /// Move to a terminal status and stamp end time, duration and messages
    pub fn complete(&mut self, status: ExecutionStatus, outcome: &JobOutcome) -> Result<()> {
        self.transition(status)?;
        let ended_at = Utc::now();
        self.ended_at = Some(ended_at);
        self.duration_ms = Some((ended_at - self.started_at).num_milliseconds());
        if outcome.is_failure() {
            self.error_message = Some(
                outcome
                    .error()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| outcome.message().to_string()),
            );
        } else {
            self.result_message = Some(outcome.message().to_string());
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Parameters;

    fn record() -> ExecutionRecord {
        let context = ExecutionContext::new("job", Parameters::new(), "alice", TriggerType::Manual);
        ExecutionRecord::from_context(&context)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut record = record();
        assert_eq!(record.status, ExecutionStatus::Pending);
        record.transition(ExecutionStatus::Queued).unwrap();
        record.transition(ExecutionStatus::Running).unwrap();
        record
            .complete(ExecutionStatus::Completed, &JobOutcome::success("done"))
            .unwrap();

        assert!(record.is_terminal());
        assert_eq!(record.result_message.as_deref(), Some("done"));
        assert!(record.error_message.is_none());
        assert!(record.duration_ms.unwrap() >= 0);
    }

    #[test]
    fn test_terminal_record_cannot_move() {
        let mut record = record();
        record.transition(ExecutionStatus::Queued).unwrap();
        record.transition(ExecutionStatus::Running).unwrap();
        record
            .complete(ExecutionStatus::Failed, &JobOutcome::failure("broken"))
            .unwrap();

        assert_eq!(record.error_message.as_deref(), Some("broken"));
        assert!(record.transition(ExecutionStatus::Running).is_err());
        assert_eq!(record.status, ExecutionStatus::Failed);
    }
}
