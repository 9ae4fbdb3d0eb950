//! Lifecycle events published for every execution.

use crate::models::{ExecutionContext, JobOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Pending,
    Queued,
    Started,
    Ended,
    Passed,
    Failed,
    Retrying,
    TimedOut,
    Cancelled,
    Skipped,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Ended => "ended",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Pending { context: ExecutionContext },
    Queued { context: ExecutionContext },
    Started { context: ExecutionContext },
    Ended { context: ExecutionContext, outcome: JobOutcome },
    Passed { context: ExecutionContext, outcome: JobOutcome },
    Failed { context: ExecutionContext, outcome: JobOutcome },
    Retrying { context: ExecutionContext, attempt: u32 },
    TimedOut { context: ExecutionContext },
    Cancelled { context: ExecutionContext, reason: String },
    Skipped { context: ExecutionContext, reason: String },
}

impl LifecycleEvent {
    pub fn context(&self) -> &ExecutionContext {
        match self {
            Self::Pending { context }
            | Self::Queued { context }
            | Self::Started { context }
            | Self::Ended { context, .. }
            | Self::Passed { context, .. }
            | Self::Failed { context, .. }
            | Self::Retrying { context, .. }
            | Self::TimedOut { context }
            | Self::Cancelled { context, .. }
            | Self::Skipped { context, .. } => context,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Pending { .. } => EventKind::Pending,
            Self::Queued { .. } => EventKind::Queued,
            Self::Started { .. } => EventKind::Started,
            Self::Ended { .. } => EventKind::Ended,
            Self::Passed { .. } => EventKind::Passed,
            Self::Failed { .. } => EventKind::Failed,
            Self::Retrying { .. } => EventKind::Retrying,
            Self::TimedOut { .. } => EventKind::TimedOut,
            Self::Cancelled { .. } => EventKind::Cancelled,
            Self::Skipped { .. } => EventKind::Skipped,
        }
    }

    pub fn outcome(&self) -> Option<&JobOutcome> {
        match self {
            Self::Ended { outcome, .. } | Self::Passed { outcome, .. } | Self::Failed { outcome, .. } => {
                Some(outcome)
            }
            _ => None,
        }
    }

    pub fn job_name(&self) -> &str {
        self.context().job_name()
    }

    pub fn execution_id(&self) -> &str {
        self.context().execution_id()
    }
}
