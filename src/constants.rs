//! # System Constants
//!
//! Core constants and enums that define the operational vocabulary of the
//! batch engine: execution states, trigger types, default job settings and the
//! synthetic principal used for system-initiated work.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Principal recorded for work the engine initiates on its own behalf
pub const SYSTEM_PRINCIPAL: &str = "SYSTEM";

/// Default per-job timeout (five minutes)
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Default retry budget for jobs that opt into retries
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Execution id prefix for the synthetic context handed to `init` hooks
pub const INIT_EXECUTION_PREFIX: &str = "init";

/// Execution id prefix for the synthetic context handed to `shutdown` hooks
pub const SHUTDOWN_EXECUTION_PREFIX: &str = "shutdown";

/// Message prefix for executions requested against an unknown job name
pub const JOB_NOT_FOUND: &str = "job not found";

/// Lifecycle states of a single job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Accepted by the engine, not yet handed to the worker pool
    Pending,
    /// Waiting for a free worker
    Queued,
    /// Running on a worker
    Running,
    /// Finished with a non-failure outcome
    Completed,
    /// Finished with a failure outcome
    Failed,
    /// Stopped before completion on request
    Cancelled,
    /// Exceeded the declared timeout
    TimedOut,
    /// Waiting for the next retry attempt
    Retrying,
}

impl ExecutionStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    /// Check if the execution currently occupies or awaits a worker
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running | Self::Retrying)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Whether the lifecycle state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match self {
            Pending => matches!(next, Queued | Cancelled | Failed),
            Queued => matches!(next, Running | Cancelled | Failed),
            Running => matches!(next, Completed | Failed | TimedOut | Cancelled | Retrying),
            Retrying => matches!(next, Running | Cancelled | Failed),
            Completed | Failed | Cancelled | TimedOut => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::TimedOut => "TIMED_OUT",
            Self::Retrying => "RETRYING",
        };
        f.write_str(value)
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "TIMED_OUT" | "TIMEOUT" => Ok(Self::TimedOut),
            "RETRYING" => Ok(Self::Retrying),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

/// What initiated an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    #[default]
    Manual,
    Scheduled,
    Api,
    Init,
    Shutdown,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Manual => "MANUAL",
            Self::Scheduled => "SCHEDULED",
            Self::Api => "API",
            Self::Init => "INIT",
            Self::Shutdown => "SHUTDOWN",
        };
        f.write_str(value)
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MANUAL" => Ok(Self::Manual),
            "SCHEDULED" => Ok(Self::Scheduled),
            "API" => Ok(Self::Api),
            "INIT" => Ok(Self::Init),
            "SHUTDOWN" => Ok(Self::Shutdown),
            _ => Err(format!("Invalid trigger type: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(ExecutionStatus::TimedOut.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_active_states() {
        assert!(ExecutionStatus::Queued.is_active());
        assert!(ExecutionStatus::Running.is_active());
        assert!(ExecutionStatus::Retrying.is_active());
        assert!(!ExecutionStatus::Pending.is_active());
        assert!(!ExecutionStatus::Completed.is_active());
    }

    #[test]
    fn test_terminal_states_never_transition() {
        let all = [
            ExecutionStatus::Pending,
            ExecutionStatus::Queued,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
            ExecutionStatus::TimedOut,
            ExecutionStatus::Retrying,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
        assert!(ExecutionStatus::Running.can_transition_to(ExecutionStatus::Retrying));
        assert!(ExecutionStatus::Retrying.can_transition_to(ExecutionStatus::Running));
        assert!(!ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Running));
    }

    #[test]
    fn test_status_string_round_trip() {
        assert_eq!(ExecutionStatus::TimedOut.to_string(), "TIMED_OUT");
        assert_eq!("timeout".parse::<ExecutionStatus>(), Ok(ExecutionStatus::TimedOut));
        assert!("bogus".parse::<ExecutionStatus>().is_err());
        assert_eq!("scheduled".parse::<TriggerType>(), Ok(TriggerType::Scheduled));
        assert_eq!(TriggerType::default(), TriggerType::Manual);
    }
}
