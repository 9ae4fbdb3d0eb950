//! # Job Outcome
//!
//! Immutable result of one job execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Failure,
    Partial,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Partial => write!(f, "PARTIAL"),
        }
    }
}

/// Error captured from a job body or hook, detached from its source type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl CapturedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            causes: Vec::new(),
        }
    }

    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            causes: error.chain().skip(1).map(|cause| cause.to_string()).collect(),
        }
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in &self.causes {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    status: OutcomeStatus,
    message: String,
    #[serde(default)]
    data: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<CapturedError>,
    completed_at: DateTime<Utc>,
}

impl JobOutcome {
    fn build(
        status: OutcomeStatus,
        message: String,
        data: HashMap<String, Value>,
        error: Option<CapturedError>,
    ) -> Self {
        Self {
            status,
            message,
            data,
            error,
            completed_at: Utc::now(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::build(OutcomeStatus::Success, message.into(), HashMap::new(), None)
    }

    pub fn success_with_data(message: impl Into<String>, data: HashMap<String, Value>) -> Self {
        Self::build(OutcomeStatus::Success, message.into(), data, None)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::build(OutcomeStatus::Failure, message.into(), HashMap::new(), None)
    }

    /// Failure whose message is taken from the error itself
    pub fn failure_from_error(error: &anyhow::Error) -> Self {
        let captured = CapturedError::from_anyhow(error);
        Self::build(
            OutcomeStatus::Failure,
            captured.message.clone(),
            HashMap::new(),
            Some(captured),
        )
    }

    pub fn failure_with_error(message: impl Into<String>, error: CapturedError) -> Self {
        Self::build(OutcomeStatus::Failure, message.into(), HashMap::new(), Some(error))
    }

    pub fn partial(message: impl Into<String>, data: HashMap<String, Value>) -> Self {
        Self::build(OutcomeStatus::Partial, message.into(), data, None)
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    pub fn error(&self) -> Option<&CapturedError> {
        self.error.as_ref()
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn is_failure(&self) -> bool {
        self.status == OutcomeStatus::Failure
    }

    pub fn is_partial(&self) -> bool {
        self.status == OutcomeStatus::Partial
    }
}
