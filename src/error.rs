//! Error types for the batch engine.
//!
//! One umbrella enum covers the failure taxonomy: configuration problems rejected
//! before registration, execution failures, pipeline lookup and hook failures,
//! loader failures scoped to a single bundle entry, and lifecycle hook failures.

use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Which job lifecycle hook raised an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleHook {
    Init,
    BeforeStart,
    AfterEnd,
    Shutdown,
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::BeforeStart => write!(f, "before_start"),
            Self::AfterEnd => write!(f, "after_end"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchillerError {
    /// Invalid job, pipeline or system configuration
    #[error("Configuration error for {subject}: {reason}")]
    ConfigurationError { subject: String, reason: String },

    #[error("Execution error for job {job_name} ({execution_id}): {reason}")]
    ExecutionError {
        job_name: String,
        execution_id: String,
        reason: String,
    },

    #[error("Pipeline error for {pipeline_name}: {reason}")]
    PipelineError {
        pipeline_name: String,
        reason: String,
    },

    /// Failure to list, open or construct an entry of a job bundle
    #[error("Loader error for bundle {bundle}: {reason}")]
    LoaderError { bundle: String, reason: String },

    #[error("Lifecycle hook {hook} failed for job {job_name}: {reason}")]
    LifecycleHookError {
        hook: LifecycleHook,
        job_name: String,
        reason: String,
    },

    #[error("Record store error during {operation}: {reason}")]
    StoreError { operation: String, reason: String },

    #[error("Engine is shutting down")]
    ShuttingDown,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl BatchillerError {
    pub fn configuration(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigurationError {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    pub fn pipeline(pipeline_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PipelineError {
            pipeline_name: pipeline_name.into(),
            reason: reason.into(),
        }
    }

    pub fn loader(bundle: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LoaderError {
            bundle: bundle.into(),
            reason: reason.into(),
        }
    }

    pub fn hook(hook: LifecycleHook, job_name: impl Into<String>, error: &anyhow::Error) -> Self {
        Self::LifecycleHookError {
            hook,
            job_name: job_name.into(),
            reason: format!("{error:#}"),
        }
    }

    pub fn store(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreError {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for BatchillerError {
    fn from(error: config::ConfigError) -> Self {
        Self::configuration("settings", error.to_string())
    }
}

impl From<serde_json::Error> for BatchillerError {
    fn from(error: serde_json::Error) -> Self {
        Self::configuration("json", error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BatchillerError>;

/// Render a captured panic payload as text
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_error_display() {
        let error = BatchillerError::hook(
            LifecycleHook::Init,
            "nightly-report",
            &anyhow::anyhow!("database unreachable"),
        );
        assert_eq!(
            error.to_string(),
            "Lifecycle hook init failed for job nightly-report: database unreachable"
        );
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
