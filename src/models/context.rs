//! # Execution Context
//!
//! Immutable per-execution context handed to job bodies, lifecycle hooks and
//! listeners. Parameters are shared behind an `Arc` so cloning a context for
//! events and retries never copies the parameter map.

use crate::constants::{TriggerType, SYSTEM_PRINCIPAL};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Caller-supplied execution parameters
pub type Parameters = HashMap<String, Value>;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    execution_id: String,
    job_name: String,
    pipeline_name: Option<String>,
    started_at: DateTime<Utc>,
    parameters: Arc<Parameters>,
    trigger_type: TriggerType,
    triggered_by: String,
    is_retry: bool,
    retry_attempt: u32,
}

impl ExecutionContext {
    /// Create a context with a freshly generated execution id
    pub fn new(
        job_name: impl Into<String>,
        parameters: Parameters,
        triggered_by: impl Into<String>,
        trigger_type: TriggerType,
    ) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            job_name: job_name.into(),
            pipeline_name: None,
            started_at: Utc::now(),
            parameters: Arc::new(parameters),
            trigger_type,
            triggered_by: triggered_by.into(),
            is_retry: false,
            retry_attempt: 0,
        }
    }

    /// Synthetic context for engine-initiated hooks (`init-<uuid>`, `shutdown-<uuid>`)
    pub fn system(job_name: impl Into<String>, prefix: &str, trigger_type: TriggerType) -> Self {
        let mut context = Self::new(job_name, Parameters::new(), SYSTEM_PRINCIPAL, trigger_type);
        context.execution_id = format!("{prefix}-{}", Uuid::new_v4());
        context
    }

    /// Attach the owning pipeline while the context is being built
    pub fn with_pipeline(mut self, pipeline_name: impl Into<String>) -> Self {
        self.pipeline_name = Some(pipeline_name.into());
        self
    }

    /// Derive the context of a retry attempt: same execution, new attempt number
    pub fn for_retry(&self, attempt: u32) -> Self {
        Self {
            is_retry: attempt > 0,
            retry_attempt: attempt,
            ..self.clone()
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn pipeline_name(&self) -> Option<&str> {
        self.pipeline_name.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Deserialize a single parameter into a concrete type
    pub fn parameter_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.parameters
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.trigger_type
    }

    pub fn triggered_by(&self) -> &str {
        &self.triggered_by
    }

    pub fn is_retry(&self) -> bool {
        self.is_retry
    }

    pub fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    /// Wall-clock time since the execution was accepted
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}
