//! Execution request builder.

use crate::constants::{TriggerType, SYSTEM_PRINCIPAL};
use crate::models::{ExecutionContext, Parameters};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    job_name: String,
    parameters: Parameters,
    triggered_by: String,
    trigger_type: TriggerType,
    pipeline_name: Option<String>,
}

impl ExecutionRequest {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            parameters: Parameters::new(),
            triggered_by: SYSTEM_PRINCIPAL.to_string(),
            trigger_type: TriggerType::Manual,
            pipeline_name: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn triggered_by(mut self, principal: impl Into<String>) -> Self {
        self.triggered_by = principal.into();
        self
    }

    pub fn trigger_type(mut self, trigger_type: TriggerType) -> Self {
        self.trigger_type = trigger_type;
        self
    }

    /// Mark the execution as a constituent of a pipeline run
    pub fn in_pipeline(mut self, pipeline_name: impl Into<String>) -> Self {
        self.pipeline_name = Some(pipeline_name.into());
        self
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub(crate) fn into_context(self) -> ExecutionContext {
        let context = ExecutionContext::new(
            self.job_name,
            self.parameters,
            self.triggered_by,
            self.trigger_type,
        );
        match self.pipeline_name {
            Some(pipeline) => context.with_pipeline(pipeline),
            None => context,
        }
    }
}
