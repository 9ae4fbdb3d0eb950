//! Job that succeeds with a fixed message after an optional delay. Useful for
//! smoke-testing pipelines and bundle manifests.

use crate::constants::{DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_RETRIES};
use crate::jobs::{setting_str, setting_u64};
use crate::loader::JobSpec;
use crate::models::{ExecutionContext, Job, JobOutcome};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EchoJob {
    name: String,
    description: String,
    message: String,
    delay: Duration,
    timeout: Duration,
    retryable: bool,
    max_retries: u32,
}

impl EchoJob {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            message: format!("{name} completed"),
            name,
            description: String::new(),
            delay: Duration::ZERO,
            timeout: DEFAULT_JOB_TIMEOUT,
            retryable: false,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Factory for the `echo` manifest kind. Settings: `message`, `delay_ms`
    pub fn from_spec(spec: &JobSpec) -> anyhow::Result<Arc<dyn Job>> {
        let mut job = EchoJob::new(&spec.name).with_description(&spec.description);
        if let Some(message) = setting_str(spec, "message")? {
            job = job.with_message(message);
        }
        if let Some(delay_ms) = setting_u64(spec, "delay_ms")? {
            job = job.with_delay(Duration::from_millis(delay_ms));
        }
        if let Some(timeout) = spec.timeout() {
            job = job.with_timeout(timeout);
        }
        job.retryable = spec.retryable;
        job.max_retries = spec.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        Ok(Arc::new(job))
    }
}

#[async_trait]
impl Job for EchoJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_retryable(&self) -> bool {
        self.retryable
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    async fn execute(&self, context: &ExecutionContext) -> anyhow::Result<JobOutcome> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let parameters: serde_json::Map<String, Value> = context
            .parameters()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let mut data = HashMap::new();
        data.insert("parameters".to_string(), Value::Object(parameters));
        data.insert("attempt".to_string(), json!(context.retry_attempt()));

        Ok(JobOutcome::success_with_data(self.message.clone(), data))
    }
}
