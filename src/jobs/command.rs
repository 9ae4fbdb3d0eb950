//! # Command Job
//!
//! Runs an external program as a supervised subprocess. The job succeeds when
//! the process exits with status zero; stdout and stderr (truncated) and the exit
//! code are returned as outcome data. Execution parameters are exported to the
//! child as `BATCHILLER_PARAM_<KEY>` environment variables.
//!
//! The child is spawned with `kill_on_drop`, so when the engine abandons the
//! execution on timeout or cancellation the process is killed with it.

use crate::constants::{DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_RETRIES};
use crate::jobs::setting_str;
use crate::loader::JobSpec;
use crate::models::{CapturedError, ExecutionContext, Job, JobOutcome};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct CommandJob {
    name: String,
    description: String,
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    retryable: bool,
    max_retries: u32,
}

impl CommandJob {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            timeout: DEFAULT_JOB_TIMEOUT,
            retryable: false,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.retryable = true;
        self.max_retries = max_retries;
        self
    }

    /// Factory for the `command` manifest kind.
    /// Settings: `program` (required), `args`, `env`, `working_dir`
    pub fn from_spec(spec: &JobSpec) -> anyhow::Result<Arc<dyn Job>> {
        let program = setting_str(spec, "program")?
            .ok_or_else(|| anyhow!("job '{}' of kind 'command' requires a 'program' setting", spec.name))?;
        let mut job = CommandJob::new(&spec.name, program);
        job.description = spec.description.clone();

        if let Some(args) = spec.settings.get("args") {
            let args: Vec<String> = serde_json::from_value(args.clone())
                .with_context(|| format!("job '{}': 'args' must be an array of strings", spec.name))?;
            job = job.with_args(args);
        }
        if let Some(env) = spec.settings.get("env") {
            let env: HashMap<String, String> = serde_json::from_value(env.clone())
                .with_context(|| format!("job '{}': 'env' must map names to strings", spec.name))?;
            job.env.extend(env);
        }
        if let Some(dir) = setting_str(spec, "working_dir")? {
            job = job.with_working_dir(dir);
        }
        if let Some(timeout) = spec.timeout() {
            job = job.with_timeout(timeout);
        }
        job.retryable = spec.retryable;
        job.max_retries = spec.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        Ok(Arc::new(job))
    }

    fn build_command(&self, context: &ExecutionContext) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .env("BATCHILLER_EXECUTION_ID", context.execution_id())
            .env("BATCHILLER_JOB_NAME", context.job_name())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in context.parameters() {
            command.env(parameter_env_key(key), parameter_env_value(value));
        }
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

#[async_trait]
impl Job for CommandJob {
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
        debug!(
            job_name = %self.name,
            execution_id = context.execution_id(),
            program = %self.program,
            "Spawning command"
        );

        let mut child = self
            .build_command(context)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.program))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (status, stdout, stderr) =
            tokio::try_join!(child.wait(), read_capped(stdout), read_capped(stderr))
                .with_context(|| format!("failed to collect output of '{}'", self.program))?;

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        let exit_code = status.code();

        let mut data = HashMap::new();
        data.insert("exit_code".to_string(), json!(exit_code));
        data.insert("stdout".to_string(), Value::String(stdout));
        data.insert("stderr".to_string(), Value::String(stderr.clone()));

        if status.success() {
            Ok(JobOutcome::success_with_data(
                format!("'{}' exited successfully", self.program),
                data,
            ))
        } else {
            let detail = if stderr.trim().is_empty() {
                format!("exit status {status}")
            } else {
                stderr.trim().to_string()
            };
            Ok(JobOutcome::failure_with_error(
                format!("'{}' failed with {}", self.program, status),
                CapturedError::new(detail),
            ))
        }
    }
}

fn parameter_env_key(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("BATCHILLER_PARAM_{sanitized}")
}

fn parameter_env_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Keeps the first `MAX_CAPTURED_OUTPUT` bytes and discards the rest, draining
/// the pipe so the child never blocks on a full buffer
async fn read_capped<R>(stream: Option<R>) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return Ok(Vec::new());
    };
    let mut captured = Vec::new();
    (&mut stream)
        .take(MAX_CAPTURED_OUTPUT as u64)
        .read_to_end(&mut captured)
        .await?;
    tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?;
    Ok(captured)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::constants::TriggerType;
    use crate::models::Parameters;

    fn context(parameters: Parameters) -> ExecutionContext {
        ExecutionContext::new("shell", parameters, "tester", TriggerType::Manual)
    }

    #[tokio::test]
    async fn test_exit_zero_is_success_with_stdout() {
        let mut parameters = Parameters::new();
        parameters.insert("target-date".to_string(), json!("2024-01-31"));
        let job = CommandJob::new("shell", "sh")
            .with_args(["-c", "echo \"$BATCHILLER_PARAM_TARGET_DATE\""]);

        let outcome = job.execute(&context(parameters)).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.data()["stdout"], json!("2024-01-31\n"));
        assert_eq!(outcome.data()["exit_code"], json!(0));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let job = CommandJob::new("shell", "sh").with_args(["-c", "echo broken >&2; exit 3"]);
        let outcome = job.execute(&context(Parameters::new())).await.unwrap();
        assert!(outcome.is_failure());
        assert_eq!(outcome.error().unwrap().message, "broken");
    }

    #[tokio::test]
    async fn test_large_output_is_capped_while_the_child_finishes() {
        let job = CommandJob::new("shell", "sh")
            .with_args(["-c", "head -c 200000 /dev/zero | tr '\\0' a; echo done >&2"]);
        let outcome = job.execute(&context(Parameters::new())).await.unwrap();

        assert!(outcome.is_success());
        let stdout = outcome.data()["stdout"].as_str().unwrap();
        assert_eq!(stdout.len(), MAX_CAPTURED_OUTPUT);
        assert!(stdout.chars().all(|c| c == 'a'));
        assert_eq!(outcome.data()["stderr"], json!("done\n"));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let job = CommandJob::new("shell", "/definitely/not/a/program");
        assert!(job.execute(&context(Parameters::new())).await.is_err());
    }

    #[test]
    fn test_parameter_env_key_sanitizing() {
        assert_eq!(parameter_env_key("target-date"), "BATCHILLER_PARAM_TARGET_DATE");
        assert_eq!(parameter_env_value(&json!(7)), "7");
        assert_eq!(parameter_env_value(&json!("x")), "x");
    }
}
