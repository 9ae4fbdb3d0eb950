//! Shared fixtures for integration tests: a scriptable job, a recording
//! listener and engine builders with fast retry settings.

#![allow(dead_code)]

use async_trait::async_trait;
use batchiller_core::config::{ExecutorConfig, RetryConfig};
use batchiller_core::engine::ExecutionEngine;
use batchiller_core::events::JobEventListener;
use batchiller_core::models::{ExecutionContext, Job, JobLifecycle, JobOutcome};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a scripted job body does on each attempt
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed(&'static str),
    Fail(&'static str),
    Error(&'static str),
    Panic(&'static str),
    /// Fail this many attempts, then succeed
    FailTimes(usize),
}

#[derive(Debug, Default)]
pub struct Counters {
    pub executions: AtomicUsize,
    pub inits: AtomicUsize,
    pub before_starts: AtomicUsize,
    pub after_ends: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct ScriptedJob {
    pub name: String,
    pub behavior: Behavior,
    pub delay: Duration,
    pub timeout: Duration,
    pub retryable: bool,
    pub max_retries: u32,
    pub with_lifecycle: bool,
    pub fail_init: bool,
    pub fail_before_start: bool,
    pub before_start_delay: Duration,
    pub fail_after_end: bool,
    pub counters: Arc<Counters>,
    pub listener: Option<Arc<RecordingListener>>,
}

impl ScriptedJob {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            delay: Duration::ZERO,
            timeout: Duration::from_secs(30),
            retryable: false,
            max_retries: 0,
            with_lifecycle: false,
            fail_init: false,
            fail_before_start: false,
            before_start_delay: Duration::ZERO,
            fail_after_end: false,
            counters: Arc::new(Counters::default()),
            listener: None,
        }
    }

    pub fn succeeding(name: &str) -> Self {
        Self::new(name, Behavior::Succeed("ok"))
    }

    pub fn failing(name: &str) -> Self {
        Self::new(name, Behavior::Fail("failed on purpose"))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retryable(mut self, max_retries: u32) -> Self {
        self.retryable = true;
        self.max_retries = max_retries;
        self
    }

    pub fn with_lifecycle(mut self) -> Self {
        self.with_lifecycle = true;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.with_lifecycle = true;
        self.fail_init = true;
        self
    }

    pub fn failing_before_start(mut self) -> Self {
        self.with_lifecycle = true;
        self.fail_before_start = true;
        self
    }

    pub fn with_slow_before_start(mut self, delay: Duration) -> Self {
        self.with_lifecycle = true;
        self.before_start_delay = delay;
        self
    }

    pub fn failing_after_end(mut self) -> Self {
        self.with_lifecycle = true;
        self.fail_after_end = true;
        self
    }

    pub fn with_own_listener(mut self, listener: Arc<RecordingListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    pub fn into_arc(self) -> Arc<dyn Job> {
        Arc::new(self)
    }
}

#[async_trait]
impl Job for ScriptedJob {
    fn name(&self) -> &str {
        &self.name
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

    async fn execute(&self, _context: &ExecutionContext) -> anyhow::Result<JobOutcome> {
        let attempt = self.counters.executions.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.behavior {
            Behavior::Succeed(message) => Ok(JobOutcome::success(*message)),
            Behavior::Fail(message) => Ok(JobOutcome::failure(*message)),
            Behavior::Error(message) => Err(anyhow::anyhow!(*message)),
            Behavior::Panic(message) => panic!("{}", message),
            Behavior::FailTimes(times) if attempt < *times => {
                Ok(JobOutcome::failure(format!("attempt {attempt} failed")))
            }
            Behavior::FailTimes(_) => Ok(JobOutcome::success(format!("attempt {attempt} succeeded"))),
        }
    }

    fn lifecycle(&self) -> Option<&dyn JobLifecycle> {
        if self.with_lifecycle {
            Some(self)
        } else {
            None
        }
    }

    fn event_listener(self: Arc<Self>) -> Option<Arc<dyn JobEventListener>> {
        self.listener
            .as_ref()
            .map(|listener| Arc::clone(listener) as Arc<dyn JobEventListener>)
    }
}

#[async_trait]
impl JobLifecycle for ScriptedJob {
    async fn init(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            anyhow::bail!("init refused");
        }
        Ok(())
    }

    async fn before_start(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
        self.counters.before_starts.fetch_add(1, Ordering::SeqCst);
        if !self.before_start_delay.is_zero() {
            tokio::time::sleep(self.before_start_delay).await;
        }
        if self.fail_before_start {
            anyhow::bail!("before_start refused");
        }
        Ok(())
    }

    async fn after_end(&self, _context: &ExecutionContext, _outcome: &JobOutcome) -> anyhow::Result<()> {
        self.counters.after_ends.fetch_add(1, Ordering::SeqCst);
        if self.fail_after_end {
            anyhow::bail!("after_end exploded");
        }
        Ok(())
    }

    async fn shutdown(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
        self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records `"<event>:<job>"` for every fine-grained event it sees
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, kind: &str, context: &ExecutionContext) {
        self.events
            .lock()
            .push(format!("{kind}:{}", context.job_name()));
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Event kinds recorded for one job, in order
    pub fn kinds_for(&self, job_name: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|entry| {
                let (kind, job) = entry.split_once(':')?;
                (job == job_name).then(|| kind.to_string())
            })
            .collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|entry| *entry == event).count()
    }
}

impl JobEventListener for RecordingListener {
    fn on_pending(&self, context: &ExecutionContext) {
        self.record("pending", context);
    }

    fn on_queued(&self, context: &ExecutionContext) {
        self.record("queued", context);
    }

    fn on_start(&self, context: &ExecutionContext) {
        self.record("started", context);
    }

    fn on_end(&self, context: &ExecutionContext, _outcome: &JobOutcome) {
        self.record("ended", context);
    }

    fn on_pass(&self, context: &ExecutionContext, _outcome: &JobOutcome) {
        self.record("passed", context);
    }

    fn on_failed(&self, context: &ExecutionContext, _outcome: &JobOutcome) {
        self.record("failed", context);
    }

    fn on_retry(&self, context: &ExecutionContext, _attempt: u32) {
        self.record("retrying", context);
    }

    fn on_timeout(&self, context: &ExecutionContext) {
        self.record("timed_out", context);
    }

    fn on_cancelled(&self, context: &ExecutionContext, _reason: &str) {
        self.record("cancelled", context);
    }

    fn on_skipped(&self, context: &ExecutionContext, _reason: &str) {
        self.record("skipped", context);
    }
}

/// Listener that panics on every start event
pub struct PanickingListener;

impl JobEventListener for PanickingListener {
    fn on_start(&self, _context: &ExecutionContext) {
        panic!("listener exploded");
    }
}

pub fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        max_concurrent_jobs: 4,
        queue_capacity: 100,
        max_job_timeout_secs: 60,
        shutdown_timeout_secs: 2,
        retry: RetryConfig {
            base_delay_ms: 5,
            max_delay_ms: 20,
            backoff_multiplier: 2.0,
        },
    }
}

/// Engine with fast retries and a recording listener attached
pub fn engine_with_listener() -> (ExecutionEngine, Arc<RecordingListener>) {
    let engine = ExecutionEngine::in_memory(fast_config());
    let listener = RecordingListener::new();
    engine.add_event_listener(listener.clone());
    (engine, listener)
}
