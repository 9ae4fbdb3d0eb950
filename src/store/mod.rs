//! # Record Store
//!
//! Persistence seam for execution records and scheduled-task records. The engine
//! writes through [`ExecutionStore`] on every state change; the in-memory
//! implementation is the default backing store.

pub mod memory;

pub use memory::InMemoryExecutionStore;

use crate::error::Result;
use crate::models::{ExecutionRecord, ScheduledTask};
use async_trait::async_trait;

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a newly accepted execution
    async fn save_execution(&self, record: &ExecutionRecord) -> Result<()>;

    /// Overwrite the stored state of a known execution
    async fn update_execution(&self, record: &ExecutionRecord) -> Result<()>;

    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>>;

    /// Most recent executions of one job, newest first
    async fn get_history(&self, job_name: &str, limit: usize) -> Result<Vec<ExecutionRecord>>;

    /// Most recent executions across all jobs, newest first
    async fn get_all(&self, limit: usize) -> Result<Vec<ExecutionRecord>>;

    async fn save_scheduled_task(&self, task: &ScheduledTask) -> Result<()>;

    async fn update_scheduled_task(&self, task: &ScheduledTask) -> Result<()>;

    /// Returns whether a task was deleted
    async fn delete_scheduled_task(&self, task_id: &str) -> Result<bool>;

    async fn list_scheduled_tasks(&self) -> Result<Vec<ScheduledTask>>;
}
