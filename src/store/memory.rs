//! In-memory [`ExecutionStore`].
//!
//! Records are ordered by start time, newest first; records started in the same
//! instant fall back to insertion order so repeated history queries return the
//! same sequence. Once `max_records` is exceeded the oldest terminal records are
//! evicted.

use crate::error::{BatchillerError, Result};
use crate::models::{ExecutionRecord, ScheduledTask};
use crate::store::ExecutionStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

struct StoredRecord {
    sequence: u64,
    record: ExecutionRecord,
}

#[derive(Default)]
struct ExecutionTable {
    next_sequence: u64,
    records: HashMap<String, StoredRecord>,
}

impl ExecutionTable {
    /// Newest first: start time descending, then insertion order descending
    fn ordered<'a, F>(&'a self, filter: F, limit: usize) -> Vec<ExecutionRecord>
    where
        F: Fn(&ExecutionRecord) -> bool,
    {
        let mut matching: Vec<&'a StoredRecord> = self
            .records
            .values()
            .filter(|stored| filter(&stored.record))
            .collect();
        matching.sort_by(|a, b| {
            b.record
                .started_at
                .cmp(&a.record.started_at)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        matching
            .into_iter()
            .take(limit)
            .map(|stored| stored.record.clone())
            .collect()
    }

    fn evict_over(&mut self, max_records: usize) {
        if self.records.len() <= max_records {
            return;
        }
        let mut terminal: Vec<(u64, String)> = self
            .records
            .iter()
            .filter(|(_, stored)| stored.record.is_terminal())
            .map(|(id, stored)| (stored.sequence, id.clone()))
            .collect();
        terminal.sort();
        let excess = self.records.len() - max_records;
        for (_, id) in terminal.into_iter().take(excess) {
            self.records.remove(&id);
        }
        debug!(retained = self.records.len(), "Evicted old execution records");
    }
}

pub struct InMemoryExecutionStore {
    executions: RwLock<ExecutionTable>,
    scheduled: RwLock<HashMap<String, ScheduledTask>>,
    max_records: usize,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::with_retention(usize::MAX)
    }

    pub fn with_retention(max_records: usize) -> Self {
        Self {
            executions: RwLock::new(ExecutionTable::default()),
            scheduled: RwLock::new(HashMap::new()),
            max_records: max_records.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.executions.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let mut table = self.executions.write();
        let sequence = table.next_sequence;
        table.next_sequence += 1;
        table.records.insert(
            record.execution_id.clone(),
            StoredRecord {
                sequence,
                record: record.clone(),
            },
        );
        table.evict_over(self.max_records);
        Ok(())
    }

    async fn update_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let mut table = self.executions.write();
        match table.records.get_mut(&record.execution_id) {
            Some(stored) => {
                stored.record = record.clone();
                Ok(())
            }
            None => Err(BatchillerError::store(
                "update_execution",
                format!("execution {} not found", record.execution_id),
            )),
        }
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self
            .executions
            .read()
            .records
            .get(execution_id)
            .map(|stored| stored.record.clone()))
    }

    async fn get_history(&self, job_name: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        Ok(self
            .executions
            .read()
            .ordered(|record| record.job_name == job_name, limit))
    }

    async fn get_all(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        Ok(self.executions.read().ordered(|_| true, limit))
    }

    async fn save_scheduled_task(&self, task: &ScheduledTask) -> Result<()> {
        task.validate()?;
        self.scheduled.write().insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn update_scheduled_task(&self, task: &ScheduledTask) -> Result<()> {
        let mut scheduled = self.scheduled.write();
        match scheduled.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(BatchillerError::store(
                "update_scheduled_task",
                format!("scheduled task {} not found", task.id),
            )),
        }
    }

    async fn delete_scheduled_task(&self, task_id: &str) -> Result<bool> {
        Ok(self.scheduled.write().remove(task_id).is_some())
    }

    async fn list_scheduled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let mut tasks: Vec<ScheduledTask> = self.scheduled.read().values().cloned().collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ExecutionStatus, TriggerType};
    use crate::models::{ExecutionContext, JobOutcome, Parameters, ScheduleTarget};
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    fn record(job: &str) -> ExecutionRecord {
        let context = ExecutionContext::new(job, Parameters::new(), "tester", TriggerType::Manual);
        ExecutionRecord::from_context(&context)
    }

    fn finished(job: &str, offset_secs: i64) -> ExecutionRecord {
        let mut record = record(job);
        record.started_at = Utc::now() - Duration::seconds(offset_secs);
        record.transition(ExecutionStatus::Queued).unwrap();
        record.transition(ExecutionStatus::Running).unwrap();
        record
            .complete(ExecutionStatus::Completed, &JobOutcome::success("ok"))
            .unwrap();
        record
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let store = InMemoryExecutionStore::new();
        for offset in [30, 10, 20] {
            store.save_execution(&finished("report", offset)).await.unwrap();
        }
        store.save_execution(&finished("other", 0)).await.unwrap();

        let history = store.get_history("report", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].started_at > history[1].started_at);
        assert!(history.iter().all(|r| r.job_name == "report"));
        assert_eq!(store.get_all(10).await.unwrap()[0].job_name, "other");
    }

    #[tokio::test]
    async fn test_history_is_idempotent_for_equal_timestamps() {
        let store = InMemoryExecutionStore::new();
        let instant = Utc::now();
        for _ in 0..5 {
            let mut record = record("report");
            record.started_at = instant;
            store.save_execution(&record).await.unwrap();
        }

        let first = store.get_history("report", 5).await.unwrap();
        let second = store.get_history("report", 5).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_update_unknown_execution_fails() {
        let store = InMemoryExecutionStore::new();
        let result = store.update_execution(&record("ghost")).await;
        assert!(matches!(result, Err(BatchillerError::StoreError { .. })));
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest_terminal_records() {
        let store = InMemoryExecutionStore::with_retention(2);
        let running = record("live");
        store.save_execution(&running).await.unwrap();
        store.save_execution(&finished("old", 20)).await.unwrap();
        store.save_execution(&finished("new", 10)).await.unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get_execution(&running.execution_id).await.unwrap().is_some());
        assert!(store.get_history("old", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_task_crud() {
        let store = InMemoryExecutionStore::new();
        let mut task = ScheduledTask::new("nightly", ScheduleTarget::Job, "report", "0 2 * * *");
        store.save_scheduled_task(&task).await.unwrap();

        task.enabled = false;
        store.update_scheduled_task(&task).await.unwrap();
        let listed = store.list_scheduled_tasks().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].enabled);

        assert!(store.delete_scheduled_task(&task.id).await.unwrap());
        assert!(!store.delete_scheduled_task(&task.id).await.unwrap());
    }

    proptest! {
        #[test]
        fn prop_history_sorted_and_bounded(offsets in proptest::collection::vec(0i64..3600, 1..40), limit in 1usize..50) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let store = InMemoryExecutionStore::new();
                for offset in &offsets {
                    store.save_execution(&finished("job", *offset)).await.unwrap();
                }
                let history = store.get_history("job", limit).await.unwrap();
                prop_assert_eq!(history.len(), offsets.len().min(limit));
                for pair in history.windows(2) {
                    prop_assert!(pair[0].started_at >= pair[1].started_at);
                }
                Ok(())
            })?;
        }
    }
}
