//! Engine counters and the metrics snapshot built from them.

use crate::constants::ExecutionStatus;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub not_found: AtomicU64,
    pub queued: AtomicU64,
    pub running: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
    pub cancelled: AtomicU64,
    pub retries: AtomicU64,
}

impl EngineCounters {
    pub fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(counter: &AtomicU64) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn record_terminal(&self, status: ExecutionStatus) {
        match status {
            ExecutionStatus::Completed => Self::increment(&self.completed),
            ExecutionStatus::Failed => Self::increment(&self.failed),
            ExecutionStatus::TimedOut => Self::increment(&self.timed_out),
            ExecutionStatus::Cancelled => Self::increment(&self.cancelled),
            _ => {}
        }
    }
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineMetrics {
    pub registered_jobs: usize,
    pub registered_pipelines: usize,
    pub max_concurrency: usize,
    pub available_workers: usize,
    pub in_flight: usize,
    pub queued: u64,
    pub running: u64,
    pub submitted: u64,
    pub rejected: u64,
    pub not_found: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub retries: u64,
    pub listener_failures: u64,
}
