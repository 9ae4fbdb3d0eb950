//! # Job Registry
//!
//! Concurrent name → job map plus the pipeline descriptor map.
//!
//! ## Architecture
//!
//! Both maps are `DashMap`s, so inserting a job under an existing name swaps the
//! entry in a single per-key operation: concurrent readers observe either the
//! old job or the new one, never a missing entry. Lookups hand out cloned
//! `Arc`s, which keeps a superseded job alive for any execution already holding
//! it.
//!
//! The registry is owned by the execution engine; callers register and
//! unregister through the engine so lifecycle hooks and listener bookkeeping
//! stay consistent.

use crate::error::{BatchillerError, Result};
use crate::models::{Job, JobMetadata, PipelineDescriptor};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

struct RegisteredJob {
    job: Arc<dyn Job>,
    metadata: JobMetadata,
}

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_jobs: usize,
    pub total_pipelines: usize,
    pub jobs_with_lifecycle: usize,
    pub retryable_jobs: usize,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, RegisteredJob>,
    pipelines: DashMap<String, PipelineDescriptor>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject jobs whose declared policy can never run
    pub fn validate_job(job: &dyn Job) -> Result<()> {
        let name = job.name();
        if name.trim().is_empty() {
            return Err(BatchillerError::configuration("job", "job name must not be blank"));
        }
        if name.trim() != name {
            return Err(BatchillerError::configuration(
                name,
                "job name must not carry leading or trailing whitespace",
            ));
        }
        if job.timeout() == Duration::ZERO {
            return Err(BatchillerError::configuration(name, "timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Insert or replace; returns the job previously registered under the name
    pub fn insert(&self, job: Arc<dyn Job>) -> Option<Arc<dyn Job>> {
        let metadata = JobMetadata::of(job.as_ref());
        self.jobs
            .insert(metadata.name.clone(), RegisteredJob { job, metadata })
            .map(|previous| previous.job)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.jobs.remove(name).map(|(_, entry)| entry.job)
    }

    /// Remove `job` only while it is still the instance registered under its name
    pub fn remove_instance(&self, job: &Arc<dyn Job>) -> Option<Arc<dyn Job>> {
        self.jobs
            .remove_if(job.name(), |_, entry| Arc::ptr_eq(&entry.job, job))
            .map(|(_, entry)| entry.job)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(name).map(|entry| Arc::clone(&entry.job))
    }

    pub fn metadata(&self, name: &str) -> Option<JobMetadata> {
        self.jobs.get(name).map(|entry| entry.metadata.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Registered job names, sorted
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn list_metadata(&self) -> Vec<JobMetadata> {
        let mut metadata: Vec<JobMetadata> =
            self.jobs.iter().map(|entry| entry.metadata.clone()).collect();
        metadata.sort_by(|a, b| a.name.cmp(&b.name));
        metadata
    }

    pub fn insert_pipeline(&self, descriptor: PipelineDescriptor) -> Option<PipelineDescriptor> {
        self.pipelines.insert(descriptor.name().to_string(), descriptor)
    }

    pub fn remove_pipeline(&self, name: &str) -> Option<PipelineDescriptor> {
        self.pipelines.remove(name).map(|(_, descriptor)| descriptor)
    }

    pub fn get_pipeline(&self, name: &str) -> Option<PipelineDescriptor> {
        self.pipelines.get(name).map(|entry| entry.value().clone())
    }

    pub fn pipeline_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pipelines
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total_jobs: 0,
            total_pipelines: self.pipelines.len(),
            jobs_with_lifecycle: 0,
            retryable_jobs: 0,
        };
        for entry in self.jobs.iter() {
            stats.total_jobs += 1;
            if entry.metadata.has_lifecycle {
                stats.jobs_with_lifecycle += 1;
            }
            if entry.metadata.retryable {
                stats.retryable_jobs += 1;
            }
        }
        stats
    }

    pub fn clear(&self) {
        self.jobs.clear();
        self.pipelines.clear();
    }
}
