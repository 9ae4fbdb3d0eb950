//! # Pipeline Descriptor
//!
//! A named, ordered composition of registered jobs plus the flow strategy that
//! decides how they run. Descriptors are immutable once built; the builder
//! methods consume `self` so a descriptor handed to the engine never changes.

use crate::error::{BatchillerError, Result};
use crate::models::ExecutionContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowStrategy {
    #[default]
    Sequential,
    Parallel,
    Conditional,
}

impl fmt::Display for FlowStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Conditional => write!(f, "conditional"),
        }
    }
}

impl std::str::FromStr for FlowStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "conditional" => Ok(Self::Conditional),
            _ => Err(format!("Invalid flow strategy: {s}")),
        }
    }
}

/// Where a conditional pipeline goes after a job finishes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default)]
    pub on_success: Option<String>,
    #[serde(default)]
    pub on_failure: Option<String>,
}

impl Branch {
    pub fn on_success(target: impl Into<String>) -> Self {
        Self {
            on_success: Some(target.into()),
            on_failure: None,
        }
    }

    pub fn on_failure(target: impl Into<String>) -> Self {
        Self {
            on_success: None,
            on_failure: Some(target.into()),
        }
    }

    pub fn on_both(target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            on_success: Some(target.clone()),
            on_failure: Some(target),
        }
    }

    pub fn target(&self, succeeded: bool) -> Option<&str> {
        if succeeded {
            self.on_success.as_deref()
        } else {
            self.on_failure.as_deref()
        }
    }
}

/// Branch table keyed by the name of the job that just finished
pub type BranchTable = HashMap<String, Branch>;

/// Optional pipeline-level hooks
#[async_trait]
pub trait PipelineHooks: Send + Sync {
    async fn on_start(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_complete(&self, _context: &ExecutionContext, _success: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct PipelineDescriptor {
    name: String,
    description: String,
    jobs: Vec<String>,
    flow: FlowStrategy,
    branches: BranchTable,
    hooks: Option<Arc<dyn PipelineHooks>>,
}

impl PipelineDescriptor {
    pub fn new(name: impl Into<String>, flow: FlowStrategy) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            jobs: Vec::new(),
            flow,
            branches: BranchTable::new(),
            hooks: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_job(mut self, job_name: impl Into<String>) -> Self {
        self.jobs.push(job_name.into());
        self
    }

    pub fn with_jobs<I, S>(mut self, job_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.jobs.extend(job_names.into_iter().map(Into::into));
        self
    }

    pub fn with_branch(mut self, job_name: impl Into<String>, branch: Branch) -> Self {
        self.branches.insert(job_name.into(), branch);
        self
    }

    pub fn with_branches(mut self, branches: BranchTable) -> Self {
        self.branches.extend(branches);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn PipelineHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn jobs(&self) -> &[String] {
        &self.jobs
    }

    pub fn flow(&self) -> FlowStrategy {
        self.flow
    }

    pub fn branches(&self) -> &BranchTable {
        &self.branches
    }

    pub fn hooks(&self) -> Option<&Arc<dyn PipelineHooks>> {
        self.hooks.as_ref()
    }

    /// Reject descriptors that can never run
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BatchillerError::configuration(
                "pipeline",
                "pipeline name must not be blank",
            ));
        }
        if self.jobs.is_empty() {
            return Err(BatchillerError::configuration(
                &self.name,
                "pipeline must contain at least one job",
            ));
        }
        if let Some(blank) = self.jobs.iter().find(|job| job.trim().is_empty()) {
            return Err(BatchillerError::configuration(
                &self.name,
                format!("pipeline contains a blank job name '{blank}'"),
            ));
        }

        let members: HashSet<&str> = self.jobs.iter().map(String::as_str).collect();
        for (source, branch) in &self.branches {
            if !members.contains(source.as_str()) {
                return Err(BatchillerError::configuration(
                    &self.name,
                    format!("branch declared for '{source}', which is not part of the pipeline"),
                ));
            }
            for target in [&branch.on_success, &branch.on_failure].into_iter().flatten() {
                if !members.contains(target.as_str()) {
                    return Err(BatchillerError::configuration(
                        &self.name,
                        format!("branch from '{source}' targets unknown job '{target}'"),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PipelineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("jobs", &self.jobs)
            .field("flow", &self.flow)
            .field("branches", &self.branches)
            .field("has_hooks", &self.hooks.is_some())
            .finish()
    }
}
