//! # Job & Pipeline Model
//!
//! Value types shared by every other module: the job contract and its optional
//! lifecycle facet, execution contexts, outcomes, persisted execution records,
//! lifecycle events, pipeline descriptors and scheduled-task records.

pub mod context;
pub mod event;
pub mod execution;
pub mod job;
pub mod outcome;
pub mod pipeline;
pub mod schedule;

pub use context::{ExecutionContext, Parameters};
pub use event::{EventKind, LifecycleEvent};
pub use execution::ExecutionRecord;
pub use job::{Job, JobLifecycle, JobMetadata};
pub use outcome::{CapturedError, JobOutcome, OutcomeStatus};
pub use pipeline::{Branch, BranchTable, FlowStrategy, PipelineDescriptor, PipelineHooks};
pub use schedule::{ScheduleTarget, ScheduledTask};
