//! # Pipelines
//!
//! Named compositions of registered jobs. [`PipelineOrchestrator`] runs them;
//! [`PipelineOutcome`] reports what happened to each declared job.

pub mod orchestrator;
pub mod outcome;

pub use orchestrator::{PipelineHandle, PipelineOrchestrator};
pub use outcome::{PipelineOutcome, PipelineStep};
