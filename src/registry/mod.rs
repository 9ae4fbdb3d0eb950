//! # Registry
//!
//! Name-keyed storage of registered jobs and pipeline descriptors.

pub mod job_registry;

pub use job_registry::{JobRegistry, RegistryStats};
