//! # System Bootstrap
//!
//! Wires the record store, execution engine, pipeline orchestrator, trigger
//! dispatcher and (when enabled) the hot-swap loader from one
//! [`BatchillerConfig`], and exposes the operations an API or CLI surface
//! forwards to.
//!
//! ## Key Features
//!
//! - **Single construction path**: every component shares the same engine and store
//! - **Lifecycle Management**: `start` brings the loader up, `shutdown` stops it
//!   and drains the engine
//! - **Consistent API**: trigger jobs and pipelines, read history and metrics

use crate::config::BatchillerConfig;
use crate::constants::TriggerType;
use crate::engine::{EngineMetrics, ExecutionEngine, ExecutionHandle};
use crate::error::Result;
use crate::loader::HotSwapLoader;
use crate::models::{ExecutionRecord, Parameters};
use crate::pipeline::{PipelineHandle, PipelineOrchestrator};
use crate::store::{ExecutionStore, InMemoryExecutionStore};
use crate::trigger::TriggerDispatcher;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// System status information
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub loader_enabled: bool,
    pub loaded_units: usize,
    pub engine: EngineMetrics,
}

pub struct BatchillerSystem {
    config: BatchillerConfig,
    store: Arc<dyn ExecutionStore>,
    engine: ExecutionEngine,
    orchestrator: PipelineOrchestrator,
    triggers: TriggerDispatcher,
    loader: Option<Arc<HotSwapLoader>>,
    running: AtomicBool,
}

impl BatchillerSystem {
    /// Build a system over an in-memory store bounded by `history.max_records`
    pub fn new(config: BatchillerConfig) -> Result<Self> {
        let store = Arc::new(InMemoryExecutionStore::with_retention(config.history.max_records));
        Self::with_store(config, store)
    }

    pub fn with_store(config: BatchillerConfig, store: Arc<dyn ExecutionStore>) -> Result<Self> {
        config.validate()?;

        let engine = ExecutionEngine::new(config.executor.clone(), Arc::clone(&store));
        let orchestrator = PipelineOrchestrator::new(engine.clone());
        let triggers = TriggerDispatcher::new(engine.clone(), orchestrator.clone(), Arc::clone(&store));
        let loader = config
            .loader
            .enabled
            .then(|| Arc::new(HotSwapLoader::from_config(config.loader.clone(), engine.clone())));

        Ok(Self {
            config,
            store,
            engine,
            orchestrator,
            triggers,
            loader,
            running: AtomicBool::new(false),
        })
    }

    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(loader) = &self.loader {
            if let Err(error) = loader.start().await {
                self.running.store(false, Ordering::Release);
                return Err(error);
            }
        }
        info!(
            max_concurrent_jobs = self.config.executor.max_concurrent_jobs,
            loader_enabled = self.loader.is_some(),
            "🚀 Batchiller system started"
        );
        Ok(())
    }

    /// Stop the loader, then drain and shut down the engine
    pub async fn shutdown(&self) {
        if let Some(loader) = &self.loader {
            loader.shutdown().await;
        }
        self.engine.shutdown().await;
        self.running.store(false, Ordering::Release);
        info!("🛑 Batchiller system shut down");
    }

    pub fn config(&self) -> &BatchillerConfig {
        &self.config
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.orchestrator
    }

    pub fn triggers(&self) -> &TriggerDispatcher {
        &self.triggers
    }

    pub fn loader(&self) -> Option<&Arc<HotSwapLoader>> {
        self.loader.as_ref()
    }

    pub fn store(&self) -> Arc<dyn ExecutionStore> {
        Arc::clone(&self.store)
    }

    pub fn trigger_job(
        &self,
        job_name: &str,
        parameters: Parameters,
        triggered_by: &str,
    ) -> ExecutionHandle {
        self.engine
            .execute_job(job_name, parameters, triggered_by, TriggerType::Api)
    }

    pub fn trigger_pipeline(
        &self,
        pipeline_name: &str,
        parameters: Parameters,
        triggered_by: &str,
    ) -> PipelineHandle {
        self.orchestrator.execute_pipeline_with_parameters(
            pipeline_name,
            parameters,
            triggered_by,
            TriggerType::Api,
        )
    }

    /// History of one job, most recent first; `limit` defaults to `history.limit`
    pub async fn history(&self, job_name: &str, limit: Option<usize>) -> Result<Vec<ExecutionRecord>> {
        self.store
            .get_history(job_name, limit.unwrap_or(self.config.history.limit))
            .await
    }

    pub async fn recent_executions(&self, limit: Option<usize>) -> Result<Vec<ExecutionRecord>> {
        self.store
            .get_all(limit.unwrap_or(self.config.history.limit))
            .await
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.engine.metrics()
    }

    pub async fn status(&self) -> SystemStatus {
        let loaded_units = match &self.loader {
            Some(loader) => loader.loaded_units().await.len(),
            None => 0,
        };
        SystemStatus {
            running: self.running.load(Ordering::Acquire),
            loader_enabled: self.loader.is_some(),
            loaded_units,
            engine: self.engine.metrics(),
        }
    }
}
