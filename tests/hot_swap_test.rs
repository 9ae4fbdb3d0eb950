//! Hot-swap loader tests over an in-memory bundle source and a manifest
//! directory: supersession, removal, failure isolation and in-flight safety.

mod common;

use anyhow::anyhow;
use async_trait::async_trait;
use batchiller_core::config::LoaderConfig;
use batchiller_core::constants::TriggerType;
use batchiller_core::engine::ExecutionEngine;
use batchiller_core::jobs::EchoJob;
use batchiller_core::loader::{
    Bundle, BundleId, BundleItem, BundleMarker, BundleSource, BundleStamp, HotSwapLoader,
    JobFactoryCatalog, ManifestDirectorySource,
};
use batchiller_core::models::{FlowStrategy, Parameters, PipelineDescriptor};
use batchiller_core::pipeline::PipelineOrchestrator;
use common::{fast_config, Behavior, Counters, RecordingListener, ScriptedJob};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone)]
enum Entry {
    Job {
        name: &'static str,
        message: &'static str,
        delay: Duration,
        counters: Arc<Counters>,
    },
    Pipeline(PipelineDescriptor),
    Broken(&'static str),
}

impl Entry {
    fn job(name: &'static str, message: &'static str, counters: &Arc<Counters>) -> Self {
        Self::Job {
            name,
            message,
            delay: Duration::ZERO,
            counters: Arc::clone(counters),
        }
    }

    fn key(&self) -> String {
        match self {
            Self::Job { name, .. } => format!("job:{name}"),
            Self::Pipeline(descriptor) => format!("pipeline:{}", descriptor.name()),
            Self::Broken(name) => format!("broken:{name}"),
        }
    }
}

#[derive(Clone)]
struct BundleSpec {
    marker: u128,
    version: &'static str,
    entries: Vec<Entry>,
    unopenable: bool,
    releases: Arc<AtomicUsize>,
}

impl BundleSpec {
    fn new(marker: u128, version: &'static str, entries: Vec<Entry>) -> Self {
        Self {
            marker,
            version,
            entries,
            unopenable: false,
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn releases(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }
}

#[derive(Default)]
struct MemorySource {
    bundles: Mutex<BTreeMap<String, BundleSpec>>,
    fail_listing: AtomicBool,
}

impl MemorySource {
    fn put(&self, id: &str, spec: BundleSpec) {
        self.bundles.lock().insert(id.to_string(), spec);
    }

    fn remove(&self, id: &str) {
        self.bundles.lock().remove(id);
    }
}

#[async_trait]
impl BundleSource for MemorySource {
    async fn list_bundles(&self) -> anyhow::Result<Vec<BundleStamp>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(anyhow!("bundle store unreachable"));
        }
        Ok(self
            .bundles
            .lock()
            .iter()
            .map(|(id, spec)| BundleStamp::new(id.clone(), BundleMarker::new(spec.marker)))
            .collect())
    }

    async fn open_bundle(&self, stamp: &BundleStamp) -> anyhow::Result<Box<dyn Bundle>> {
        let spec = self
            .bundles
            .lock()
            .get(stamp.id.as_str())
            .cloned()
            .ok_or_else(|| anyhow!("bundle {} vanished", stamp.id))?;
        if spec.unopenable {
            return Err(anyhow!("corrupt archive"));
        }
        Ok(Box::new(MemoryBundle {
            id: stamp.id.clone(),
            spec,
        }))
    }
}

struct MemoryBundle {
    id: BundleId,
    spec: BundleSpec,
}

impl Bundle for MemoryBundle {
    fn id(&self) -> &BundleId {
        &self.id
    }

    fn version(&self) -> Option<&str> {
        Some(self.spec.version)
    }

    fn entries(&self) -> Vec<String> {
        self.spec.entries.iter().map(Entry::key).collect()
    }

    fn construct(&self, entry: &str) -> anyhow::Result<BundleItem> {
        let entry = self
            .spec
            .entries
            .iter()
            .find(|candidate| candidate.key() == entry)
            .ok_or_else(|| anyhow!("no entry {entry}"))?;
        match entry {
            Entry::Job {
                name,
                message,
                delay,
                counters,
            } => {
                let mut job = ScriptedJob::new(name, Behavior::Succeed(*message))
                    .with_delay(*delay)
                    .with_lifecycle();
                job.counters = Arc::clone(counters);
                Ok(BundleItem::Job(job.into_arc()))
            }
            Entry::Pipeline(descriptor) => Ok(BundleItem::Pipeline(descriptor.clone())),
            Entry::Broken(name) => Err(anyhow!("cannot construct {name}")),
        }
    }

    fn release(&self) {
        self.spec.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn loader_config() -> LoaderConfig {
    LoaderConfig {
        enabled: true,
        jobs_directory: "./unused".into(),
        scan_interval_seconds: 3600,
    }
}

fn loader_over(source: &Arc<MemorySource>) -> (Arc<HotSwapLoader>, ExecutionEngine) {
    let engine = ExecutionEngine::in_memory(fast_config());
    let loader = HotSwapLoader::new(
        loader_config(),
        Arc::clone(source) as Arc<dyn BundleSource>,
        engine.clone(),
    );
    (Arc::new(loader), engine)
}

async fn run_message(engine: &ExecutionEngine, job_name: &str) -> String {
    engine
        .execute_job(job_name, Parameters::new(), "tester", TriggerType::Manual)
        .await
        .message()
        .to_string()
}

#[tokio::test]
async fn test_new_bundle_registers_jobs_and_pipelines() {
    let source = Arc::new(MemorySource::default());
    let counters = Arc::new(Counters::default());
    source.put(
        "ops",
        BundleSpec::new(
            1,
            "1.0",
            vec![
                Entry::job("extract", "extracted", &counters),
                Entry::job("load", "loaded", &counters),
                Entry::Pipeline(
                    PipelineDescriptor::new("etl", FlowStrategy::Sequential)
                        .with_jobs(["extract", "load"]),
                ),
            ],
        ),
    );
    let (loader, engine) = loader_over(&source);

    let report = loader.scan().await;

    assert_eq!(report.loaded_bundles, vec!["ops"]);
    assert_eq!(report.jobs_loaded, vec!["extract", "load"]);
    assert_eq!(report.pipelines_loaded, vec!["etl"]);
    assert!(report.failures.is_empty());
    assert_eq!(Counters::get(&counters.inits), 2);

    let units = loader.loaded_units().await;
    assert_eq!(units.len(), 2);
    assert!(units.iter().all(|unit| unit.version.as_deref() == Some("1.0")));

    let outcome = PipelineOrchestrator::new(engine)
        .execute_pipeline("etl", "tester", TriggerType::Manual)
        .await
        .unwrap();
    assert!(outcome.success);
}

#[tokio::test]
async fn test_newer_marker_supersedes_exactly_once() {
    let source = Arc::new(MemorySource::default());
    let first = Arc::new(Counters::default());
    let second = Arc::new(Counters::default());
    let v1 = BundleSpec::new(1, "1.0", vec![Entry::job("report", "v1", &first)]);
    let v1_releases = v1.releases();
    source.put("reports", v1);
    let (loader, engine) = loader_over(&source);

    loader.scan().await;
    assert_eq!(run_message(&engine, "report").await, "v1");

    source.put("reports", BundleSpec::new(2, "2.0", vec![Entry::job("report", "v2", &second)]));
    let report = loader.scan().await;

    assert_eq!(report.superseded, vec!["report"]);
    assert_eq!(Counters::get(&first.shutdowns), 1);
    assert_eq!(Counters::get(&second.inits), 1);
    assert_eq!(v1_releases.load(Ordering::SeqCst), 1);
    assert_eq!(run_message(&engine, "report").await, "v2");

    let units = loader.loaded_units().await;
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].version.as_deref(), Some("2.0"));

    // Same marker again: nothing to do
    let report = loader.scan().await;
    assert!(!report.has_changes());
    assert_eq!(Counters::get(&first.shutdowns), 1);
    assert_eq!(Counters::get(&second.inits), 1);
}

#[tokio::test]
async fn test_removed_bundle_unregisters_everything_it_provided() {
    let source = Arc::new(MemorySource::default());
    let counters = Arc::new(Counters::default());
    let spec = BundleSpec::new(
        1,
        "1.0",
        vec![
            Entry::job("cleanup", "cleaned", &counters),
            Entry::Pipeline(PipelineDescriptor::new("nightly", FlowStrategy::Sequential).with_job("cleanup")),
        ],
    );
    let releases = spec.releases();
    source.put("maintenance", spec);
    let (loader, engine) = loader_over(&source);
    loader.scan().await;

    source.remove("maintenance");
    let report = loader.scan().await;

    assert_eq!(report.unloaded_bundles, vec!["maintenance"]);
    assert_eq!(report.jobs_unloaded, vec!["cleanup"]);
    assert_eq!(report.pipelines_unloaded, vec!["nightly"]);
    assert!(!engine.is_registered("cleanup"));
    assert!(engine.pipeline("nightly").is_none());
    assert_eq!(Counters::get(&counters.shutdowns), 1);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(loader.loaded_units().await.is_empty());
}

#[tokio::test]
async fn test_manual_registration_takes_a_name_away_from_its_bundle() {
    let source = Arc::new(MemorySource::default());
    let counters = Arc::new(Counters::default());
    let spec = BundleSpec::new(1, "1.0", vec![Entry::job("report", "bundled", &counters)]);
    let releases = spec.releases();
    source.put("reports", spec);
    let (loader, engine) = loader_over(&source);
    loader.scan().await;
    assert!(loader.loaded_unit("report").await.is_some());

    engine
        .register_job(Arc::new(EchoJob::new("report").with_message("manual")))
        .await
        .unwrap();

    assert!(loader.loaded_unit("report").await.is_none());
    assert_eq!(releases.load(Ordering::SeqCst), 1);

    source.remove("reports");
    let report = loader.scan().await;

    assert_eq!(report.unloaded_bundles, vec!["reports"]);
    assert!(report.jobs_unloaded.is_empty());
    assert!(engine.is_registered("report"));
    assert_eq!(run_message(&engine, "report").await, "manual");
}

#[tokio::test]
async fn test_unit_unregistered_elsewhere_is_not_resurrected_or_removed_twice() {
    let source = Arc::new(MemorySource::default());
    let counters = Arc::new(Counters::default());
    source.put(
        "reports",
        BundleSpec::new(1, "1.0", vec![Entry::job("report", "bundled", &counters)]),
    );
    let (loader, engine) = loader_over(&source);
    loader.scan().await;

    assert!(engine.unregister_job("report").await);
    assert!(loader.loaded_units().await.is_empty());

    engine
        .register_job(Arc::new(EchoJob::new("report").with_message("manual")))
        .await
        .unwrap();
    source.remove("reports");
    let report = loader.scan().await;

    assert!(report.jobs_unloaded.is_empty());
    assert_eq!(Counters::get(&counters.shutdowns), 1);
    assert_eq!(run_message(&engine, "report").await, "manual");
}

#[tokio::test]
async fn test_broken_entries_and_bundles_are_isolated() {
    let source = Arc::new(MemorySource::default());
    let counters = Arc::new(Counters::default());
    source.put(
        "mixed",
        BundleSpec::new(
            1,
            "1.0",
            vec![Entry::Broken("half-written"), Entry::job("sound", "fine", &counters)],
        ),
    );
    let mut corrupt = BundleSpec::new(1, "0.1", Vec::new());
    corrupt.unopenable = true;
    source.put("corrupt", corrupt);
    let (loader, engine) = loader_over(&source);

    let report = loader.scan().await;

    assert_eq!(report.failures.len(), 2);
    let entry_failure = report
        .failures
        .iter()
        .find(|failure| failure.bundle == "mixed")
        .unwrap();
    assert_eq!(entry_failure.entry.as_deref(), Some("broken:half-written"));
    let bundle_failure = report
        .failures
        .iter()
        .find(|failure| failure.bundle == "corrupt")
        .unwrap();
    assert!(bundle_failure.entry.is_none());
    assert!(bundle_failure.reason.contains("corrupt archive"));

    assert!(engine.is_registered("sound"));
    assert_eq!(run_message(&engine, "sound").await, "fine");

    // Unchanged broken bundles are not retried on every scan
    let report = loader.scan().await;
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_in_flight_execution_finishes_on_old_version() {
    let source = Arc::new(MemorySource::default());
    let first = Arc::new(Counters::default());
    let second = Arc::new(Counters::default());
    source.put(
        "slow",
        BundleSpec::new(
            1,
            "1.0",
            vec![Entry::Job {
                name: "crunch",
                message: "old result",
                delay: Duration::from_millis(200),
                counters: Arc::clone(&first),
            }],
        ),
    );
    let (loader, engine) = loader_over(&source);
    let listener = RecordingListener::new();
    engine.add_event_listener(listener.clone());
    loader.scan().await;

    let in_flight = engine.execute_job("crunch", Parameters::new(), "tester", TriggerType::Manual);
    tokio::time::timeout(Duration::from_secs(5), async {
        while listener.count("started:crunch") == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    source.put("slow", BundleSpec::new(2, "2.0", vec![Entry::job("crunch", "new result", &second)]));
    let report = loader.scan().await;
    assert_eq!(report.superseded, vec!["crunch"]);

    assert_eq!(in_flight.await.message(), "old result");
    assert_eq!(run_message(&engine, "crunch").await, "new result");
    assert_eq!(Counters::get(&first.executions), 1);
    assert_eq!(Counters::get(&second.executions), 1);
}

#[tokio::test]
async fn test_reload_retires_entries_no_longer_declared() {
    let source = Arc::new(MemorySource::default());
    let counters = Arc::new(Counters::default());
    source.put(
        "suite",
        BundleSpec::new(
            1,
            "1.0",
            vec![
                Entry::job("keep", "kept", &counters),
                Entry::job("drop", "dropped", &counters),
            ],
        ),
    );
    let (loader, engine) = loader_over(&source);
    loader.scan().await;

    source.put("suite", BundleSpec::new(2, "2.0", vec![Entry::job("keep", "kept again", &counters)]));
    let report = loader.scan().await;

    assert_eq!(report.jobs_unloaded, vec!["drop"]);
    assert!(engine.is_registered("keep"));
    assert!(!engine.is_registered("drop"));
    assert!(loader.loaded_unit("drop").await.is_none());
}

#[tokio::test]
async fn test_listing_failure_changes_nothing() {
    let source = Arc::new(MemorySource::default());
    let counters = Arc::new(Counters::default());
    source.put("stable", BundleSpec::new(1, "1.0", vec![Entry::job("steady", "ok", &counters)]));
    let (loader, engine) = loader_over(&source);
    loader.scan().await;

    source.fail_listing.store(true, Ordering::SeqCst);
    let report = loader.scan().await;

    assert!(!report.has_changes());
    assert_eq!(report.failures.len(), 1);
    assert!(engine.is_registered("steady"));
    assert_eq!(loader.loaded_units().await.len(), 1);
}

#[tokio::test]
async fn test_shutdown_releases_scopes_and_keeps_jobs() {
    let source = Arc::new(MemorySource::default());
    let counters = Arc::new(Counters::default());
    let spec = BundleSpec::new(1, "1.0", vec![Entry::job("resident", "here", &counters)]);
    let releases = spec.releases();
    source.put("resident", spec);
    let (loader, engine) = loader_over(&source);

    assert!(loader.start().await.unwrap());
    assert!(loader.is_running());

    loader.shutdown().await;

    assert!(!loader.is_running());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(loader.loaded_units().await.is_empty());
    assert!(engine.is_registered("resident"));
}

#[tokio::test]
async fn test_disabled_loader_does_not_start() {
    let source = Arc::new(MemorySource::default());
    let engine = ExecutionEngine::in_memory(fast_config());
    let mut config = loader_config();
    config.enabled = false;
    let loader = Arc::new(HotSwapLoader::new(config, source as Arc<dyn BundleSource>, engine));

    assert!(!loader.is_enabled());
    assert!(!loader.start().await.unwrap());
    assert!(!loader.is_running());
}

#[tokio::test]
async fn test_shutdown_without_start_is_safe() {
    let source = Arc::new(MemorySource::default());
    let (loader, _engine) = loader_over(&source);

    loader.shutdown().await;
    loader.shutdown().await;

    assert!(!loader.is_running());
}

#[tokio::test]
async fn test_manifest_directory_end_to_end() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("greetings.json"),
        r#"{
            "name": "greetings",
            "version": "3.1.0",
            "jobs": [
                { "name": "hello", "kind": "echo", "settings": { "message": "hello there" } },
                { "name": "mystery", "kind": "teleport" }
            ],
            "pipelines": [
                { "name": "greet-twice", "flow": "sequential", "jobs": ["hello", "hello"] }
            ]
        }"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a manifest").unwrap();

    let engine = ExecutionEngine::in_memory(fast_config());
    let source = ManifestDirectorySource::new(dir.path(), JobFactoryCatalog::with_builtin_kinds());
    let mut config = loader_config();
    config.jobs_directory = dir.path().to_path_buf();
    let loader = Arc::new(HotSwapLoader::new(config, Arc::new(source), engine.clone()));

    assert!(loader.start().await.unwrap());
    assert!(engine.is_registered("hello"));
    assert!(!engine.is_registered("mystery"));
    assert_eq!(run_message(&engine, "hello").await, "hello there");

    let outcome = PipelineOrchestrator::new(engine.clone())
        .execute_pipeline("greet-twice", "tester", TriggerType::Manual)
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.executed().count(), 2);

    let units = loader.loaded_units().await;
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].version.as_deref(), Some("3.1.0"));

    std::fs::remove_file(dir.path().join("greetings.json")).unwrap();
    let report = loader.scan().await;
    assert_eq!(report.jobs_unloaded, vec!["hello"]);
    assert!(!engine.is_registered("hello"));

    loader.shutdown().await;
}
