//! JSON job manifests as bundles.
//!
//! A manifest is one `*.json` file in the jobs directory:
//!
//! ```json
//! {
//!   "name": "reports",
//!   "version": "2",
//!   "jobs": [
//!     { "name": "extract", "kind": "command", "timeout_ms": 60000,
//!       "settings": { "program": "/usr/local/bin/extract", "args": ["--full"] } },
//!     { "name": "notify", "kind": "echo", "settings": { "message": "extract done" } }
//!   ],
//!   "pipelines": [
//!     { "name": "nightly", "flow": "sequential", "jobs": ["extract", "notify"] }
//!   ]
//! }
//! ```
//!
//! The file's modification time is the bundle marker, so touching or rewriting a
//! manifest reloads it on the next scan.

use crate::loader::bundle::{Bundle, BundleId, BundleItem, BundleMarker, BundleSource, BundleStamp};
use crate::loader::JobFactoryCatalog;
use crate::models::{BranchTable, FlowStrategy, PipelineDescriptor};
use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const JOB_ENTRY_PREFIX: &str = "job:";
const PIPELINE_ENTRY_PREFIX: &str = "pipeline:";

/// One job declared in a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    /// Factory key in the [`JobFactoryCatalog`]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Kind-specific settings
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl JobSpec {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub flow: FlowStrategy,
    pub jobs: Vec<String>,
    #[serde(default)]
    pub branches: BranchTable,
}

impl PipelineSpec {
    pub fn to_descriptor(&self) -> PipelineDescriptor {
        PipelineDescriptor::new(&self.name, self.flow)
            .with_description(&self.description)
            .with_jobs(self.jobs.iter().cloned())
            .with_branches(self.branches.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BundleManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
    #[serde(default)]
    pub pipelines: Vec<PipelineSpec>,
}

/// A parsed manifest bound to the catalog that builds its jobs
pub struct ManifestBundle {
    id: BundleId,
    manifest: BundleManifest,
    catalog: JobFactoryCatalog,
}

impl ManifestBundle {
    pub fn new(id: BundleId, manifest: BundleManifest, catalog: JobFactoryCatalog) -> Self {
        Self {
            id,
            manifest,
            catalog,
        }
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }
}

impl Bundle for ManifestBundle {
    fn id(&self) -> &BundleId {
        &self.id
    }

    fn version(&self) -> Option<&str> {
        self.manifest.version.as_deref()
    }

    fn entries(&self) -> Vec<String> {
        let jobs = self
            .manifest
            .jobs
            .iter()
            .map(|job| format!("{JOB_ENTRY_PREFIX}{}", job.name));
        let pipelines = self
            .manifest
            .pipelines
            .iter()
            .map(|pipeline| format!("{PIPELINE_ENTRY_PREFIX}{}", pipeline.name));
        jobs.chain(pipelines).collect()
    }

    fn construct(&self, entry: &str) -> anyhow::Result<BundleItem> {
        if let Some(name) = entry.strip_prefix(JOB_ENTRY_PREFIX) {
            let spec = self
                .manifest
                .jobs
                .iter()
                .find(|job| job.name == name)
                .ok_or_else(|| anyhow!("manifest declares no job '{name}'"))?;
            return Ok(BundleItem::Job(self.catalog.create(spec)?));
        }
        if let Some(name) = entry.strip_prefix(PIPELINE_ENTRY_PREFIX) {
            let spec = self
                .manifest
                .pipelines
                .iter()
                .find(|pipeline| pipeline.name == name)
                .ok_or_else(|| anyhow!("manifest declares no pipeline '{name}'"))?;
            return Ok(BundleItem::Pipeline(spec.to_descriptor()));
        }
        Err(anyhow!("unrecognised bundle entry '{entry}'"))
    }
}

/// Directory of `*.json` manifests
pub struct ManifestDirectorySource {
    directory: PathBuf,
    catalog: JobFactoryCatalog,
}

impl ManifestDirectorySource {
    pub fn new(directory: impl Into<PathBuf>, catalog: JobFactoryCatalog) -> Self {
        Self {
            directory: directory.into(),
            catalog,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn is_manifest(path: &Path) -> bool {
        path.extension().and_then(|ext| ext.to_str()) == Some("json")
    }
}

#[async_trait]
impl BundleSource for ManifestDirectorySource {
    async fn prepare(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .with_context(|| format!("creating jobs directory {}", self.directory.display()))
    }

    async fn list_bundles(&self) -> anyhow::Result<Vec<BundleStamp>> {
        let mut reader = match tokio::fs::read_dir(&self.directory).await {
            Ok(reader) => reader,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(directory = %self.directory.display(), "Jobs directory does not exist");
                return Ok(Vec::new());
            }
            Err(error) => {
                return Err(error).with_context(|| {
                    format!("reading jobs directory {}", self.directory.display())
                })
            }
        };

        let mut stamps = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            if !Self::is_manifest(&path) {
                continue;
            }
            // Follows symlinks; one unreadable entry must not hide the others
            let modified = match tokio::fs::metadata(&path).await {
                Ok(metadata) if !metadata.is_file() => continue,
                Ok(metadata) => metadata.modified(),
                Err(error) => Err(error),
            };
            let modified = match modified {
                Ok(modified) => modified,
                Err(error) => {
                    warn!(manifest = %path.display(), error = %error, "Skipping unreadable manifest entry");
                    continue;
                }
            };
            stamps.push(BundleStamp::new(
                path.to_string_lossy(),
                BundleMarker::from_system_time(modified),
            ));
        }
        stamps.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(stamps)
    }

    async fn open_bundle(&self, stamp: &BundleStamp) -> anyhow::Result<Box<dyn Bundle>> {
        let raw = tokio::fs::read_to_string(stamp.id.as_str())
            .await
            .with_context(|| format!("reading manifest {}", stamp.id))?;
        let manifest: BundleManifest = serde_json::from_str(&raw)
            .with_context(|| format!("parsing manifest {}", stamp.id))?;
        Ok(Box::new(ManifestBundle::new(
            stamp.id.clone(),
            manifest,
            self.catalog.clone(),
        )))
    }
}
