//! Bundle source abstraction and the isolation scope of an opened bundle.

use crate::models::{Job, PipelineDescriptor};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Stable identity of a bundle within its source (a path, an archive name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleId(String);

impl BundleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic modification marker; a larger value means a newer bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleMarker(u128);

impl BundleMarker {
    pub fn new(value: u128) -> Self {
        Self(value)
    }

    /// Nanoseconds since the epoch; times before the epoch collapse to zero
    pub fn from_system_time(time: SystemTime) -> Self {
        Self(
            time.duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_nanos())
                .unwrap_or(0),
        )
    }

    pub fn value(&self) -> u128 {
        self.0
    }
}

/// A bundle as currently listed by its source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleStamp {
    pub id: BundleId,
    pub marker: BundleMarker,
}

impl BundleStamp {
    pub fn new(id: impl Into<String>, marker: BundleMarker) -> Self {
        Self {
            id: BundleId::new(id),
            marker,
        }
    }
}

/// Something a bundle entry constructs
pub enum BundleItem {
    Job(Arc<dyn Job>),
    Pipeline(PipelineDescriptor),
}

impl fmt::Debug for BundleItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job(job) => f.debug_tuple("Job").field(&job.name()).finish(),
            Self::Pipeline(descriptor) => f.debug_tuple("Pipeline").field(&descriptor.name()).finish(),
        }
    }
}

/// Where bundles come from
#[async_trait]
pub trait BundleSource: Send + Sync {
    /// Called once before the first scan
    async fn prepare(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Every bundle currently present, with its modification marker
    async fn list_bundles(&self) -> anyhow::Result<Vec<BundleStamp>>;

    /// Open one bundle for enumeration and construction
    async fn open_bundle(&self, stamp: &BundleStamp) -> anyhow::Result<Box<dyn Bundle>>;
}

/// An opened bundle
pub trait Bundle: Send + Sync {
    fn id(&self) -> &BundleId;

    fn version(&self) -> Option<&str> {
        None
    }

    /// Names of the constructible entries, in a stable order
    fn entries(&self) -> Vec<String>;

    fn construct(&self, entry: &str) -> anyhow::Result<BundleItem>;

    /// Release whatever the bundle holds open. Called exactly once.
    fn release(&self) {}
}

/// Owns an opened bundle for as long as any loaded unit refers to it.
///
/// Shared through `Arc` by every unit built from the bundle; the bundle is
/// released when the last reference is dropped, or earlier through
/// [`IsolationScope::release`]. Release happens at most once.
pub struct IsolationScope {
    bundle: Box<dyn Bundle>,
    marker: BundleMarker,
    released: AtomicBool,
}

impl IsolationScope {
    pub fn new(bundle: Box<dyn Bundle>, marker: BundleMarker) -> Self {
        Self {
            bundle,
            marker,
            released: AtomicBool::new(false),
        }
    }

    pub fn bundle(&self) -> &dyn Bundle {
        self.bundle.as_ref()
    }

    pub fn bundle_id(&self) -> &BundleId {
        self.bundle.id()
    }

    pub fn marker(&self) -> BundleMarker {
        self.marker
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(bundle = %self.bundle.id(), "Releasing isolation scope");
        self.bundle.release();
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for IsolationScope {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for IsolationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationScope")
            .field("bundle", self.bundle.id())
            .field("marker", &self.marker)
            .field("released", &self.is_released())
            .finish()
    }
}
