//! Process-local registry, artifact and metrics stores.
//!
//! Every relabel happens under one lock, so a promotion and the archive of the
//! previous Production version are a single step. `set_available(false)`
//! simulates an outage of the backing service.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::error::{ArtifactError, RegistryError};
use crate::model::{ArtifactRef, EventTags, MetricMap, ModelVersion, RunId, Stage, VersionId};
use crate::store::{ArtifactStore, MetricsStore, RegistryService};

#[derive(Debug, Default)]
struct Inner {
    versions: BTreeMap<VersionId, ModelVersion>,
    next_version: VersionId,
}

impl Inner {
    fn production(&self) -> Option<VersionId> {
        self.versions.values().find(|v| v.stage == Stage::Production).map(|v| v.version)
    }
}

#[derive(Debug)]
pub struct InMemoryRegistry {
    inner: Mutex<Inner>,
    available: AtomicBool,
}

impl Default for InMemoryRegistry {
    fn default() -> Self { Self::new() }
}

impl InMemoryRegistry {
    pub fn new() -> Self { Self { inner: Mutex::new(Inner { versions: BTreeMap::new(), next_version: 1 }), available: AtomicBool::new(true) } }

    pub fn set_available(&self, available: bool) { self.available.store(available, Ordering::SeqCst); }

    fn check(&self) -> Result<(), RegistryError> {
        if self.available.load(Ordering::SeqCst) { Ok(()) } else { Err(RegistryError::Unavailable("in-memory registry offline".into())) }
    }

    /// Number of versions currently labelled Production.
    pub fn production_count(&self) -> usize {
        self.inner.lock().versions.values().filter(|v| v.stage == Stage::Production).count()
    }
}

#[async_trait]
impl RegistryService for InMemoryRegistry {
    async fn production_version(&self) -> Result<Option<VersionId>, RegistryError> {
        self.check()?;
        Ok(self.inner.lock().production())
    }

    async fn get_version(&self, version: VersionId) -> Result<ModelVersion, RegistryError> {
        self.check()?;
        self.inner.lock().versions.get(&version).cloned().ok_or(RegistryError::VersionNotFound(version))
    }

    async fn register(&self, run_id: &str, metrics: MetricMap, artifact_ref: ArtifactRef) -> Result<ModelVersion, RegistryError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let version = inner.next_version;
        inner.next_version += 1;
        let mv = ModelVersion { version, stage: Stage::Staging, source_run_id: run_id.to_string(), metrics, artifact_ref, created_at: Utc::now() };
        inner.versions.insert(version, mv.clone());
        debug!(version, run_id, "registered model version");
        Ok(mv)
    }

    async fn set_stage(&self, version: VersionId, stage: Stage, expected_production: Option<VersionId>) -> Result<(), RegistryError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let actual = inner.production();
        if actual != expected_production {
            return Err(RegistryError::RaceLost { expected: expected_production, actual });
        }
        let from = inner.versions.get(&version).map(|v| v.stage).ok_or(RegistryError::VersionNotFound(version))?;
        if !from.can_transition_to(stage) {
            return Err(RegistryError::InvalidTransition { version, from, to: stage });
        }
        if stage == Stage::Production {
            if let Some(prev) = actual.and_then(|p| inner.versions.get_mut(&p)) { prev.stage = Stage::Archived; }
        }
        if let Some(target) = inner.versions.get_mut(&version) { target.stage = stage; }
        debug!(version, %from, to=%stage, "stage updated");
        Ok(())
    }

    async fn list_versions(&self) -> Result<Vec<ModelVersion>, RegistryError> {
        self.check()?;
        Ok(self.inner.lock().versions.values().cloned().collect())
    }
}

#[derive(Debug)]
pub struct InMemoryArtifactStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    available: AtomicBool,
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self { Self { blobs: Mutex::new(HashMap::new()), available: AtomicBool::new(true) } }
}

impl InMemoryArtifactStore {
    pub fn new() -> Self { Self::default() }

    pub fn set_available(&self, available: bool) { self.available.store(available, Ordering::SeqCst); }

    pub fn insert(&self, artifact_ref: &ArtifactRef, bytes: Vec<u8>) { self.blobs.lock().insert(artifact_ref.0.clone(), bytes); }

    /// Store under its content digest and return the reference.
    pub fn put(&self, bytes: Vec<u8>) -> ArtifactRef {
        let r = crate::artifact::digest_ref(&bytes);
        self.insert(&r, bytes);
        r
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn fetch(&self, artifact_ref: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
        if !self.available.load(Ordering::SeqCst) { return Err(ArtifactError::Unavailable("in-memory artifact store offline".into())); }
        let bytes = self.blobs.lock().get(artifact_ref.as_str()).cloned().ok_or_else(|| ArtifactError::NotFound(artifact_ref.0.clone()))?;
        crate::artifact::verify_digest(artifact_ref, &bytes)?;
        Ok(bytes)
    }
}

/// An event run: id, name and tags.
pub type EventRecord = (RunId, String, EventTags);

#[derive(Debug, Default)]
pub struct InMemoryMetricsStore {
    runs: Mutex<HashMap<RunId, Vec<(String, f64)>>>,
    events: Mutex<Vec<EventRecord>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self { Self::default() }

    /// Open a run with a fresh id and log its metrics.
    pub fn record_run(&self, metrics: &MetricMap) -> RunId {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        self.runs.lock().insert(run_id.clone(), metrics.iter().map(|(k, v)| (k.clone(), *v)).collect());
        run_id
    }

    pub fn events(&self) -> Vec<EventRecord> { self.events.lock().clone() }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn run_metrics(&self, run_id: &str) -> Result<MetricMap, RegistryError> {
        let runs = self.runs.lock();
        let records = runs.get(run_id).ok_or_else(|| RegistryError::RunNotFound(run_id.to_string()))?;
        // later records win, matching "latest value" semantics
        Ok(records.iter().cloned().collect())
    }

    async fn log_metrics(&self, run_id: &str, metrics: &MetricMap) -> Result<(), RegistryError> {
        self.runs.lock().entry(run_id.to_string()).or_default().extend(metrics.iter().map(|(k, v)| (k.clone(), *v)));
        Ok(())
    }

    async fn record_event(&self, name: &str, tags: &EventTags) -> Result<RunId, RegistryError> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        self.events.lock().push((run_id.clone(), name.to_string(), tags.clone()));
        Ok(run_id)
    }
}
