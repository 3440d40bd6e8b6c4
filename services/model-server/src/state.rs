//! Serving state: the snapshot every prediction reads, swapped as one pointer.
//!
//! Readers call [`ServingState::current`] and never take a lock. The
//! reconciliation loop is the only writer; it builds a complete
//! [`ServingSnapshot`] off to the side and publishes it with a single
//! `ArcSwap::swap`, so a reader sees either the old snapshot or the new one.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use modelops_registry::{MetricMap, ModelVersion, Stage, VersionId};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::metrics;
use crate::model::{Features, LoadedModel, PredictError, Prediction};

/// What the process is answering with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ActiveModel {
    Registry { model_version: ModelVersion },
    /// Bootstrap artifact loaded from disk; carries its embedded metrics, if any.
    LocalFallback { path: String, metrics: MetricMap },
}

impl ActiveModel {
    pub fn version(&self) -> Option<VersionId> {
        match self {
            ActiveModel::Registry { model_version } => Some(model_version.version),
            ActiveModel::LocalFallback { .. } => None,
        }
    }

    /// Stage at load time.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ActiveModel::Registry { model_version } => Some(model_version.stage),
            ActiveModel::LocalFallback { .. } => None,
        }
    }

    pub fn metrics(&self) -> &MetricMap {
        match self {
            ActiveModel::Registry { model_version } => &model_version.metrics,
            ActiveModel::LocalFallback { metrics, .. } => metrics,
        }
    }

    pub fn is_fallback(&self) -> bool { matches!(self, ActiveModel::LocalFallback { .. }) }
}

/// Immutable once built.
#[derive(Debug)]
pub struct ServingSnapshot {
    pub active: ActiveModel,
    pub model: Arc<LoadedModel>,
    pub loaded_at: DateTime<Utc>,
}

impl ServingSnapshot {
    pub fn new(active: ActiveModel, model: LoadedModel) -> Self {
        Self { active, model: Arc::new(model), loaded_at: Utc::now() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServedPrediction {
    pub prediction: f64,
    pub confidence: f64,
    pub model_version: Option<VersionId>,
    pub model_name: String,
}

/// Shape of `current()` for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: Option<VersionId>,
    /// Stage recorded when the version was loaded; the registry may have archived it since.
    pub loaded_stage: Option<Stage>,
    pub metrics: MetricMap,
    pub loaded_at: DateTime<Utc>,
    pub active: ActiveModel,
    pub model_name: String,
    pub artifact_digest: String,
    pub last_check_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u64,
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub struct ServingState {
    snapshot: ArcSwap<ServingSnapshot>,
    consecutive_failures: AtomicU64,
    last_check_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl ServingState {
    pub fn new(initial: ServingSnapshot) -> Self {
        metrics::set_active_version(initial.active.version());
        Self {
            snapshot: ArcSwap::from_pointee(initial),
            consecutive_failures: AtomicU64::new(0),
            last_check_at: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Arc<ServingSnapshot> { self.snapshot.load_full() }

    /// Replace the active snapshot; returns the one it displaced.
    pub(crate) fn publish(&self, next: ServingSnapshot) -> Arc<ServingSnapshot> {
        let version = next.active.version();
        let previous = self.snapshot.swap(Arc::new(next));
        metrics::set_active_version(version);
        metrics::record_swap();
        previous
    }

    pub(crate) fn record_check(&self, at: DateTime<Utc>) { *self.last_check_at.lock() = Some(at); }

    pub(crate) fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.last_error.lock() = None;
        metrics::set_consecutive_failures(0);
    }

    pub(crate) fn record_failure(&self, error: String) -> u64 {
        let n = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_error.lock() = Some(error);
        metrics::set_consecutive_failures(n);
        n
    }

    pub fn consecutive_failures(&self) -> u64 { self.consecutive_failures.load(Ordering::SeqCst) }

    pub fn last_check_at(&self) -> Option<DateTime<Utc>> { *self.last_check_at.lock() }

    /// Prediction path: one snapshot load per request.
    pub fn predict(&self, input: &Features) -> Result<ServedPrediction, PredictError> {
        let snap = self.current();
        let Prediction { value, confidence } = snap.model.predict(input)?;
        Ok(ServedPrediction { prediction: value, confidence, model_version: snap.active.version(), model_name: snap.model.name().to_string() })
    }

    pub fn status(&self) -> StatusReport {
        let snap = self.current();
        StatusReport {
            version: snap.active.version(),
            loaded_stage: snap.active.stage(),
            metrics: snap.active.metrics().clone(),
            loaded_at: snap.loaded_at,
            active: snap.active.clone(),
            model_name: snap.model.name().to_string(),
            artifact_digest: snap.model.digest().to_string(),
            last_check_at: self.last_check_at(),
            consecutive_failures: self.consecutive_failures(),
            last_error: self.last_error.lock().clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::tests::sales_artifact;
    use modelops_registry::ArtifactRef;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    pub(crate) fn registry_snapshot(version: VersionId) -> ServingSnapshot {
        let mv = ModelVersion {
            version,
            stage: Stage::Production,
            source_run_id: format!("run-{version}"),
            metrics: MetricMap::from([("mae".to_string(), version as f64)]),
            artifact_ref: ArtifactRef::new(format!("a{version}")),
            created_at: Utc::now(),
        };
        let model = LoadedModel::from_artifact(sales_artifact(&format!("m{version}"), version as f64)).unwrap();
        ServingSnapshot::new(ActiveModel::Registry { model_version: mv }, model)
    }

    #[test]
    fn publish_replaces_whole_snapshot() {
        let state = ServingState::new(registry_snapshot(1));
        let before = state.current();
        let displaced = state.publish(registry_snapshot(2));
        assert!(Arc::ptr_eq(&before, &displaced));
        let after = state.current();
        assert_eq!(after.active.version(), Some(2));
        assert_eq!(after.model.name(), "m2");
        // a reader holding the old snapshot keeps a consistent view
        assert_eq!(before.active.version(), Some(1));
        assert_eq!(before.model.name(), "m1");
    }

    #[test]
    fn concurrent_readers_never_see_torn_snapshots() {
        let state = Arc::new(ServingState::new(registry_snapshot(1)));
        let done = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut reads = 0u64;
                    while !done.load(Ordering::Relaxed) || reads == 0 {
                        let snap = state.current();
                        let v = snap.active.version().unwrap();
                        assert_eq!(snap.model.intercept(), v as f64);
                        assert_eq!(snap.model.name(), format!("m{v}"));
                        assert_eq!(snap.active.metrics().get("mae"), Some(&(v as f64)));
                        reads += 1;
                    }
                    reads
                })
            })
            .collect();
        for v in 2..=200 {
            state.publish(registry_snapshot(v));
        }
        done.store(true, Ordering::Relaxed);
        for r in readers {
            assert!(r.join().unwrap() > 0);
        }
        assert_eq!(state.current().active.version(), Some(200));
    }

    #[test]
    fn failure_bookkeeping_is_separate_from_snapshot() {
        let state = ServingState::new(registry_snapshot(3));
        let snap = state.current();
        assert_eq!(state.record_failure("boom".into()), 1);
        assert_eq!(state.record_failure("boom".into()), 2);
        assert!(Arc::ptr_eq(&snap, &state.current()));
        assert_eq!(state.status().last_error.as_deref(), Some("boom"));
        state.record_success();
        assert_eq!(state.consecutive_failures(), 0);
        assert!(state.status().last_error.is_none());
    }

    #[test]
    fn status_reports_fallback_without_version() {
        let model = LoadedModel::from_artifact(sales_artifact("local", 0.0)).unwrap();
        let metrics = model.metrics().clone();
        let state = ServingState::new(ServingSnapshot::new(ActiveModel::LocalFallback { path: "model.json".into(), metrics }, model));
        let s = state.status();
        assert_eq!(s.version, None);
        assert!(s.active.is_fallback());
        assert_eq!(s.metrics.get("test_mae"), Some(&8.2));
        assert_eq!(s.loaded_stage, None);
    }

    #[test]
    fn status_stage_is_the_stage_at_load_time() {
        let state = ServingState::new(registry_snapshot(4));
        assert_eq!(state.status().loaded_stage, Some(Stage::Production));
        let json = serde_json::to_value(state.status()).unwrap();
        assert_eq!(json["loaded_stage"], "Production");
        assert!(json.get("stage").is_none());
        assert!(format!("{state:?}").contains("ServingState"));
    }
}
