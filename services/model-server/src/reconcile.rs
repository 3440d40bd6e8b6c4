//! Reconciliation loop: discover the Production version, load it, swap it in.
//!
//! Every failure is caught at the tick boundary. The current snapshot keeps
//! serving, the failure counter goes up and the next tick retries at the same
//! fixed interval.

use chrono::Utc;
use modelops_registry::{ArtifactStore, ModelVersion, RegistryError, RegistryService, VersionId};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::metrics;
use crate::model::{LoadError, LoadedModel};
use crate::state::{ActiveModel, ServingSnapshot, ServingState};

#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("{step} timed out after {after:?}")]
    Timeout { step: &'static str, after: Duration },
    #[error("artifact for version {version} failed to load: {source}")]
    ArtifactLoad { version: VersionId, #[source] source: LoadError },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Unchanged,
    Swapped { from: Option<VersionId>, to: VersionId },
    Failed { error: String, consecutive_failures: u64 },
}

async fn within<T, F>(step: &'static str, after: Duration, fut: F) -> Result<T, TickError>
where
    F: Future<Output = Result<T, TickError>>,
{
    tokio::time::timeout(after, fut).await.map_err(|_| TickError::Timeout { step, after })?
}

/// Fetch, decode and validate a version's artifact into a ready-to-publish snapshot.
pub(crate) async fn load_version(artifacts: &dyn ArtifactStore, mv: ModelVersion, timeout: Duration) -> Result<ServingSnapshot, TickError> {
    let version = mv.version;
    let bytes = within("artifact fetch", timeout, async {
        artifacts.fetch(&mv.artifact_ref).await.map_err(|e| TickError::ArtifactLoad { version, source: e.into() })
    })
    .await?;
    let model = LoadedModel::from_bytes(&bytes).map_err(|source| TickError::ArtifactLoad { version, source })?;
    debug!(version, digest = model.digest(), "artifact loaded");
    Ok(ServingSnapshot::new(ActiveModel::Registry { model_version: mv }, model))
}

pub struct Reconciler {
    registry: Arc<dyn RegistryService>,
    artifacts: Arc<dyn ArtifactStore>,
    state: Arc<ServingState>,
    request_timeout: Duration,
    // one tick at a time, whoever triggers it
    serial: Mutex<()>,
}

impl Reconciler {
    pub fn new(registry: Arc<dyn RegistryService>, artifacts: Arc<dyn ArtifactStore>, state: Arc<ServingState>, request_timeout: Duration) -> Self {
        Self { registry, artifacts, state, request_timeout, serial: Mutex::new(()) }
    }

    pub fn state(&self) -> &Arc<ServingState> { &self.state }

    /// One discover-compare-load-swap pass. Never returns an error to the caller.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> TickOutcome {
        let _serial = self.serial.lock().await;
        self.state.record_check(Utc::now());
        match self.try_tick().await {
            Ok(None) => {
                self.state.record_success();
                metrics::record_tick("unchanged");
                TickOutcome::Unchanged
            }
            Ok(Some((from, to))) => {
                self.state.record_success();
                metrics::record_tick("swapped");
                info!(?from, to, "serving model swapped");
                TickOutcome::Swapped { from, to }
            }
            Err(e) => {
                let error = e.to_string();
                let consecutive_failures = self.state.record_failure(error.clone());
                metrics::record_tick("failed");
                warn!(error = %error, consecutive_failures, "reconcile tick failed; keeping current model");
                TickOutcome::Failed { error, consecutive_failures }
            }
        }
    }

    async fn try_tick(&self) -> Result<Option<(Option<VersionId>, VersionId)>, TickError> {
        let active = self.state.current().active.version();
        let production = within("registry query", self.request_timeout, async {
            self.registry.production_version().await.map_err(TickError::from)
        })
        .await?;
        let Some(target) = production else {
            debug!(?active, "registry reports no Production version; keeping current model");
            return Ok(None);
        };
        if active == Some(target) {
            return Ok(None);
        }
        let mv = within("version lookup", self.request_timeout, async {
            self.registry.get_version(target).await.map_err(TickError::from)
        })
        .await?;
        let snapshot = load_version(self.artifacts.as_ref(), mv, self.request_timeout).await?;
        self.state.publish(snapshot);
        Ok(Some((active, target)))
    }

    /// Run ticks on a fixed interval until shut down.
    ///
    /// The first timer tick is skipped: bootstrap has just loaded a model.
    /// With `auto_reload` off only forced reconciles run.
    pub fn spawn(self: Arc<Self>, poll_interval: Duration, auto_reload: bool) -> ReconcileHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (force_tx, mut force_rx) = mpsc::channel::<oneshot::Sender<TickOutcome>>(8);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            info!(?poll_interval, auto_reload, "reconciliation loop started");
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    Some(reply) = force_rx.recv() => {
                        let outcome = self.tick().await;
                        let _ = reply.send(outcome);
                    }
                    _ = ticker.tick(), if auto_reload => {
                        self.tick().await;
                    }
                }
            }
            info!("reconciliation loop stopped");
        });
        ReconcileHandle { shutdown: shutdown_tx, trigger: ReconcileTrigger { tx: force_tx }, join }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TriggerError {
    #[error("reconciliation loop is not running")]
    Stopped,
}

/// Operator-initiated reconcile outside the timer cadence.
#[derive(Clone)]
pub struct ReconcileTrigger {
    tx: mpsc::Sender<oneshot::Sender<TickOutcome>>,
}

impl ReconcileTrigger {
    pub async fn force_reconcile(&self) -> Result<TickOutcome, TriggerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(reply_tx).await.map_err(|_| TriggerError::Stopped)?;
        reply_rx.await.map_err(|_| TriggerError::Stopped)
    }
}

pub struct ReconcileHandle {
    shutdown: watch::Sender<bool>,
    trigger: ReconcileTrigger,
    join: JoinHandle<()>,
}

impl ReconcileHandle {
    pub fn trigger(&self) -> ReconcileTrigger { self.trigger.clone() }

    /// Signal the loop and wait for the in-flight tick, if any, to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!(error=?e, "reconciliation task ended abnormally");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::tests::sales_artifact;
    use crate::state::tests::registry_snapshot;
    use async_trait::async_trait;
    use modelops_registry::{ArtifactError, ArtifactRef, InMemoryArtifactStore, InMemoryRegistry, MetricMap, Stage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        inner: InMemoryArtifactStore,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactStore for CountingStore {
        async fn fetch(&self, r: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(r).await
        }
    }

    pub(crate) struct HangingRegistry;

    #[async_trait]
    impl RegistryService for HangingRegistry {
        async fn production_version(&self) -> Result<Option<VersionId>, RegistryError> {
            std::future::pending().await
        }
        async fn get_version(&self, v: VersionId) -> Result<ModelVersion, RegistryError> { Err(RegistryError::VersionNotFound(v)) }
        async fn register(&self, _: &str, _: MetricMap, _: ArtifactRef) -> Result<ModelVersion, RegistryError> {
            Err(RegistryError::Unavailable("read only".into()))
        }
        async fn set_stage(&self, _: VersionId, _: Stage, _: Option<VersionId>) -> Result<(), RegistryError> {
            Err(RegistryError::Unavailable("read only".into()))
        }
        async fn list_versions(&self) -> Result<Vec<ModelVersion>, RegistryError> { Ok(Vec::new()) }
    }

    struct Fixture {
        registry: Arc<InMemoryRegistry>,
        store: Arc<CountingStore>,
        reconciler: Arc<Reconciler>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(InMemoryRegistry::new());
            let store = Arc::new(CountingStore { inner: InMemoryArtifactStore::new(), fetches: AtomicUsize::new(0) });
            let state = Arc::new(ServingState::new(registry_snapshot(0)));
            let reconciler = Arc::new(Reconciler::new(registry.clone(), store.clone(), state, Duration::from_secs(1)));
            Self { registry, store, reconciler }
        }

        async fn promote(&self, name: &str, intercept: f64) -> VersionId {
            let bytes = serde_json::to_vec(&sales_artifact(name, intercept)).unwrap();
            let artifact_ref = self.store.inner.put(bytes);
            let mv = self.registry.register("run", MetricMap::from([("mae".to_string(), intercept)]), artifact_ref).await.unwrap();
            let current = self.registry.production_version().await.unwrap();
            self.registry.set_stage(mv.version, Stage::Production, current).await.unwrap();
            mv.version
        }

        fn fetches(&self) -> usize { self.store.fetches.load(Ordering::SeqCst) }
    }

    #[tokio::test]
    async fn new_production_version_is_swapped_in() {
        let f = Fixture::new();
        let v = f.promote("m1", 1.0).await;
        assert_eq!(f.reconciler.tick().await, TickOutcome::Swapped { from: Some(0), to: v });
        let snap = f.reconciler.state().current();
        assert_eq!(snap.active.version(), Some(v));
        assert_eq!(snap.model.name(), "m1");
    }

    #[tokio::test]
    async fn repeated_ticks_without_registry_change_are_noops() {
        let f = Fixture::new();
        f.promote("m1", 1.0).await;
        f.reconciler.tick().await;
        let snap = f.reconciler.state().current();
        let fetches = f.fetches();

        assert_eq!(f.reconciler.tick().await, TickOutcome::Unchanged);
        assert_eq!(f.reconciler.tick().await, TickOutcome::Unchanged);
        assert!(Arc::ptr_eq(&snap, &f.reconciler.state().current()));
        assert_eq!(f.fetches(), fetches);
        assert_eq!(f.reconciler.state().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_old_model_and_counts_once() {
        let f = Fixture::new();
        let v1 = f.promote("m1", 1.0).await;
        f.reconciler.tick().await;
        let v2 = f.promote("m2", 2.0).await;

        f.store.inner.set_available(false);
        let out = f.reconciler.tick().await;
        assert!(matches!(out, TickOutcome::Failed { consecutive_failures: 1, .. }));
        assert_eq!(f.reconciler.state().current().active.version(), Some(v1));
        assert_eq!(f.reconciler.state().consecutive_failures(), 1);

        f.store.inner.set_available(true);
        assert_eq!(f.reconciler.tick().await, TickOutcome::Swapped { from: Some(v1), to: v2 });
        assert_eq!(f.reconciler.state().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn registry_outage_and_bad_artifact_are_tick_failures() {
        let f = Fixture::new();
        f.registry.set_available(false);
        assert!(matches!(f.reconciler.tick().await, TickOutcome::Failed { consecutive_failures: 1, .. }));

        f.registry.set_available(true);
        let bad = ArtifactRef::new("garbage");
        f.store.inner.insert(&bad, b"{not a model".to_vec());
        let mv = f.registry.register("run", MetricMap::from([("mae".to_string(), 1.0)]), bad).await.unwrap();
        f.registry.set_stage(mv.version, Stage::Production, None).await.unwrap();
        let out = f.reconciler.tick().await;
        assert!(matches!(out, TickOutcome::Failed { consecutive_failures: 2, .. }));
        assert_eq!(f.reconciler.state().current().active.version(), Some(0));
    }

    #[tokio::test]
    async fn no_production_keeps_serving_current_model() {
        let f = Fixture::new();
        assert_eq!(f.reconciler.tick().await, TickOutcome::Unchanged);
        assert_eq!(f.reconciler.state().current().active.version(), Some(0));
        assert_eq!(f.fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_registry_times_out_as_failed_tick() {
        let state = Arc::new(ServingState::new(registry_snapshot(7)));
        let r = Reconciler::new(Arc::new(HangingRegistry), Arc::new(InMemoryArtifactStore::new()), state.clone(), Duration::from_millis(500));
        let out = r.tick().await;
        assert!(matches!(out, TickOutcome::Failed { ref error, consecutive_failures: 1 } if error.contains("timed out")));
        assert_eq!(state.current().active.version(), Some(7));
        assert!(state.last_check_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_drives_reconciliation() {
        let f = Fixture::new();
        let handle = f.reconciler.clone().spawn(Duration::from_secs(30), true);
        let v = f.promote("m1", 1.0).await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(f.reconciler.state().current().active.version(), Some(v));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn force_reconcile_works_without_auto_reload() {
        let f = Fixture::new();
        let handle = f.reconciler.clone().spawn(Duration::from_secs(30), false);
        let v = f.promote("m1", 1.0).await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(f.reconciler.state().current().active.version(), Some(0));

        let trigger = handle.trigger();
        assert_eq!(trigger.force_reconcile().await.unwrap(), TickOutcome::Swapped { from: Some(0), to: v });
        handle.shutdown().await;
        assert_eq!(trigger.force_reconcile().await.unwrap_err(), TriggerError::Stopped);
    }
}
