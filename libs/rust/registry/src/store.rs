//! Interfaces of the three external collaborators: registry, artifact store, metrics store.

use async_trait::async_trait;

use crate::error::{ArtifactError, RegistryError};
use crate::model::{ArtifactRef, EventTags, MetricMap, ModelVersion, RunId, Stage, VersionId};

#[async_trait]
pub trait RegistryService: Send + Sync {
    /// Version currently labelled Production, if any.
    async fn production_version(&self) -> Result<Option<VersionId>, RegistryError>;

    async fn get_version(&self, version: VersionId) -> Result<ModelVersion, RegistryError>;

    async fn get_metrics(&self, version: VersionId) -> Result<MetricMap, RegistryError> {
        Ok(self.get_version(version).await?.metrics)
    }

    /// Register a completed run's artifact. The new version lands in Staging.
    async fn register(&self, run_id: &str, metrics: MetricMap, artifact_ref: ArtifactRef) -> Result<ModelVersion, RegistryError>;

    /// Compare-and-set relabel.
    ///
    /// Fails with `RaceLost` unless the current Production version equals
    /// `expected_production`. Promoting to Production archives the previous
    /// Production version in the same operation.
    async fn set_stage(&self, version: VersionId, stage: Stage, expected_production: Option<VersionId>) -> Result<(), RegistryError>;

    async fn list_versions(&self) -> Result<Vec<ModelVersion>, RegistryError>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn fetch(&self, artifact_ref: &ArtifactRef) -> Result<Vec<u8>, ArtifactError>;
}

/// Append-only metric records keyed by run.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Latest value of every metric logged for the run.
    async fn run_metrics(&self, run_id: &str) -> Result<MetricMap, RegistryError>;

    async fn log_metrics(&self, run_id: &str, metrics: &MetricMap) -> Result<(), RegistryError>;

    /// Record an operational event (rollback and the like) as its own tagged run.
    async fn record_event(&self, name: &str, tags: &EventTags) -> Result<RunId, RegistryError>;
}
