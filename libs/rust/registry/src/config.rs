use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::artifact::{FsArtifactStore, HttpArtifactStore};
use crate::error::{ArtifactError, RegistryError};
use crate::mlflow::MlflowRegistry;
use crate::store::ArtifactStore;

/// Resolved artifact backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocation {
    Filesystem(PathBuf),
    Http(String),
}

pub const DEFAULT_ARTIFACT_ROOT: &str = "artifacts";

/// Where the registry lives and how artifacts are resolved.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub tracking_uri: String,
    pub model_name: String,
    /// Local directory holding artifacts. Exclusive with `artifact_base_url`;
    /// with neither set, artifacts are read from `./artifacts`.
    pub artifact_root: Option<PathBuf>,
    pub artifact_base_url: Option<String>,
    pub client_timeout_ms: u64,
    /// MLflow experiment receiving event runs such as rollbacks.
    pub experiment_id: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tracking_uri: "http://127.0.0.1:5000".into(),
            model_name: "sales-forecaster".into(),
            artifact_root: None,
            artifact_base_url: None,
            client_timeout_ms: 10_000,
            experiment_id: "0".into(),
        }
    }
}

impl RegistryConfig {
    pub fn client_timeout(&self) -> Duration { Duration::from_millis(self.client_timeout_ms) }

    pub fn mlflow(&self) -> Result<MlflowRegistry, RegistryError> {
        Ok(MlflowRegistry::new(&self.tracking_uri, &self.model_name, self.client_timeout())?.with_experiment_id(&self.experiment_id))
    }

    pub fn artifact_location(&self) -> Result<ArtifactLocation, ArtifactError> {
        match (&self.artifact_root, &self.artifact_base_url) {
            (Some(_), Some(_)) => Err(ArtifactError::InvalidRef("artifact_root and artifact_base_url are both configured".into())),
            (Some(root), None) => Ok(ArtifactLocation::Filesystem(root.clone())),
            (None, Some(url)) => Ok(ArtifactLocation::Http(url.clone())),
            (None, None) => Ok(ArtifactLocation::Filesystem(PathBuf::from(DEFAULT_ARTIFACT_ROOT))),
        }
    }

    pub fn artifact_store(&self) -> Result<Arc<dyn ArtifactStore>, ArtifactError> {
        match self.artifact_location()? {
            ArtifactLocation::Filesystem(root) => Ok(Arc::new(FsArtifactStore::new(root))),
            ArtifactLocation::Http(url) => Ok(Arc::new(HttpArtifactStore::new(url, self.client_timeout())?)),
        }
    }
}
