//! Startup loader: one bounded registry attempt, then the local artifact.

use modelops_registry::{ArtifactStore, RegistryService};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ServingConfig;
use crate::model::{LoadError, LoadedModel};
use crate::reconcile::{load_version, TickError};
use crate::state::{ActiveModel, ServingSnapshot, ServingState};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("local fallback artifact {path} unusable: {source}")]
    Fallback { path: PathBuf, #[source] source: LoadError },
}

async fn from_registry(registry: &dyn RegistryService, artifacts: &dyn ArtifactStore, request_timeout: Duration) -> Result<Option<ServingSnapshot>, TickError> {
    let Some(version) = registry.production_version().await? else { return Ok(None) };
    let mv = registry.get_version(version).await?;
    load_version(artifacts, mv, request_timeout).await.map(Some)
}

pub async fn load_local(path: &Path) -> Result<ServingSnapshot, BootstrapError> {
    let fail = |source| BootstrapError::Fallback { path: path.to_path_buf(), source };
    let bytes = tokio::fs::read(path).await.map_err(|e| fail(LoadError::Io(e.to_string())))?;
    let model = LoadedModel::from_bytes(&bytes).map_err(fail)?;
    let metrics = model.metrics().clone();
    Ok(ServingSnapshot::new(ActiveModel::LocalFallback { path: path.display().to_string(), metrics }, model))
}

/// Build the initial serving state. Never waits on the registry longer than `startup_timeout`.
pub async fn bootstrap(registry: &dyn RegistryService, artifacts: &dyn ArtifactStore, cfg: &ServingConfig) -> Result<ServingState, BootstrapError> {
    let limit = cfg.startup_timeout();
    match tokio::time::timeout(limit, from_registry(registry, artifacts, cfg.request_timeout())).await {
        Ok(Ok(Some(snapshot))) => {
            info!(version = ?snapshot.active.version(), model = snapshot.model.name(), "serving Production model from registry");
            return Ok(ServingState::new(snapshot));
        }
        Ok(Ok(None)) => info!("no Production version registered; using local fallback"),
        Ok(Err(e)) => warn!(error = %e, "registry bootstrap failed; using local fallback"),
        Err(_) => warn!(timeout = ?limit, "registry bootstrap timed out; using local fallback"),
    }
    let snapshot = load_local(&cfg.fallback_artifact_path).await?;
    info!(path = %cfg.fallback_artifact_path.display(), model = snapshot.model.name(), "serving local fallback model");
    Ok(ServingState::new(snapshot))
}
