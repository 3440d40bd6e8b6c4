use thiserror::Error;

use crate::model::{RunId, Stage, VersionId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    #[error("model version {0} not found")]
    VersionNotFound(VersionId),
    #[error("run {0} not found")]
    RunNotFound(RunId),
    #[error("production changed concurrently (expected {expected:?}, found {actual:?})")]
    RaceLost { expected: Option<VersionId>, actual: Option<VersionId> },
    #[error("invalid stage transition for version {version}: {from} -> {to}")]
    InvalidTransition { version: VersionId, from: Stage, to: Stage },
    #[error("registry backend error: {0}")]
    Backend(String),
}

impl RegistryError {
    /// Transient failures a caller may retry on its own schedule.
    pub fn is_transient(&self) -> bool { matches!(self, RegistryError::Unavailable(_)) }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArtifactError {
    #[error("artifact {0} not found")]
    NotFound(String),
    #[error("artifact store unavailable: {0}")]
    Unavailable(String),
    #[error("artifact {reference} digest mismatch (got sha256:{actual})")]
    DigestMismatch { reference: String, actual: String },
    #[error("artifact reference {0} is not valid for this store")]
    InvalidRef(String),
}
