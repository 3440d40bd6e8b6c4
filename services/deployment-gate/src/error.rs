use modelops_registry::{RegistryError, RunId, VersionId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GateError {
    #[error("run {run_id} reported no metrics")]
    NoMetrics { run_id: RunId },
    #[error("run {run_id} is missing required metrics {missing:?}")]
    Validation { run_id: RunId, missing: Vec<String> },
    #[error("run {run_id} reported non-finite value for {metric}")]
    NonFiniteMetric { run_id: RunId, metric: String },
    #[error("version {candidate} lost the promotion race (expected production {expected:?}, found {actual:?})")]
    RaceLost { candidate: VersionId, expected: Option<VersionId>, actual: Option<VersionId> },
    #[error("version {0} is not in Staging")]
    NotStaged(VersionId),
    #[error("version {0} is already serving as Production")]
    AlreadyProduction(VersionId),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl GateError {
    /// Hard validation failures are never retried automatically.
    pub fn is_validation(&self) -> bool {
        matches!(self, GateError::NoMetrics { .. } | GateError::Validation { .. } | GateError::NonFiniteMetric { .. })
    }
}
