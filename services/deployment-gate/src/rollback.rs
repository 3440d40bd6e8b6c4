//! Operator rollback to an earlier version.
//!
//! Archived is terminal, so the earlier artifact is re-registered as a fresh
//! version and promoted through the same compare-and-set as the gate. Serving
//! processes see a new Production version id and reconcile onto it. The
//! rollback is then recorded as a tagged event run in the tracking store.

use chrono::Utc;
use modelops_registry::{EventTags, MetricsStore, ModelVersion, RegistryError, RegistryService, RunId, Stage, VersionId};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::GateError;
use crate::metrics::record_outcome;

#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    pub previous_production: Option<VersionId>,
    pub restored_from: VersionId,
    pub new_version: ModelVersion,
    /// Event run recording the rollback; `None` when the tracking store refused it.
    pub event_run: Option<RunId>,
}

fn rollback_tags(from: Option<VersionId>, restored_from: VersionId, new_version: VersionId) -> EventTags {
    EventTags::from([
        ("event_type".to_string(), "rollback".to_string()),
        ("from_version".to_string(), from.map(|v| v.to_string()).unwrap_or_else(|| "None".into())),
        ("to_version".to_string(), restored_from.to_string()),
        ("new_version".to_string(), new_version.to_string()),
        ("timestamp".to_string(), Utc::now().to_rfc3339()),
        ("initiated_by".to_string(), "manual".to_string()),
    ])
}

#[instrument(skip(registry, journal))]
pub async fn rollback_to(registry: &dyn RegistryService, journal: &dyn MetricsStore, target: VersionId) -> Result<RollbackOutcome, GateError> {
    let current = registry.production_version().await?;
    if current == Some(target) {
        return Err(GateError::AlreadyProduction(target));
    }
    let source = registry.get_version(target).await?;
    let restored = registry.register(&source.source_run_id, source.metrics.clone(), source.artifact_ref.clone()).await?;
    match registry.set_stage(restored.version, Stage::Production, current).await {
        Ok(()) => {}
        Err(RegistryError::RaceLost { expected, actual }) => {
            record_outcome("race_lost");
            return Err(GateError::RaceLost { candidate: restored.version, expected, actual });
        }
        Err(e) => return Err(e.into()),
    }
    record_outcome("rollback");
    info!(from = ?current, restored_from = target, new_version = restored.version, "rollback promoted");

    // the promotion already happened; a journal failure only loses the history entry
    let name = format!("rollback-{}", Utc::now().timestamp());
    let event_run = match journal.record_event(&name, &rollback_tags(current, target, restored.version)).await {
        Ok(run) => Some(run),
        Err(e) => {
            warn!(error = %e, "could not record rollback in tracking store");
            None
        }
    };
    let new_version = registry.get_version(restored.version).await?;
    Ok(RollbackOutcome { previous_production: current, restored_from: target, new_version, event_run })
}
