//! Deployment gate: register a finished run, compare it with Production and promote on approval.

use modelops_registry::{ArtifactRef, MetricsStore, ModelVersion, RegistryError, RegistryService, Stage, VersionId};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::GateConfig;
use crate::decision::{decide, validate_candidate, EvaluationReport};
use crate::error::GateError;
use crate::metrics::record_outcome;

#[derive(Debug, Clone, Serialize)]
pub struct GateOutcome {
    pub report: EvaluationReport,
    pub promoted: bool,
}

pub struct DeploymentGate {
    registry: Arc<dyn RegistryService>,
    metrics: Arc<dyn MetricsStore>,
    cfg: GateConfig,
}

impl DeploymentGate {
    pub fn new(registry: Arc<dyn RegistryService>, metrics: Arc<dyn MetricsStore>, cfg: GateConfig) -> Self {
        Self { registry, metrics, cfg }
    }

    pub fn config(&self) -> &GateConfig { &self.cfg }

    /// None -> Staging. Fails without registering when the run's metrics are incomplete.
    #[instrument(skip(self, artifact_ref))]
    pub async fn register_candidate(&self, run_id: &str, artifact_ref: ArtifactRef) -> Result<ModelVersion, GateError> {
        let metrics = self.metrics.run_metrics(run_id).await?;
        if let Err(e) = validate_candidate(&self.cfg, run_id, &metrics) {
            record_outcome("validation_failed");
            warn!(error=%e, "candidate rejected at registration");
            return Err(e);
        }
        let mv = self.registry.register(run_id, metrics, artifact_ref).await?;
        info!(version = mv.version, artifact = %mv.artifact_ref, "candidate registered in Staging");
        Ok(mv)
    }

    /// Compare a candidate with the current Production version.
    pub async fn evaluate(&self, candidate: &ModelVersion) -> Result<EvaluationReport, GateError> {
        let baseline = match self.registry.production_version().await? {
            Some(v) => Some(self.registry.get_version(v).await?),
            None => None,
        };
        let verdict = decide(&self.cfg, &candidate.metrics, baseline.as_ref().map(|b| &b.metrics));
        Ok(EvaluationReport::new(candidate.clone(), baseline, verdict))
    }

    /// Staging -> Production, archiving the baseline in the same registry operation.
    async fn promote(&self, report: &EvaluationReport) -> Result<(), GateError> {
        let expected = report.baseline.as_ref().map(|b| b.version);
        let candidate = report.candidate.version;
        match self.registry.set_stage(candidate, Stage::Production, expected).await {
            Ok(()) => Ok(()),
            Err(RegistryError::RaceLost { expected, actual }) => {
                record_outcome("race_lost");
                warn!(candidate, ?expected, ?actual, "promotion race lost; candidate stays in Staging");
                Err(GateError::RaceLost { candidate, expected, actual })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn decide_and_apply(&self, candidate: ModelVersion) -> Result<GateOutcome, GateError> {
        let report = self.evaluate(&candidate).await?;
        let baseline = report.baseline.as_ref().map(|b| b.version);
        if !report.approved() {
            record_outcome("reject");
            info!(candidate = candidate.version, ?baseline, primary_delta = ?report.primary_delta, deltas = ?report.per_metric_delta, findings = ?report.findings, "gate rejected candidate");
            return Ok(GateOutcome { report, promoted: false });
        }
        self.promote(&report).await?;
        record_outcome("approve");
        info!(candidate = candidate.version, ?baseline, primary_delta = ?report.primary_delta, deltas = ?report.per_metric_delta, "candidate promoted to Production");
        Ok(GateOutcome { report, promoted: true })
    }

    /// Full gate for a finished training run.
    #[instrument(skip(self, artifact_ref))]
    pub async fn run(&self, run_id: &str, artifact_ref: ArtifactRef) -> Result<GateOutcome, GateError> {
        let candidate = self.register_candidate(run_id, artifact_ref).await?;
        self.decide_and_apply(candidate).await
    }

    /// Re-run the gate for a version already waiting in Staging.
    #[instrument(skip(self))]
    pub async fn run_version(&self, version: VersionId) -> Result<GateOutcome, GateError> {
        let candidate = self.registry.get_version(version).await?;
        if candidate.stage != Stage::Staging {
            return Err(GateError::NotStaged(version));
        }
        if let Err(e) = validate_candidate(&self.cfg, &candidate.source_run_id, &candidate.metrics) {
            record_outcome("validation_failed");
            warn!(version, error=%e, "staged candidate failed validation");
            return Err(e);
        }
        self.decide_and_apply(candidate).await
    }
}
