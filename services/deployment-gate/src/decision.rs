//! Pure accept/reject rule over candidate and baseline metrics.
//!
//! A candidate without the primary metric is always rejected.
//! No baseline: approve (bootstrap). Otherwise the primary metric is lower-is-better,
//! `delta = baseline - candidate` must be non-negative and no guard metric may
//! regress past its tolerance. An exact tie follows the configured tie policy.

use modelops_registry::{MetricLookup, MetricMap, ModelVersion, RunId};
use serde::Serialize;

use crate::config::{Direction, GateConfig, TiePolicy};
use crate::error::GateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision { Approve, Reject }

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    Bootstrap,
    /// Candidate cannot be ranked; always vetoes.
    CandidateMissingPrimary { metric: String },
    BaselineMissingPrimary { metric: String },
    PrimaryImproved { metric: String, delta: f64 },
    PrimaryTied { metric: String },
    PrimaryRegressed { metric: String, delta: f64 },
    GuardRegressed { metric: String, regression: f64, tolerance: f64 },
}

impl Finding {
    pub fn is_veto(&self) -> bool { matches!(self, Finding::CandidateMissingPrimary { .. } | Finding::PrimaryRegressed { .. } | Finding::GuardRegressed { .. }) }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub decision: Decision,
    pub primary_delta: Option<f64>,
    /// candidate - baseline for every metric both sides report.
    pub per_metric_delta: MetricMap,
    pub findings: Vec<Finding>,
}

/// Produced once per candidate and discarded after the stage transition (or no-op).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub candidate: ModelVersion,
    pub baseline: Option<ModelVersion>,
    pub per_metric_delta: MetricMap,
    pub primary_delta: Option<f64>,
    pub decision: Decision,
    pub findings: Vec<Finding>,
}

impl EvaluationReport {
    pub fn new(candidate: ModelVersion, baseline: Option<ModelVersion>, verdict: Verdict) -> Self {
        Self { candidate, baseline, per_metric_delta: verdict.per_metric_delta, primary_delta: verdict.primary_delta, decision: verdict.decision, findings: verdict.findings }
    }

    pub fn approved(&self) -> bool { self.decision == Decision::Approve }
}

/// Registration precondition: metrics are present, complete and finite.
pub fn validate_candidate(cfg: &GateConfig, run_id: &str, metrics: &MetricMap) -> Result<(), GateError> {
    let run_id: RunId = run_id.to_string();
    if metrics.is_empty() {
        return Err(GateError::NoMetrics { run_id });
    }
    let missing: Vec<String> = cfg.required_keys().into_iter().filter(|k| metrics.metric(k).is_none()).collect();
    if !missing.is_empty() {
        return Err(GateError::Validation { run_id, missing });
    }
    if let Some((k, _)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
        return Err(GateError::NonFiniteMetric { run_id, metric: k.clone() });
    }
    Ok(())
}

pub fn per_metric_delta(candidate: &MetricMap, baseline: &MetricMap) -> MetricMap {
    candidate.iter().filter_map(|(k, c)| baseline.metric(k).map(|b| (k.clone(), c - b))).collect()
}

pub fn decide(cfg: &GateConfig, candidate: &MetricMap, baseline: Option<&MetricMap>) -> Verdict {
    let metric = cfg.primary_metric.clone();
    let Some(c) = candidate.metric(&metric) else {
        let per_metric_delta = baseline.map(|b| per_metric_delta(candidate, b)).unwrap_or_default();
        return Verdict { decision: Decision::Reject, primary_delta: None, per_metric_delta, findings: vec![Finding::CandidateMissingPrimary { metric }] };
    };
    let Some(baseline) = baseline else {
        return Verdict { decision: Decision::Approve, primary_delta: None, per_metric_delta: MetricMap::new(), findings: vec![Finding::Bootstrap] };
    };
    let deltas = per_metric_delta(candidate, baseline);
    let mut findings = Vec::new();

    let primary_delta = baseline.metric(&metric).map(|b| b - c);
    let mut decision = Decision::Approve;
    match primary_delta {
        None => findings.push(Finding::BaselineMissingPrimary { metric }),
        Some(d) if d > 0.0 => findings.push(Finding::PrimaryImproved { metric, delta: d }),
        Some(d) if d == 0.0 => {
            if cfg.tie_policy == TiePolicy::Reject { decision = Decision::Reject; }
            findings.push(Finding::PrimaryTied { metric });
        }
        Some(d) => {
            decision = Decision::Reject;
            findings.push(Finding::PrimaryRegressed { metric, delta: d });
        }
    }

    for (name, guard) in &cfg.guard_tolerances {
        let (Some(b), Some(c)) = (baseline.metric(name), candidate.metric(name)) else { continue };
        let regression = match guard.direction {
            Direction::LowerIsBetter => c - b,
            Direction::HigherIsBetter => b - c,
        };
        if regression > guard.tolerance {
            decision = Decision::Reject;
            findings.push(Finding::GuardRegressed { metric: name.clone(), regression, tolerance: guard.tolerance });
        }
    }

    Verdict { decision, primary_delta, per_metric_delta: deltas, findings }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mae(v: f64) -> MetricMap { MetricMap::from([("mae".to_string(), v)]) }

    #[test]
    fn bootstrap_approves_without_baseline() {
        let v = decide(&GateConfig::default(), &mae(10.0), None);
        assert_eq!(v.decision, Decision::Approve);
        assert_eq!(v.findings, vec![Finding::Bootstrap]);
        assert!(v.per_metric_delta.is_empty());
    }

    #[test]
    fn improvement_approves_and_regression_rejects() {
        let cfg = GateConfig::default();
        let better = decide(&cfg, &mae(4.5), Some(&mae(5.0)));
        assert_eq!(better.decision, Decision::Approve);
        assert_eq!(better.primary_delta, Some(0.5));
        assert_eq!(better.per_metric_delta.get("mae"), Some(&-0.5));

        let worse = decide(&cfg, &mae(5.5), Some(&mae(5.0)));
        assert_eq!(worse.decision, Decision::Reject);
        assert_eq!(worse.primary_delta, Some(-0.5));
    }

    #[test]
    fn tie_follows_policy() {
        let mut cfg = GateConfig::default();
        assert_eq!(decide(&cfg, &mae(5.0), Some(&mae(5.0))).decision, Decision::Approve);
        cfg.tie_policy = TiePolicy::Reject;
        assert_eq!(decide(&cfg, &mae(5.0), Some(&mae(5.0))).decision, Decision::Reject);
    }

    #[test]
    fn guard_vetoes_primary_improvement() {
        let cfg = GateConfig::default().with_guard("r2_score", 0.02, Direction::HigherIsBetter);
        let baseline = MetricMap::from([("mae".into(), 5.0), ("r2_score".into(), 0.90)]);
        let within = MetricMap::from([("mae".into(), 4.0), ("r2_score".into(), 0.89)]);
        let beyond = MetricMap::from([("mae".into(), 4.0), ("r2_score".into(), 0.80)]);

        assert_eq!(decide(&cfg, &within, Some(&baseline)).decision, Decision::Approve);
        let v = decide(&cfg, &beyond, Some(&baseline));
        assert_eq!(v.decision, Decision::Reject);
        assert!(v.findings.iter().any(|f| matches!(f, Finding::GuardRegressed { metric, .. } if metric == "r2_score")));
    }

    #[test]
    fn prefixed_keys_compare_against_bare_keys() {
        let cand = MetricMap::from([("test_mae".into(), 4.0)]);
        let v = decide(&GateConfig::default(), &cand, Some(&mae(5.0)));
        assert_eq!(v.primary_delta, Some(1.0));
        assert_eq!(v.per_metric_delta.get("test_mae"), Some(&-1.0));
    }

    #[test]
    fn candidate_without_primary_is_rejected() {
        let cand = MetricMap::from([("rmse".to_string(), 1.0)]);
        let v = decide(&GateConfig::default(), &cand, Some(&mae(5.0)));
        assert_eq!(v.decision, Decision::Reject);
        assert_eq!(v.findings, vec![Finding::CandidateMissingPrimary { metric: "mae".into() }]);
        assert!(v.findings[0].is_veto());

        let v = decide(&GateConfig::default(), &MetricMap::new(), None);
        assert_eq!(v.decision, Decision::Reject);
    }

    #[test]
    fn baseline_without_primary_approves() {
        let baseline = MetricMap::from([("rmse".to_string(), 6.0)]);
        let v = decide(&GateConfig::default(), &mae(4.0), Some(&baseline));
        assert_eq!(v.decision, Decision::Approve);
        assert_eq!(v.primary_delta, None);
        assert_eq!(v.findings, vec![Finding::BaselineMissingPrimary { metric: "mae".into() }]);
    }

    #[test]
    fn validation_reports_missing_keys() {
        let cfg = GateConfig { required_metrics: vec!["rmse".into()], ..GateConfig::default() };
        let err = validate_candidate(&cfg, "r1", &mae(3.0)).unwrap_err();
        assert_eq!(err, GateError::Validation { run_id: "r1".into(), missing: vec!["rmse".into()] });
        assert!(err.is_validation());
        assert!(matches!(validate_candidate(&cfg, "r1", &MetricMap::new()), Err(GateError::NoMetrics { .. })));
        let nan = MetricMap::from([("mae".into(), f64::NAN), ("rmse".into(), 1.0)]);
        assert!(matches!(validate_candidate(&cfg, "r1", &nan), Err(GateError::NonFiniteMetric { .. })));
    }
}
