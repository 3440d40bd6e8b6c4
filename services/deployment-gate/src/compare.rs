//! Side-by-side report of the Production version against the newest older version.

use modelops_registry::{MetricLookup, ModelVersion, RegistryService, Stage};
use serde::Serialize;

use crate::config::{Direction, GateConfig};
use crate::error::GateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend { Improved, Degraded, Unchanged }

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricComparison {
    pub metric: String,
    pub current: f64,
    pub previous: f64,
    /// Positive means better, relative to the previous value.
    pub percent_change: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionComparison {
    pub current: ModelVersion,
    pub previous: Option<ModelVersion>,
    pub metrics: Vec<MetricComparison>,
}

pub fn compare_metric(metric: &str, current: f64, previous: f64, direction: Direction) -> MetricComparison {
    let gain = match direction { Direction::LowerIsBetter => previous - current, Direction::HigherIsBetter => current - previous };
    let percent_change = if previous > 0.0 { ((gain / previous) * 100.0 * 100.0).round() / 100.0 } else { 0.0 };
    let trend = if percent_change > 0.0 { Trend::Improved } else if percent_change < 0.0 { Trend::Degraded } else { Trend::Unchanged };
    MetricComparison { metric: metric.to_string(), current, previous, percent_change, trend }
}

pub async fn compare_production(registry: &dyn RegistryService, cfg: &GateConfig) -> Result<Option<VersionComparison>, GateError> {
    let versions = registry.list_versions().await?;
    let Some(current) = versions.iter().filter(|v| v.stage == Stage::Production).max_by_key(|v| v.version).cloned() else {
        return Ok(None);
    };
    let previous = versions.iter().filter(|v| v.version < current.version).max_by_key(|v| v.version).cloned();

    let mut watched = vec![(cfg.primary_metric.clone(), Direction::LowerIsBetter)];
    watched.extend(cfg.guard_tolerances.iter().map(|(k, g)| (k.clone(), g.direction)));

    let metrics = match &previous {
        Some(prev) => watched
            .iter()
            .filter_map(|(name, dir)| Some(compare_metric(name, current.metrics.metric(name)?, prev.metrics.metric(name)?, *dir)))
            .collect(),
        None => Vec::new(),
    };
    Ok(Some(VersionComparison { current, previous, metrics }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelops_registry::{ArtifactRef, InMemoryRegistry, MetricMap};

    #[test]
    fn percent_change_respects_direction() {
        let mae = compare_metric("mae", 4.0, 5.0, Direction::LowerIsBetter);
        assert_eq!(mae.percent_change, 20.0);
        assert_eq!(mae.trend, Trend::Improved);
        let r2 = compare_metric("r2_score", 0.8, 0.9, Direction::HigherIsBetter);
        assert_eq!(r2.trend, Trend::Degraded);
        assert_eq!(compare_metric("mae", 1.0, 0.0, Direction::LowerIsBetter).trend, Trend::Unchanged);
    }

    #[tokio::test]
    async fn compares_against_newest_older_version() {
        let reg = InMemoryRegistry::new();
        let cfg = GateConfig::default().with_guard("r2_score", 0.05, Direction::HigherIsBetter);
        let m = |mae: f64, r2: f64| MetricMap::from([("mae".to_string(), mae), ("r2_score".to_string(), r2)]);
        let v1 = reg.register("r1", m(5.0, 0.8), ArtifactRef::new("a1")).await.unwrap();
        reg.set_stage(v1.version, Stage::Production, None).await.unwrap();
        assert!(compare_production(&reg, &cfg).await.unwrap().unwrap().previous.is_none());

        let v2 = reg.register("r2", m(4.0, 0.85), ArtifactRef::new("a2")).await.unwrap();
        reg.set_stage(v2.version, Stage::Production, Some(v1.version)).await.unwrap();
        let cmp = compare_production(&reg, &cfg).await.unwrap().unwrap();
        assert_eq!(cmp.current.version, v2.version);
        assert_eq!(cmp.previous.as_ref().map(|p| p.version), Some(v1.version));
        assert_eq!(cmp.metrics.len(), 2);
        assert!(cmp.metrics.iter().all(|c| c.trend == Trend::Improved));
    }

    #[tokio::test]
    async fn no_production_means_no_comparison() {
        let reg = InMemoryRegistry::new();
        assert!(compare_production(&reg, &GateConfig::default()).await.unwrap().is_none());
    }
}
