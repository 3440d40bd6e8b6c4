use modelops_registry::RegistryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction { LowerIsBetter, HigherIsBetter }

impl Default for Direction {
    fn default() -> Self { Direction::LowerIsBetter }
}

/// A secondary metric that vetoes promotion when it regresses more than `tolerance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardTolerance {
    pub tolerance: f64,
    #[serde(default)]
    pub direction: Direction,
}

/// Outcome when the primary metric is exactly equal to the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy { Approve, Reject }

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Lower-is-better error measure compared against the baseline.
    pub primary_metric: String,
    /// Extra keys a run must report before it may be registered.
    pub required_metrics: Vec<String>,
    pub guard_tolerances: BTreeMap<String, GuardTolerance>,
    pub tie_policy: TiePolicy,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { primary_metric: "mae".into(), required_metrics: Vec::new(), guard_tolerances: BTreeMap::new(), tie_policy: TiePolicy::Approve }
    }
}

impl GateConfig {
    /// Primary, explicitly required and guard metrics, without duplicates.
    pub fn required_keys(&self) -> Vec<String> {
        let mut keys = vec![self.primary_metric.clone()];
        for k in self.required_metrics.iter().chain(self.guard_tolerances.keys()) {
            if !keys.contains(k) { keys.push(k.clone()); }
        }
        keys
    }

    pub fn with_guard(mut self, metric: &str, tolerance: f64, direction: Direction) -> Self {
        self.guard_tolerances.insert(metric.to_string(), GuardTolerance { tolerance, direction });
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    pub gate: GateConfig,
    pub registry: RegistryConfig,
}
