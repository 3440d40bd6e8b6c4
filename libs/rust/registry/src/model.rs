//! Registry data model: versions, stages, metric maps and artifact references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Registry-assigned, monotonically increasing version number.
pub type VersionId = u64;
/// Opaque training run identifier.
pub type RunId = String;
/// Metric name to value. Ordered so reports and logs are stable.
pub type MetricMap = BTreeMap<String, f64>;
/// String tags attached to an event run.
pub type EventTags = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage { None, Staging, Production, Archived }

impl Stage {
    /// Forward-only lifecycle: None -> Staging -> Production -> Archived.
    pub fn can_transition_to(self, next: Stage) -> bool {
        matches!((self, next), (Stage::None, Stage::Staging) | (Stage::Staging, Stage::Production) | (Stage::Production, Stage::Archived))
    }

    pub fn as_str(self) -> &'static str {
        match self { Stage::None => "None", Stage::Staging => "Staging", Stage::Production => "Production", Stage::Archived => "Archived" }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        match s {
            "None" | "none" | "" => Some(Stage::None),
            "Staging" | "staging" => Some(Stage::Staging),
            "Production" | "production" => Some(Stage::Production),
            "Archived" | "archived" => Some(Stage::Archived),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Handle resolvable by an artifact store. `sha256:<hex>` refs are content addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub const DIGEST_PREFIX: &'static str = "sha256:";

    pub fn new(s: impl Into<String>) -> Self { Self(s.into()) }
    pub fn as_str(&self) -> &str { &self.0 }

    /// Expected hex digest when the reference is content addressed.
    pub fn digest(&self) -> Option<&str> { self.0.strip_prefix(Self::DIGEST_PREFIX) }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version: VersionId,
    pub stage: Stage,
    pub source_run_id: RunId,
    pub metrics: MetricMap,
    pub artifact_ref: ArtifactRef,
    pub created_at: DateTime<Utc>,
}

/// Metric lookup that understands the evaluation job's `test_` prefixed keys.
pub trait MetricLookup {
    fn metric(&self, name: &str) -> Option<f64>;
}

impl MetricLookup for MetricMap {
    fn metric(&self, name: &str) -> Option<f64> {
        metric_aliases(name).iter().find_map(|k| self.get(k.as_str()).copied())
    }
}

fn metric_aliases(name: &str) -> Vec<String> {
    let mut keys = vec![name.to_string()];
    match name {
        "r2_score" => keys.push("test_r2".into()),
        "test_r2" => keys.push("r2_score".into()),
        _ => match name.strip_prefix("test_") {
            Some(bare) => keys.push(bare.to_string()),
            None => keys.push(format!("test_{name}")),
        },
    }
    keys
}
