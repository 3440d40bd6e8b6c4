//! Model artifact format and the loaded predictor.
//!
//! An artifact is a JSON linear regressor over named features. Loading checks
//! that it is internally consistent, so a snapshot holding a `LoadedModel`
//! can always answer a prediction for a complete feature set.

use modelops_registry::{sha256_hex, ArtifactError, MetricMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub type Features = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    #[serde(default)]
    pub kind: ModelKind,
    pub features: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    /// Evaluation metrics written by training; reported when serving the local fallback.
    #[serde(default)]
    pub metrics: MetricMap,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] ArtifactError),
    #[error("io error: {0}")]
    Io(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid model: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    #[error("missing feature {0}")]
    MissingFeature(String),
    #[error("feature {0} is not finite")]
    NonFinite(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub value: f64,
    pub confidence: f64,
}

/// Heuristic confidence: predictions inside the usual sales band are trusted more.
pub fn confidence_for(value: f64) -> f64 {
    if value > 80.0 && value < 200.0 { 0.85 } else { 0.70 }
}

#[derive(Debug)]
pub struct LoadedModel {
    artifact: ModelArtifact,
    digest: String,
}

impl LoadedModel {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let artifact: ModelArtifact = serde_json::from_slice(bytes).map_err(|e| LoadError::Decode(e.to_string()))?;
        Self::build(artifact, sha256_hex(bytes))
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, LoadError> {
        let bytes = serde_json::to_vec(&artifact).map_err(|e| LoadError::Decode(e.to_string()))?;
        Self::build(artifact, sha256_hex(&bytes))
    }

    fn build(artifact: ModelArtifact, digest: String) -> Result<Self, LoadError> {
        if artifact.features.is_empty() {
            return Err(LoadError::Invalid("no features".into()));
        }
        if artifact.features.len() != artifact.coefficients.len() {
            return Err(LoadError::Invalid(format!("{} features but {} coefficients", artifact.features.len(), artifact.coefficients.len())));
        }
        if !artifact.intercept.is_finite() || artifact.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(LoadError::Invalid("non-finite parameter".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        if let Some(dup) = artifact.features.iter().find(|f| !seen.insert(f.as_str())) {
            return Err(LoadError::Invalid(format!("duplicate feature {dup}")));
        }
        Ok(Self { artifact, digest })
    }

    pub fn name(&self) -> &str { &self.artifact.name }
    pub fn features(&self) -> &[String] { &self.artifact.features }
    pub fn metrics(&self) -> &MetricMap { &self.artifact.metrics }
    pub fn intercept(&self) -> f64 { self.artifact.intercept }
    /// sha256 of the artifact bytes the model was loaded from.
    pub fn digest(&self) -> &str { &self.digest }

    pub fn predict(&self, input: &Features) -> Result<Prediction, PredictError> {
        let mut value = self.artifact.intercept;
        for (name, coef) in self.artifact.features.iter().zip(&self.artifact.coefficients) {
            let x = *input.get(name).ok_or_else(|| PredictError::MissingFeature(name.clone()))?;
            if !x.is_finite() {
                return Err(PredictError::NonFinite(name.clone()));
            }
            value += coef * x;
        }
        Ok(Prediction { value, confidence: confidence_for(value) })
    }
}
