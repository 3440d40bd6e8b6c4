//! MLflow tracking server client (REST API 2.0) acting as registry and metrics store.
//!
//! MLflow has no conditional stage transition, so `set_stage` re-reads the
//! Production version right before transitioning. The archive of the previous
//! Production version happens server side through `archive_existing_versions`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::RegistryError;
use crate::model::{ArtifactRef, EventTags, MetricMap, ModelVersion, RunId, Stage, VersionId};
use crate::store::{MetricsStore, RegistryService};

#[derive(Debug, Deserialize)]
struct RawModelVersion {
    version: String,
    #[serde(default)]
    creation_timestamp: Option<i64>,
    #[serde(default)]
    current_stage: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    run_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelVersionEnvelope { model_version: RawModelVersion }

#[derive(Debug, Default, Deserialize)]
struct ModelVersionList {
    #[serde(default)]
    model_versions: Vec<RawModelVersion>,
}

#[derive(Debug, Deserialize)]
struct RawMetric { key: String, value: f64, #[serde(default)] timestamp: i64 }

#[derive(Debug, Default, Deserialize)]
struct RunData {
    #[serde(default)]
    metrics: Vec<RawMetric>,
}

#[derive(Debug, Deserialize)]
struct RawRun {
    #[serde(default)]
    data: RunData,
}

#[derive(Debug, Deserialize)]
struct RunEnvelope { run: RawRun }

#[derive(Debug, Deserialize)]
struct RunInfo { run_id: String }

#[derive(Debug, Deserialize)]
struct CreatedRun { info: RunInfo }

#[derive(Debug, Deserialize)]
struct CreatedRunEnvelope { run: CreatedRun }

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone)]
pub struct MlflowRegistry {
    client: reqwest::Client,
    tracking_uri: String,
    model_name: String,
    experiment_id: String,
}

impl MlflowRegistry {
    pub fn new(tracking_uri: impl Into<String>, model_name: impl Into<String>, timeout: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| RegistryError::Backend(e.to_string()))?;
        Ok(Self { client, tracking_uri: tracking_uri.into().trim_end_matches('/').to_string(), model_name: model_name.into(), experiment_id: "0".into() })
    }

    /// Experiment that receives event runs. MLflow's default experiment is "0".
    pub fn with_experiment_id(mut self, experiment_id: impl Into<String>) -> Self {
        self.experiment_id = experiment_id.into();
        self
    }

    pub fn model_name(&self) -> &str { &self.model_name }

    fn endpoint(&self, path: &str) -> String { format!("{}/api/2.0/mlflow/{}", self.tracking_uri, path) }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Option<T>, RegistryError> {
        let resp = self.client.get(self.endpoint(path)).query(query).send().await.map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        decode(resp).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<Option<T>, RegistryError> {
        let resp = self.client.post(self.endpoint(path)).json(&body).send().await.map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        decode(resp).await
    }

    /// A version's metrics come from its source run. A run that cannot be
    /// found is an error, never an empty map.
    async fn metrics_for(&self, raw: &RawModelVersion) -> Result<MetricMap, RegistryError> {
        match raw.run_id.as_deref() {
            Some(id) if !id.is_empty() => self.run_metrics(id).await,
            _ => Err(RegistryError::Backend(format!("model version {} has no source run", raw.version))),
        }
    }

    async fn hydrate(&self, raw: RawModelVersion) -> Result<ModelVersion, RegistryError> {
        let metrics = self.metrics_for(&raw).await?;
        convert(raw, metrics)
    }

    /// Listing keeps versions whose run is gone, reported without metrics.
    async fn hydrate_for_listing(&self, raw: RawModelVersion) -> Result<ModelVersion, RegistryError> {
        match self.metrics_for(&raw).await {
            Ok(metrics) => convert(raw, metrics),
            Err(e @ (RegistryError::RunNotFound(_) | RegistryError::Backend(_))) => {
                warn!(version = %raw.version, error = %e, "listing model version without run metrics");
                convert(raw, MetricMap::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn transition(&self, version: VersionId, stage: Stage, archive_existing: bool) -> Result<(), RegistryError> {
        let body = json!({
            "name": self.model_name,
            "version": version.to_string(),
            "stage": stage.as_str(),
            "archive_existing_versions": archive_existing,
        });
        self.post_json::<serde_json::Value>("model-versions/transition-stage", body).await?.ok_or(RegistryError::VersionNotFound(version))?;
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<Option<T>, RegistryError> {
    let status = resp.status();
    let body = resp.bytes().await.map_err(|e| RegistryError::Unavailable(e.to_string()))?;
    if status.is_success() {
        return serde_json::from_slice(&body).map(Some).map_err(|e| RegistryError::Backend(format!("decode: {e}")));
    }
    let api: Option<ApiError> = serde_json::from_slice(&body).ok();
    if status == reqwest::StatusCode::NOT_FOUND || api.as_ref().map(|a| a.error_code == "RESOURCE_DOES_NOT_EXIST").unwrap_or(false) {
        return Ok(None);
    }
    if status.is_server_error() {
        return Err(RegistryError::Unavailable(format!("status {status}")));
    }
    let detail = api.map(|a| format!("{}: {}", a.error_code, a.message)).unwrap_or_else(|| status.to_string());
    Err(RegistryError::Backend(detail))
}

fn parse_version(raw: &str) -> Result<VersionId, RegistryError> {
    raw.parse().map_err(|_| RegistryError::Backend(format!("non-numeric model version {raw:?}")))
}

fn convert(raw: RawModelVersion, metrics: MetricMap) -> Result<ModelVersion, RegistryError> {
    let version = parse_version(&raw.version)?;
    let stage = raw.current_stage.as_deref().map(|s| Stage::parse(s).ok_or_else(|| RegistryError::Backend(format!("unknown stage {s:?}")))).transpose()?.unwrap_or(Stage::None);
    let created_at = raw.creation_timestamp.and_then(DateTime::<Utc>::from_timestamp_millis).unwrap_or_else(Utc::now);
    Ok(ModelVersion {
        version,
        stage,
        source_run_id: raw.run_id.unwrap_or_default(),
        metrics,
        artifact_ref: ArtifactRef(raw.source.unwrap_or_default()),
        created_at,
    })
}

fn latest_metrics(metrics: Vec<RawMetric>) -> MetricMap {
    let mut latest: std::collections::BTreeMap<String, (i64, f64)> = Default::default();
    for m in metrics {
        let entry = latest.entry(m.key).or_insert((m.timestamp, m.value));
        if m.timestamp >= entry.0 { *entry = (m.timestamp, m.value); }
    }
    latest.into_iter().map(|(k, (_, v))| (k, v)).collect()
}

#[async_trait]
impl RegistryService for MlflowRegistry {
    #[instrument(skip(self), fields(model = %self.model_name))]
    async fn production_version(&self) -> Result<Option<VersionId>, RegistryError> {
        let body = json!({ "name": self.model_name, "stages": ["Production"] });
        let list: ModelVersionList = self.post_json("registered-models/get-latest-versions", body).await?.unwrap_or_default();
        let mut newest = None;
        for v in &list.model_versions { newest = newest.max(Some(parse_version(&v.version)?)); }
        Ok(newest)
    }

    async fn get_version(&self, version: VersionId) -> Result<ModelVersion, RegistryError> {
        let query = [("name", self.model_name.clone()), ("version", version.to_string())];
        let env: ModelVersionEnvelope = self.get_json("model-versions/get", &query).await?.ok_or(RegistryError::VersionNotFound(version))?;
        self.hydrate(env.model_version).await
    }

    async fn register(&self, run_id: &str, metrics: MetricMap, artifact_ref: ArtifactRef) -> Result<ModelVersion, RegistryError> {
        let body = json!({ "name": self.model_name, "source": artifact_ref.as_str(), "run_id": run_id });
        let env: ModelVersionEnvelope = self.post_json("model-versions/create", body).await?
            .ok_or_else(|| RegistryError::Backend(format!("registered model {} does not exist", self.model_name)))?;
        let mut mv = convert(env.model_version, metrics)?;
        self.transition(mv.version, Stage::Staging, false).await?;
        mv.stage = Stage::Staging;
        debug!(version = mv.version, run_id, "registered model version");
        Ok(mv)
    }

    async fn set_stage(&self, version: VersionId, stage: Stage, expected_production: Option<VersionId>) -> Result<(), RegistryError> {
        let actual = self.production_version().await?;
        if actual != expected_production {
            return Err(RegistryError::RaceLost { expected: expected_production, actual });
        }
        let query = [("name", self.model_name.clone()), ("version", version.to_string())];
        let env: ModelVersionEnvelope = self.get_json("model-versions/get", &query).await?.ok_or(RegistryError::VersionNotFound(version))?;
        let from = convert(env.model_version, MetricMap::new())?.stage;
        if !from.can_transition_to(stage) {
            return Err(RegistryError::InvalidTransition { version, from, to: stage });
        }
        self.transition(version, stage, stage == Stage::Production).await
    }

    async fn list_versions(&self) -> Result<Vec<ModelVersion>, RegistryError> {
        let query = [("filter", format!("name='{}'", self.model_name))];
        let list: ModelVersionList = self.get_json("model-versions/search", &query).await?.unwrap_or_default();
        let mut out = Vec::with_capacity(list.model_versions.len());
        for raw in list.model_versions { out.push(self.hydrate_for_listing(raw).await?); }
        out.sort_by_key(|v| v.version);
        Ok(out)
    }
}

#[async_trait]
impl MetricsStore for MlflowRegistry {
    async fn run_metrics(&self, run_id: &str) -> Result<MetricMap, RegistryError> {
        let env: RunEnvelope = self.get_json("runs/get", &[("run_id", run_id.to_string())]).await?.ok_or_else(|| RegistryError::RunNotFound(run_id.to_string()))?;
        Ok(latest_metrics(env.run.data.metrics))
    }

    async fn log_metrics(&self, run_id: &str, metrics: &MetricMap) -> Result<(), RegistryError> {
        let ts = Utc::now().timestamp_millis();
        let batch: Vec<_> = metrics.iter().map(|(k, v)| json!({ "key": k, "value": v, "timestamp": ts, "step": 0 })).collect();
        self.post_json::<serde_json::Value>("runs/log-batch", json!({ "run_id": run_id, "metrics": batch })).await?
            .ok_or_else(|| RegistryError::RunNotFound(run_id.to_string()))?;
        Ok(())
    }

    async fn record_event(&self, name: &str, tags: &EventTags) -> Result<RunId, RegistryError> {
        let tags: Vec<_> = tags.iter().map(|(k, v)| json!({ "key": k, "value": v })).collect();
        let body = json!({
            "experiment_id": self.experiment_id,
            "run_name": name,
            "start_time": Utc::now().timestamp_millis(),
            "tags": tags,
        });
        let created: CreatedRunEnvelope = self.post_json("runs/create", body).await?
            .ok_or_else(|| RegistryError::Backend(format!("experiment {} does not exist", self.experiment_id)))?;
        debug!(run_id = %created.run.info.run_id, name, "event run recorded");
        Ok(created.run.info.run_id)
    }
}
