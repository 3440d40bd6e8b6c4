use modelops_registry::RegistryConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    pub poll_interval_secs: u64,
    /// Upper bound on the registry path at startup before falling back to the local artifact.
    pub startup_timeout_ms: u64,
    /// Per-call bound inside a reconciliation tick (registry query, artifact fetch).
    pub request_timeout_ms: u64,
    pub fallback_artifact_path: PathBuf,
    pub admin_port: u16,
    /// When false the timer never fires; forced reconciles still run.
    pub auto_reload: bool,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            startup_timeout_ms: 3_000,
            request_timeout_ms: 5_000,
            fallback_artifact_path: PathBuf::from("models/trained/model.json"),
            admin_port: 9095,
            auto_reload: true,
        }
    }
}

impl ServingConfig {
    pub fn poll_interval(&self) -> Duration { Duration::from_secs(self.poll_interval_secs.max(1)) }
    pub fn startup_timeout(&self) -> Duration { Duration::from_millis(self.startup_timeout_ms) }
    pub fn request_timeout(&self) -> Duration { Duration::from_millis(self.request_timeout_ms) }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub serving: ServingConfig,
    pub registry: RegistryConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_poll_interval_is_clamped() {
        let cfg = ServingConfig { poll_interval_secs: 0, ..ServingConfig::default() };
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_settings_keep_defaults() {
        let s: ServerSettings = serde_json::from_value(serde_json::json!({"serving": {"auto_reload": false}})).unwrap();
        assert!(!s.serving.auto_reload);
        assert_eq!(s.serving.poll_interval_secs, 30);
        assert_eq!(s.registry.model_name, "sales-forecaster");
    }
}
