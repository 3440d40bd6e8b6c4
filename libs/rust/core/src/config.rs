//! Layered configuration: struct defaults, then an optional file, then environment.
//!
//! The file is named by `MODELOPS_CONFIG_FILE` (any format the `config` crate
//! recognises by extension). Environment keys use the `MODELOPS` prefix and `__`
//! as the nesting separator, e.g. `MODELOPS__SERVING__POLL_INTERVAL_SECS=10`.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

pub const CONFIG_FILE_ENV: &str = "MODELOPS_CONFIG_FILE";

pub fn load_config<T: DeserializeOwned>(service: &str) -> Result<T> {
    let mut builder = config::Config::builder().set_default("service_name", service)?;
    if let Ok(file) = std::env::var(CONFIG_FILE_ENV) {
        builder = builder.add_source(config::File::with_name(&file).required(false));
    }
    builder = builder.add_source(config::Environment::with_prefix("MODELOPS").separator("__"));
    let cfg = builder.build().with_context(|| format!("building configuration for {service}"))?;
    cfg.try_deserialize().with_context(|| format!("invalid configuration for {service}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Sample {
        service_name: String,
        #[serde(default = "default_interval")]
        interval: u64,
    }

    fn default_interval() -> u64 { 30 }

    #[test]
    fn defaults_fill_missing_keys() {
        let cfg: Sample = load_config("sample-svc").unwrap();
        assert_eq!(cfg.service_name, "sample-svc");
        assert_eq!(cfg.interval, 30);
    }
}
