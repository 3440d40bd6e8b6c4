use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec, IntGauge};

static RECONCILE_TICKS: Lazy<Option<IntCounterVec>> = Lazy::new(|| {
    register_int_counter_vec!("modelops_reconcile_ticks_total", "Reconciliation ticks by outcome", &["outcome"])
        .map_err(|e| tracing::warn!(error=?e, "tick metric registration failed"))
        .ok()
});

static MODEL_SWAPS: Lazy<Option<IntCounter>> = Lazy::new(|| {
    register_int_counter!("modelops_model_swaps_total", "Serving snapshot swaps")
        .map_err(|e| tracing::warn!(error=?e, "swap metric registration failed"))
        .ok()
});

static CONSECUTIVE_FAILURES: Lazy<Option<IntGauge>> = Lazy::new(|| {
    register_int_gauge!("modelops_reconcile_consecutive_failures", "Failed reconciliation ticks since the last success")
        .map_err(|e| tracing::warn!(error=?e, "failure gauge registration failed"))
        .ok()
});

static ACTIVE_VERSION: Lazy<Option<IntGauge>> = Lazy::new(|| {
    register_int_gauge!("modelops_active_model_version", "Registry version being served (0 for the local fallback)")
        .map_err(|e| tracing::warn!(error=?e, "version gauge registration failed"))
        .ok()
});

pub fn record_tick(outcome: &str) {
    if let Some(c) = RECONCILE_TICKS.as_ref() { c.with_label_values(&[outcome]).inc(); }
}

pub fn record_swap() {
    if let Some(c) = MODEL_SWAPS.as_ref() { c.inc(); }
}

pub fn set_consecutive_failures(n: u64) {
    if let Some(g) = CONSECUTIVE_FAILURES.as_ref() { g.set(i64::try_from(n).unwrap_or(i64::MAX)); }
}

pub fn set_active_version(version: Option<u64>) {
    if let Some(g) = ACTIVE_VERSION.as_ref() { g.set(version.and_then(|v| i64::try_from(v).ok()).unwrap_or(0)); }
}
