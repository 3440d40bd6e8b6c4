use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

pub static GATE_DECISIONS: Lazy<Option<IntCounterVec>> = Lazy::new(|| {
    register_int_counter_vec!("modelops_gate_decisions_total", "Deployment gate outcomes by kind", &["outcome"])
        .map_err(|e| tracing::warn!(error=?e, "gate metrics registration failed"))
        .ok()
});

pub fn record_outcome(outcome: &str) {
    if let Some(c) = GATE_DECISIONS.as_ref() { c.with_label_values(&[outcome]).inc(); }
}
