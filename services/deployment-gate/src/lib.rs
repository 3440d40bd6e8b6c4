//! Deployment gate: decides from metrics alone whether a candidate may replace Production.

pub mod compare;
pub mod config;
pub mod decision;
pub mod error;
pub mod gate;
mod metrics;
pub mod rollback;

pub use compare::{compare_production, MetricComparison, Trend, VersionComparison};
pub use config::{Direction, GateConfig, GateSettings, GuardTolerance, TiePolicy};
pub use decision::{decide, validate_candidate, Decision, EvaluationReport, Finding, Verdict};
pub use error::GateError;
pub use gate::{DeploymentGate, GateOutcome};
pub use rollback::{rollback_to, RollbackOutcome};
