//! Model serving process: bootstrap, atomic snapshot swap and the reconciliation loop.

pub mod bootstrap;
pub mod config;
pub mod http;
mod metrics;
pub mod model;
pub mod reconcile;
pub mod state;

pub use bootstrap::{bootstrap, load_local, BootstrapError};
pub use config::{ServerSettings, ServingConfig};
pub use model::{confidence_for, Features, LoadError, LoadedModel, ModelArtifact, ModelKind, PredictError, Prediction};
pub use reconcile::{ReconcileHandle, ReconcileTrigger, Reconciler, TickError, TickOutcome, TriggerError};
pub use state::{ActiveModel, ServedPrediction, ServingSnapshot, ServingState, StatusReport};
