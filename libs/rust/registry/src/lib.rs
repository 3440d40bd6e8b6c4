//! Model registry domain: versioned artifacts with a mutable stage label, plus
//! the artifact and metrics stores the promotion services consume.

pub mod artifact;
pub mod config;
pub mod error;
pub mod memory;
pub mod mlflow;
pub mod model;
pub mod store;

pub use artifact::{digest_ref, sha256_hex, verify_digest, FsArtifactStore, HttpArtifactStore};
pub use config::{ArtifactLocation, RegistryConfig};
pub use error::{ArtifactError, RegistryError};
pub use memory::{InMemoryArtifactStore, InMemoryMetricsStore, InMemoryRegistry};
pub use mlflow::MlflowRegistry;
pub use model::{ArtifactRef, EventTags, MetricLookup, MetricMap, ModelVersion, RunId, Stage, VersionId};
pub use store::{ArtifactStore, MetricsStore, RegistryService};
