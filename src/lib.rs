//! BetterBot Model Library
//!
//! Live model hot-reload and shadow validation for the signal service.
//! One `ModelRegistry` per strategy keeps the serving model in memory and
//! swaps in newer versions once they load, pass a sanity check, and
//! (optionally) agree with the current model on recent features.

pub mod config;
pub mod loader;
pub mod models;
pub mod registry;
pub mod store;
pub mod validation;

pub use config::{ReloadConfig, ShadowValidationConfig, StoreConfig};
pub use models::{FeatureRow, FeatureSample, ModelMetadata, ValidationResult};
pub use registry::{
    ActivationHook, CandidateValidator, FeatureProvider, MetadataStore, Model, ModelError,
    ModelLoader, ModelRegistry, ModelRole, ReloadMetrics, ReloadOptions, ValidationJob,
    ValidationScheduler,
};
pub use validation::ShadowValidator;
