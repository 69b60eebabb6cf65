//! Model Registry - hot reload of the serving prediction model
//!
//! One registry per strategy. An external periodic caller drives
//! `check_and_reload`; the registry never spawns its own timer.

pub mod error;
pub mod hot_reload;
pub mod metrics;
pub mod traits;

pub use error::{ModelError, ModelRole};
pub use hot_reload::{
    ActivationHook, ModelRegistry, ReloadOptions, ValidationJob, ValidationScheduler,
};
pub use metrics::ReloadMetrics;
pub use traits::{CandidateValidator, FeatureProvider, MetadataStore, Model, ModelLoader};
