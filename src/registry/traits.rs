//! Capability interfaces the registry is built against.
//!
//! Everything here is implemented outside the registry: SQLite stores and the
//! JSON model loader in this crate, in-memory fakes in tests.

use chrono::NaiveDate;
use std::sync::Arc;

use super::error::ModelError;
use crate::models::{FeatureRow, ModelMetadata, ValidationResult};

/// A loaded prediction model. The registry never looks inside.
pub trait Model: Send + Sync {
    fn num_features(&self) -> usize;

    /// One prediction per input row.
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError>;
}

/// Turns an artifact path into a model.
///
/// Expected failures: `NotFound` (missing artifact), `InvalidFormat` (unparseable).
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &str) -> Result<Arc<dyn Model>, ModelError>;
}

/// Source of the currently-active metadata row per strategy.
pub trait MetadataStore: Send + Sync {
    /// Most recently activated row with status "active".
    ///
    /// `NotFound` when no such row exists, `Transient` on connectivity loss.
    fn get_active_model(&self, strategy: &str) -> Result<ModelMetadata, ModelError>;

    /// Release pooled connections. Later lookups fail with `Transient`.
    fn close(&self) {}
}

/// Precomputed feature rows partitioned by calendar date.
pub trait FeatureProvider: Send + Sync {
    fn latest_partition(&self) -> Result<Option<NaiveDate>, ModelError>;

    fn earliest_partition(&self) -> Result<Option<NaiveDate>, ModelError>;

    /// Rows for `symbols` with `start <= date <= end`, ordered by (date, symbol).
    fn fetch(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FeatureRow>, ModelError>;
}

/// Compares the serving model against a candidate before promotion.
pub trait CandidateValidator: Send + Sync {
    fn validate(&self, old: &dyn Model, new: &dyn Model) -> Result<ValidationResult, ModelError>;
}

impl<F> CandidateValidator for F
where
    F: Fn(&dyn Model, &dyn Model) -> Result<ValidationResult, ModelError> + Send + Sync,
{
    fn validate(&self, old: &dyn Model, new: &dyn Model) -> Result<ValidationResult, ModelError> {
        self(old, new)
    }
}
