//! Plain data types shared by the registry, the validator and the stores.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row of the model metadata table.
///
/// Immutable once constructed; the registry hands out `Arc<ModelMetadata>` so
/// readers never observe a half-written record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub id: i64,
    pub strategy_name: String,
    pub version: String,
    pub artifact_path: String,
    /// "staged", "active" or "retired"
    pub status: String,
    #[serde(default)]
    pub performance_metrics: HashMap<String, f64>,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl ModelMetadata {
    pub fn new(strategy_name: &str, version: &str, artifact_path: &str) -> Self {
        Self {
            id: 0,
            strategy_name: strategy_name.to_string(),
            version: version.to_string(),
            artifact_path: artifact_path.to_string(),
            status: "active".to_string(),
            performance_metrics: HashMap::new(),
            config: HashMap::new(),
            created_at: Utc::now(),
            activated_at: Some(Utc::now()),
        }
    }
}

/// Outcome of one shadow validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    /// Pearson correlation between old and candidate predictions
    pub correlation: f64,
    /// mean(|old - new|) / mean(|old|), or the raw mean difference when old is ~0
    pub mean_abs_diff_ratio: f64,
    /// Fraction of rows where the two models disagree on direction (diagnostic only)
    pub sign_change_rate: f64,
    pub sample_count: usize,
    /// max - min of the old model's predictions
    pub old_range: f64,
    /// max - min of the candidate's predictions
    pub new_range: f64,
    pub message: String,
}

/// A single (symbol, date) feature vector as stored. `None` marks a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub symbol: String,
    pub date: NaiveDate,
    pub values: Vec<Option<f64>>,
}

impl FeatureRow {
    /// Returns the dense vector when every value is present and finite.
    pub fn complete(&self) -> Option<Vec<f64>> {
        self.values
            .iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect()
    }
}

/// Dense feature matrix fed to both models during validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSample {
    pub rows: Vec<Vec<f64>>,
    pub columns: usize,
}

impl FeatureSample {
    pub fn new(rows: Vec<Vec<f64>>) -> Self {
        let columns = rows.first().map(|r| r.len()).unwrap_or(0);
        Self { rows, columns }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
