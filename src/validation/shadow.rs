//! Shadow validation: compare a candidate model against the serving one on
//! recent real features before it is allowed to take over.

use std::sync::Arc;
use tracing::info;

use super::sampling::load_feature_samples;
use super::stats::{mean_abs_diff_ratio, pearson_correlation, sign_change_rate, value_range};
use crate::config::ShadowValidationConfig;
use crate::models::{FeatureSample, ValidationResult};
use crate::registry::{CandidateValidator, FeatureProvider, Model, ModelError, ModelRole};

pub struct ShadowValidator {
    config: ShadowValidationConfig,
    features: Arc<dyn FeatureProvider>,
}

impl ShadowValidator {
    pub fn new(
        config: ShadowValidationConfig,
        features: Arc<dyn FeatureProvider>,
    ) -> Result<Self, ModelError> {
        config.validate()?;
        Ok(Self { config, features })
    }

    pub fn config(&self) -> &ShadowValidationConfig {
        &self.config
    }

    pub fn load_feature_samples(&self) -> Result<FeatureSample, ModelError> {
        load_feature_samples(
            self.features.as_ref(),
            &self.config.symbols,
            self.config.sample_count,
            self.config.min_lookback_days,
        )
    }

    /// Sample recent features and compare both models on them.
    pub fn validate(
        &self,
        old: &dyn Model,
        new: &dyn Model,
    ) -> Result<ValidationResult, ModelError> {
        let sample = self.load_feature_samples()?;
        let result = self.compare(&sample, old, new)?;
        info!(
            passed = result.passed,
            correlation = result.correlation,
            mean_abs_diff_ratio = result.mean_abs_diff_ratio,
            sign_change_rate = result.sign_change_rate,
            samples = result.sample_count,
            old_range = result.old_range,
            new_range = result.new_range,
            "shadow validation complete"
        );
        Ok(result)
    }

    /// Compare both models on an already assembled sample.
    pub fn compare(
        &self,
        sample: &FeatureSample,
        old: &dyn Model,
        new: &dyn Model,
    ) -> Result<ValidationResult, ModelError> {
        for (role, model) in [(ModelRole::Old, old), (ModelRole::New, new)] {
            let expected = model.num_features();
            if sample.columns != expected {
                return Err(ModelError::DimensionMismatch {
                    model: role,
                    expected,
                    actual: sample.columns,
                });
            }
        }

        let old_pred = predictions(ModelRole::Old, old, sample)?;
        let new_pred = predictions(ModelRole::New, new, sample)?;

        let correlation = pearson_correlation(&old_pred, &new_pred);
        let ratio = mean_abs_diff_ratio(&old_pred, &new_pred);
        let sign_changes = sign_change_rate(&old_pred, &new_pred);

        let passed = correlation >= self.config.correlation_threshold
            && ratio <= self.config.divergence_threshold;

        let message = format!(
            "{}: correlation {:.4} (min {:.2}), mean abs diff ratio {:.4} (max {:.2}), \
             sign changes {:.1}% over {} samples",
            if passed { "PASS" } else { "FAIL" },
            correlation,
            self.config.correlation_threshold,
            ratio,
            self.config.divergence_threshold,
            sign_changes * 100.0,
            old_pred.len()
        );

        Ok(ValidationResult {
            passed,
            correlation,
            mean_abs_diff_ratio: ratio,
            sign_change_rate: sign_changes,
            sample_count: old_pred.len(),
            old_range: value_range(&old_pred),
            new_range: value_range(&new_pred),
            message,
        })
    }
}

impl CandidateValidator for ShadowValidator {
    fn validate(&self, old: &dyn Model, new: &dyn Model) -> Result<ValidationResult, ModelError> {
        ShadowValidator::validate(self, old, new)
    }
}

fn predictions(
    role: ModelRole,
    model: &dyn Model,
    sample: &FeatureSample,
) -> Result<Vec<f64>, ModelError> {
    let preds = model.predict(&sample.rows)?;
    if preds.len() != sample.len() {
        return Err(ModelError::Validation(format!(
            "{} returned {} predictions for {} rows",
            role,
            preds.len(),
            sample.len()
        )));
    }
    if let Some(bad) = preds.iter().position(|p| !p.is_finite()) {
        return Err(ModelError::Validation(format!(
            "{} produced a non-finite prediction at row {}",
            role, bad
        )));
    }
    Ok(preds)
}
