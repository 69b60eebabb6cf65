//! Shadow Validation
//!
//! Statistical comparison of a candidate model against the serving model.

pub mod sampling;
pub mod shadow;
pub mod stats;

pub use sampling::{initial_lookback_days, load_feature_samples};
pub use shadow::ShadowValidator;
pub use stats::{mean_abs_diff_ratio, pearson_correlation, sign_change_rate, value_range};
