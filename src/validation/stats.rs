//! Agreement statistics between two prediction vectors.
//!
//! All functions assume equal-length inputs; callers check lengths first.

use statrs::statistics::Statistics;

/// Standard deviation below which a vector is treated as constant.
pub const DEGENERATE_STD: f64 = 1e-12;

/// Magnitude below which mean(|old|) is treated as zero.
pub const ZERO_SCALE: f64 = 1e-12;

const CLOSE_RTOL: f64 = 1e-5;
const CLOSE_ATOL: f64 = 1e-8;

/// Pearson correlation with guards for short and constant inputs.
///
/// Fewer than two points -> 1.0. A (near) constant side -> 1.0 if the vectors
/// are element-wise close, else 0.0. Never NaN for finite input.
pub fn pearson_correlation(a: &[f64], b: &[f64]) -> f64 {
    if a.len() < 2 || b.len() < 2 {
        return 1.0;
    }

    let std_a = a.iter().std_dev();
    let std_b = b.iter().std_dev();
    if !(std_a >= DEGENERATE_STD) || !(std_b >= DEGENERATE_STD) {
        return if all_close(a, b) { 1.0 } else { 0.0 };
    }

    let cov = a.iter().covariance(b.iter());
    (cov / (std_a * std_b)).clamp(-1.0, 1.0)
}

/// mean(|old - new|) / mean(|old|), falling back to the raw mean difference
/// when the old predictions are all ~0.
pub fn mean_abs_diff_ratio(old: &[f64], new: &[f64]) -> f64 {
    if old.is_empty() {
        return 0.0;
    }
    let mean_diff = old
        .iter()
        .zip(new)
        .map(|(o, n)| (o - n).abs())
        .mean();
    let old_scale = old.iter().map(|o| o.abs()).mean();

    if old_scale > ZERO_SCALE {
        mean_diff / old_scale
    } else {
        mean_diff
    }
}

/// Fraction of rows where the two predictions point in opposite directions.
pub fn sign_change_rate(old: &[f64], new: &[f64]) -> f64 {
    if old.is_empty() {
        return 0.0;
    }
    let flips = old
        .iter()
        .zip(new)
        .filter(|(o, n)| o.signum() * n.signum() < 0.0 && **o != 0.0 && **n != 0.0)
        .count();
    flips as f64 / old.len() as f64
}

/// max - min, 0.0 for an empty vector.
pub fn value_range(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let (lo, hi) = xs
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
            (lo.min(x), hi.max(x))
        });
    hi - lo
}

/// Element-wise `|a - b| <= atol + rtol * |b|`.
pub fn all_close(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| (x - y).abs() <= CLOSE_ATOL + CLOSE_RTOL * y.abs())
}
