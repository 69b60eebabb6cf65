//! Feature sample acquisition for shadow validation
//!
//! Walks backward from the most recent date partition, doubling the window
//! until enough complete rows are found or history runs out.

use chrono::{Duration, NaiveDate};
use tracing::debug;

use crate::models::{FeatureRow, FeatureSample};
use crate::registry::{FeatureProvider, ModelError};

/// Calendar days per trading day, as a 7/5 ratio.
const CALENDAR_NUM: usize = 7;
const CALENDAR_DEN: usize = 5;

/// Starting lookback: enough calendar days for `sample_count / num_symbols`
/// trading days, never less than `min_days`.
pub fn initial_lookback_days(sample_count: usize, num_symbols: usize, min_days: i64) -> i64 {
    let num_symbols = num_symbols.max(1);
    let per_symbol = sample_count.div_ceil(num_symbols);
    let days = per_symbol
        .saturating_mul(CALENDAR_NUM)
        .div_ceil(CALENDAR_DEN);
    i64::try_from(days).unwrap_or(i64::MAX).max(min_days)
}

/// Fetch at least `sample_count` complete rows and keep the most recent ones.
pub fn load_feature_samples(
    provider: &dyn FeatureProvider,
    symbols: &[String],
    sample_count: usize,
    min_lookback_days: i64,
) -> Result<FeatureSample, ModelError> {
    if symbols.is_empty() {
        return Err(ModelError::Config("no symbols configured for sampling".into()));
    }
    if sample_count == 0 {
        return Err(ModelError::Config("sample_count must be positive".into()));
    }

    let Some(latest) = provider.latest_partition()? else {
        return Err(ModelError::InsufficientSamples {
            required: sample_count,
            available: 0,
        });
    };
    let earliest = provider.earliest_partition()?.unwrap_or(latest).min(latest);
    let history_days = (latest - earliest).num_days();

    let mut lookback = initial_lookback_days(sample_count, symbols.len(), min_lookback_days);
    loop {
        let start = if lookback >= history_days {
            earliest
        } else {
            latest - Duration::days(lookback)
        };

        let rows = provider.fetch(symbols, start, latest)?;
        let fetched = rows.len();
        let mut dense = dense_rows(rows)?;

        if dense.len() >= sample_count {
            let skip = dense.len() - sample_count;
            let rows: Vec<Vec<f64>> = dense.drain(skip..).map(|(_, _, v)| v).collect();
            debug!(
                start = %start,
                end = %latest,
                fetched,
                kept = rows.len(),
                "feature sample assembled"
            );
            return Ok(FeatureSample::new(rows));
        }

        if start <= earliest {
            return Err(ModelError::InsufficientSamples {
                required: sample_count,
                available: dense.len(),
            });
        }

        debug!(
            lookback_days = lookback,
            complete = dense.len(),
            required = sample_count,
            "widening feature lookback window"
        );
        lookback = lookback.saturating_mul(2);
    }
}

/// Drop incomplete rows, enforce a single width, order by (date, symbol).
fn dense_rows(rows: Vec<FeatureRow>) -> Result<Vec<(NaiveDate, String, Vec<f64>)>, ModelError> {
    let mut width: Option<usize> = None;
    let mut dense = Vec::with_capacity(rows.len());

    for row in rows {
        let Some(values) = row.complete() else {
            continue;
        };
        match width {
            None => width = Some(values.len()),
            Some(w) if w != values.len() => {
                return Err(ModelError::InvalidFormat(format!(
                    "feature row {} {} has {} columns, expected {}",
                    row.symbol,
                    row.date,
                    values.len(),
                    w
                )));
            }
            Some(_) => {}
        }
        dense.push((row.date, row.symbol, values));
    }

    dense.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
    Ok(dense)
}
