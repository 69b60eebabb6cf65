//! SQLite feature partitions for validation sampling
//!
//! Rows are precomputed upstream (indicator pipeline) and stored one per
//! (symbol, trading date) as a JSON array. Nulls mark missing indicators.

use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection};
use std::time::Duration;
use tracing::debug;

use super::pool::SqlitePool;
use crate::config::StoreConfig;
use crate::models::FeatureRow;
use crate::registry::{FeatureProvider, ModelError};

const FEATURE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS feature_rows (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    values_json TEXT NOT NULL,
    PRIMARY KEY (symbol, date)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_feature_rows_date
    ON feature_rows(date, symbol);
"#;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(FEATURE_SCHEMA_SQL)
}

fn parse_date(raw: &str) -> Result<NaiveDate, ModelError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| ModelError::InvalidFormat(format!("bad partition date '{}': {}", raw, e)))
}

fn parse_values(raw: &str) -> Result<Vec<Option<f64>>, ModelError> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| ModelError::InvalidFormat(format!("bad feature vector: {}", e)))?;
    Ok(values.iter().map(serde_json::Value::as_f64).collect())
}

pub struct SqliteFeatureProvider {
    pool: SqlitePool,
}

impl SqliteFeatureProvider {
    pub fn new(db_path: &str, max_connections: usize, busy_timeout: Duration) -> Self {
        Self {
            pool: SqlitePool::new(db_path, max_connections, busy_timeout, init_schema),
        }
    }

    pub fn from_config(cfg: &StoreConfig) -> Self {
        Self::new(
            &cfg.feature_db_path,
            cfg.max_connections,
            Duration::from_millis(cfg.busy_timeout_ms),
        )
    }

    /// Upsert rows in a single transaction. Returns the number written.
    pub fn store_batch(&self, rows: &[FeatureRow]) -> Result<usize, ModelError> {
        if rows.is_empty() {
            return Ok(0);
        }

        // Serialize outside the transaction
        let serialized: Vec<(String, String, String)> = rows
            .iter()
            .map(|r| -> Result<(String, String, String), ModelError> {
                let values = serde_json::to_string(&r.values)
                    .map_err(|e| ModelError::InvalidFormat(e.to_string()))?;
                Ok((r.symbol.clone(), r.date.format(DATE_FORMAT).to_string(), values))
            })
            .collect::<Result<_, ModelError>>()?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO feature_rows (symbol, date, values_json)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (symbol, date, values) in &serialized {
                stmt.execute(params![symbol, date, values])?;
            }
        }
        tx.commit()?;

        debug!(rows = serialized.len(), "feature rows stored");
        Ok(serialized.len())
    }

    fn partition_bound(&self, sql: &str) -> Result<Option<NaiveDate>, ModelError> {
        let conn = self.pool.get()?;
        let raw: Option<String> = conn.query_row(sql, [], |row| row.get(0))?;
        raw.as_deref().map(parse_date).transpose()
    }

    pub fn close(&self) {
        self.pool.close();
    }
}

impl FeatureProvider for SqliteFeatureProvider {
    fn latest_partition(&self) -> Result<Option<NaiveDate>, ModelError> {
        self.partition_bound("SELECT MAX(date) FROM feature_rows")
    }

    fn earliest_partition(&self) -> Result<Option<NaiveDate>, ModelError> {
        self.partition_bound("SELECT MIN(date) FROM feature_rows")
    }

    fn fetch(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FeatureRow>, ModelError> {
        if symbols.is_empty() || start > end {
            return Ok(Vec::new());
        }

        let placeholders: Vec<String> = (0..symbols.len()).map(|i| format!("?{}", i + 3)).collect();
        let sql = format!(
            "SELECT symbol, date, values_json FROM feature_rows
             WHERE date >= ?1 AND date <= ?2 AND symbol IN ({})
             ORDER BY date, symbol",
            placeholders.join(", ")
        );

        let mut bind = Vec::with_capacity(symbols.len() + 2);
        bind.push(start.format(DATE_FORMAT).to_string());
        bind.push(end.format(DATE_FORMAT).to_string());
        bind.extend(symbols.iter().cloned());

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(bind.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(symbol, date, values)| -> Result<FeatureRow, ModelError> {
                Ok(FeatureRow {
                    symbol,
                    date: parse_date(&date)?,
                    values: parse_values(&values)?,
                })
            })
            .collect()
    }
}
