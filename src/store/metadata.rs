//! SQLite-backed model metadata store
//!
//! One row per (strategy, version). Exactly one row per strategy is expected
//! to be `active`; lookups take the most recently activated one regardless.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use super::pool::SqlitePool;
use crate::config::StoreConfig;
use crate::models::ModelMetadata;
use crate::registry::{MetadataStore, ModelError};

const METADATA_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS model_registry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy_name TEXT NOT NULL,
    version TEXT NOT NULL,
    artifact_path TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'staged',
    performance_metrics TEXT NOT NULL DEFAULT '{}',
    config TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    activated_at TEXT,
    UNIQUE (strategy_name, version)
);

CREATE INDEX IF NOT EXISTS idx_model_registry_active
    ON model_registry(strategy_name, status, activated_at DESC);
"#;

const SELECT_COLUMNS: &str = "id, strategy_name, version, artifact_path, status, \
     performance_metrics, config, created_at, activated_at";

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(METADATA_SCHEMA_SQL)
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ModelError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ModelError::InvalidFormat(format!("bad timestamp '{}': {}", raw, e)))
}

/// Raw column values, decoded outside the rusqlite row callback.
struct MetadataRow {
    id: i64,
    strategy_name: String,
    version: String,
    artifact_path: String,
    status: String,
    performance_metrics: String,
    config: String,
    created_at: String,
    activated_at: Option<String>,
}

impl MetadataRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            strategy_name: row.get(1)?,
            version: row.get(2)?,
            artifact_path: row.get(3)?,
            status: row.get(4)?,
            performance_metrics: row.get(5)?,
            config: row.get(6)?,
            created_at: row.get(7)?,
            activated_at: row.get(8)?,
        })
    }

    fn decode(self) -> Result<ModelMetadata, ModelError> {
        let performance_metrics: HashMap<String, f64> =
            serde_json::from_str(&self.performance_metrics).map_err(|e| {
                ModelError::InvalidFormat(format!(
                    "performance_metrics for {} {}: {}",
                    self.strategy_name, self.version, e
                ))
            })?;
        let config: HashMap<String, serde_json::Value> = serde_json::from_str(&self.config)
            .map_err(|e| {
                ModelError::InvalidFormat(format!(
                    "config for {} {}: {}",
                    self.strategy_name, self.version, e
                ))
            })?;

        Ok(ModelMetadata {
            id: self.id,
            strategy_name: self.strategy_name,
            version: self.version,
            artifact_path: self.artifact_path,
            status: self.status,
            performance_metrics,
            config,
            created_at: parse_timestamp(&self.created_at)?,
            activated_at: self.activated_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// No I/O happens here; the first lookup opens the database.
    pub fn new(db_path: &str, max_connections: usize, busy_timeout: Duration) -> Self {
        Self {
            pool: SqlitePool::new(db_path, max_connections, busy_timeout, init_schema),
        }
    }

    pub fn from_config(cfg: &StoreConfig) -> Self {
        Self::new(
            &cfg.metadata_db_path,
            cfg.max_connections,
            Duration::from_millis(cfg.busy_timeout_ms),
        )
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or refresh a `staged` row for (strategy, version). Returns its id.
    pub fn register_model(
        &self,
        strategy: &str,
        version: &str,
        artifact_path: &str,
        performance_metrics: &HashMap<String, f64>,
        config: &HashMap<String, serde_json::Value>,
    ) -> Result<i64, ModelError> {
        let metrics_json = serde_json::to_string(performance_metrics)
            .map_err(|e| ModelError::InvalidFormat(e.to_string()))?;
        let config_json =
            serde_json::to_string(config).map_err(|e| ModelError::InvalidFormat(e.to_string()))?;

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO model_registry
                (strategy_name, version, artifact_path, status,
                 performance_metrics, config, created_at)
             VALUES (?1, ?2, ?3, 'staged', ?4, ?5, ?6)
             ON CONFLICT(strategy_name, version) DO UPDATE SET
                artifact_path = excluded.artifact_path,
                performance_metrics = excluded.performance_metrics,
                config = excluded.config",
            params![
                strategy,
                version,
                artifact_path,
                metrics_json,
                config_json,
                timestamp(Utc::now())
            ],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM model_registry WHERE strategy_name = ?1 AND version = ?2",
            params![strategy, version],
            |row| row.get(0),
        )?;

        info!(strategy, version, id, "model version registered");
        Ok(id)
    }

    /// Make `version` the active row for `strategy`, retiring the others.
    pub fn activate(&self, strategy: &str, version: &str) -> Result<ModelMetadata, ModelError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE model_registry SET status = 'retired'
             WHERE strategy_name = ?1 AND status = 'active' AND version != ?2",
            params![strategy, version],
        )?;
        let updated = tx.execute(
            "UPDATE model_registry SET status = 'active', activated_at = ?3
             WHERE strategy_name = ?1 AND version = ?2",
            params![strategy, version, timestamp(Utc::now())],
        )?;
        if updated == 0 {
            // tx rolls back on drop
            return Err(ModelError::NotFound(format!(
                "no registered version {} for strategy {}",
                version, strategy
            )));
        }

        let row = tx.query_row(
            &format!(
                "SELECT {} FROM model_registry WHERE strategy_name = ?1 AND version = ?2",
                SELECT_COLUMNS
            ),
            params![strategy, version],
            MetadataRow::from_row,
        )?;
        tx.commit()?;

        info!(strategy, version, "model version activated");
        row.decode()
    }

    /// All versions for a strategy, newest first.
    pub fn list_versions(&self, strategy: &str) -> Result<Vec<ModelMetadata>, ModelError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM model_registry WHERE strategy_name = ?1 ORDER BY id DESC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![strategy], MetadataRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(MetadataRow::decode).collect()
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn get_active_model(&self, strategy: &str) -> Result<ModelMetadata, ModelError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM model_registry
                     WHERE strategy_name = ?1 AND status = 'active'
                     ORDER BY activated_at DESC, id DESC
                     LIMIT 1",
                    SELECT_COLUMNS
                ),
                params![strategy],
                MetadataRow::from_row,
            )
            .optional()?;
        drop(conn);

        match row {
            Some(row) => row.decode(),
            None => Err(ModelError::NotFound(format!(
                "no active model for strategy {}",
                strategy
            ))),
        }
    }

    fn close(&self) {
        self.pool.close();
    }
}
