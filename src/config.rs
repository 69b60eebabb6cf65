//! Model reload configuration
//!
//! Plain values. Library types take these structs as arguments and never read
//! the environment themselves; the binary builds them with `from_env()`.

use serde::{Deserialize, Serialize};

use crate::registry::ModelError;

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
}

/// Shadow validation thresholds and sampling universe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowValidationConfig {
    /// Symbols whose recent features make up the validation sample
    pub symbols: Vec<String>,
    /// Complete feature rows required per validation
    pub sample_count: usize,
    /// Minimum Pearson correlation between old and new predictions
    pub correlation_threshold: f64,
    /// Maximum mean(|old - new|) / mean(|old|)
    pub divergence_threshold: f64,
    /// Shortest lookback window in calendar days
    pub min_lookback_days: i64,
}

impl Default for ShadowValidationConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["SPY".into(), "QQQ".into(), "IWM".into()],
            sample_count: 200,
            correlation_threshold: 0.5,
            divergence_threshold: 0.5,
            min_lookback_days: 60,
        }
    }
}

impl ShadowValidationConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SHADOW_VALIDATION_SYMBOLS") {
            let symbols: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !symbols.is_empty() {
                cfg.symbols = symbols;
            }
        }
        if let Ok(v) = std::env::var("SHADOW_VALIDATION_SAMPLE_COUNT") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 {
                    cfg.sample_count = n;
                }
            }
        }
        if let Ok(v) = std::env::var("SHADOW_VALIDATION_CORRELATION_THRESHOLD") {
            if let Ok(t) = v.parse::<f64>() {
                if t.is_finite() && (-1.0..=1.0).contains(&t) {
                    cfg.correlation_threshold = t;
                }
            }
        }
        if let Ok(v) = std::env::var("SHADOW_VALIDATION_DIVERGENCE_THRESHOLD") {
            if let Ok(t) = v.parse::<f64>() {
                if t.is_finite() && t >= 0.0 {
                    cfg.divergence_threshold = t;
                }
            }
        }
        if let Ok(v) = std::env::var("SHADOW_VALIDATION_MIN_LOOKBACK_DAYS") {
            if let Ok(d) = v.parse::<i64>() {
                if d > 0 {
                    cfg.min_lookback_days = d;
                }
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.symbols.is_empty() {
            return Err(ModelError::Config("symbols must not be empty".into()));
        }
        if self.sample_count == 0 {
            return Err(ModelError::Config("sample_count must be positive".into()));
        }
        if !self.correlation_threshold.is_finite() || !self.divergence_threshold.is_finite() {
            return Err(ModelError::Config("thresholds must be finite".into()));
        }
        if self.min_lookback_days <= 0 {
            return Err(ModelError::Config("min_lookback_days must be positive".into()));
        }
        Ok(())
    }
}

/// How the watcher drives the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    pub strategy: String,
    pub check_interval_secs: u64,
    pub shadow_validation_enabled: bool,
    pub skip_shadow_validation: bool,
    /// Run validation on the blocking pool instead of inside the check
    pub async_validation: bool,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            strategy: "default".into(),
            check_interval_secs: 60,
            shadow_validation_enabled: true,
            skip_shadow_validation: false,
            async_validation: true,
        }
    }
}

impl ReloadConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("MODEL_RELOAD_STRATEGY") {
            if !v.trim().is_empty() {
                cfg.strategy = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("MODEL_RELOAD_INTERVAL_SECS") {
            if let Ok(s) = v.parse::<u64>() {
                if s >= 1 {
                    cfg.check_interval_secs = s;
                }
            }
        }
        if let Some(b) = env_flag("MODEL_RELOAD_SHADOW_VALIDATION") {
            cfg.shadow_validation_enabled = b;
        }
        if let Some(b) = env_flag("MODEL_RELOAD_SKIP_SHADOW_VALIDATION") {
            cfg.skip_shadow_validation = b;
        }
        if let Some(b) = env_flag("MODEL_RELOAD_ASYNC_VALIDATION") {
            cfg.async_validation = b;
        }

        cfg
    }
}

/// SQLite locations and pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub metadata_db_path: String,
    pub feature_db_path: String,
    pub max_connections: usize,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            metadata_db_path: "model_registry.db".into(),
            feature_db_path: "features.db".into(),
            max_connections: 4,
            busy_timeout_ms: 2000,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("MODEL_STORE_METADATA_DB") {
            cfg.metadata_db_path = v;
        }
        if let Ok(v) = std::env::var("MODEL_STORE_FEATURE_DB") {
            cfg.feature_db_path = v;
        }
        if let Ok(v) = std::env::var("MODEL_STORE_MAX_CONNECTIONS") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 {
                    cfg.max_connections = n;
                }
            }
        }
        if let Ok(v) = std::env::var("MODEL_STORE_BUSY_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.busy_timeout_ms = ms;
            }
        }

        cfg
    }
}
