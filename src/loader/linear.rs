//! JSON linear model artifacts
//!
//! `{"format": "linear", "weights": [...], "bias": 0.0, "scale": 1.0}`
//! predict(row) = scale * (bias + w . row)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::registry::{Model, ModelError, ModelLoader};

pub const LINEAR_FORMAT: &str = "linear";

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub format: String,
    pub weights: Vec<f64>,
    #[serde(default)]
    pub bias: f64,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

impl LinearModel {
    pub fn new(weights: Vec<f64>, bias: f64, scale: f64) -> Self {
        Self {
            format: LINEAR_FORMAT.to_string(),
            weights,
            bias,
            scale,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ModelError> {
        let model: Self = serde_json::from_str(raw)
            .map_err(|e| ModelError::InvalidFormat(format!("unparseable artifact: {}", e)))?;
        model.check()?;
        Ok(model)
    }

    fn check(&self) -> Result<(), ModelError> {
        if self.format != LINEAR_FORMAT {
            return Err(ModelError::InvalidFormat(format!(
                "unsupported artifact format '{}'",
                self.format
            )));
        }
        if self.weights.is_empty() {
            return Err(ModelError::InvalidFormat("artifact has no weights".into()));
        }
        if !self.bias.is_finite()
            || !self.scale.is_finite()
            || self.weights.iter().any(|w| !w.is_finite())
        {
            return Err(ModelError::InvalidFormat(
                "artifact contains non-finite parameters".into(),
            ));
        }
        Ok(())
    }

    /// Write the artifact as pretty JSON.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl Model for LinearModel {
    fn num_features(&self) -> usize {
        self.weights.len()
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                if row.len() != self.weights.len() {
                    return Err(ModelError::Prediction(format!(
                        "row {} has {} features, model expects {}",
                        i,
                        row.len(),
                        self.weights.len()
                    )));
                }
                let dot: f64 = row.iter().zip(&self.weights).map(|(x, w)| x * w).sum();
                Ok(self.scale * (self.bias + dot))
            })
            .collect()
    }
}

/// Loads linear artifacts, resolving relative paths against an optional root.
#[derive(Debug, Clone, Default)]
pub struct JsonModelLoader {
    root: Option<PathBuf>,
}

impl JsonModelLoader {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl ModelLoader for JsonModelLoader {
    fn load(&self, path: &str) -> Result<Arc<dyn Model>, ModelError> {
        let resolved = self.resolve(path);
        let raw = std::fs::read_to_string(&resolved).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ModelError::NotFound(format!("model artifact {}", resolved.display()))
            }
            _ => ModelError::InvalidFormat(format!(
                "unreadable artifact {}: {}",
                resolved.display(),
                e
            )),
        })?;

        let model = LinearModel::from_json(&raw)?;
        debug!(path = %resolved.display(), features = model.num_features(), "linear model loaded");
        Ok(Arc::new(model))
    }
}
