//! Error taxonomy for model loading, reloading and validation.

use std::fmt;

/// Which side of a shadow comparison an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    /// The model currently serving
    Old,
    /// The candidate awaiting promotion
    New,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Old => write!(f, "old model"),
            Self::New => write!(f, "new model"),
        }
    }
}

/// Errors surfaced by the registry and its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// No active metadata row, or the artifact file is missing
    NotFound(String),
    /// Metadata store unreachable, busy or out of pooled connections
    Transient(String),
    /// Artifact exists but cannot be parsed into a model
    InvalidFormat(String),
    /// Candidate failed its trial prediction after loading
    SanityCheckFailed { version: String, reason: String },
    /// A model failed to produce predictions
    Prediction(String),
    /// Validator failed or produced a malformed result
    Validation(String),
    /// Feature sample width does not match a model's input width
    DimensionMismatch {
        model: ModelRole,
        expected: usize,
        actual: usize,
    },
    /// Not enough complete feature rows in all available history
    InsufficientSamples { required: usize, available: usize },
    Config(String),
    /// Registry has been shut down
    Closed,
}

impl ModelError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Errors that mean "this candidate cannot be served".
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::InvalidFormat(_) | Self::SanityCheckFailed { .. }
        )
    }

    /// Short stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Transient(_) => "transient",
            Self::InvalidFormat(_) => "invalid_format",
            Self::SanityCheckFailed { .. } => "sanity_check_failed",
            Self::Prediction(_) => "prediction",
            Self::Validation(_) => "validation",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::InsufficientSamples { .. } => "insufficient_samples",
            Self::Config(_) => "config",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "not found: {}", what),
            Self::Transient(why) => write!(f, "metadata store unavailable: {}", why),
            Self::InvalidFormat(why) => write!(f, "invalid model artifact: {}", why),
            Self::SanityCheckFailed { version, reason } => {
                write!(f, "sanity check failed for version {}: {}", version, reason)
            }
            Self::Prediction(why) => write!(f, "prediction failed: {}", why),
            Self::Validation(why) => write!(f, "shadow validation error: {}", why),
            Self::DimensionMismatch {
                model,
                expected,
                actual,
            } => write!(
                f,
                "feature dimension mismatch for {}: expected {} features, sample has {}",
                model, expected, actual
            ),
            Self::InsufficientSamples {
                required,
                available,
            } => write!(
                f,
                "insufficient feature samples: required {}, available {}",
                required, available
            ),
            Self::Config(why) => write!(f, "invalid configuration: {}", why),
            Self::Closed => write!(f, "model registry is closed"),
        }
    }
}

impl std::error::Error for ModelError {}

impl From<rusqlite::Error> for ModelError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound(err.to_string()),
            other => Self::Transient(other.to_string()),
        }
    }
}
