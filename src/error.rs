//! Error types for the prediction core.
//!
//! Field-level input problems surface as [`ValidationError`]; everything a
//! caller can act on is wrapped in [`PredictorError`]. Artifact and per-model
//! errors stay internal to the registry and the ensemble engine, where they
//! are logged and degraded rather than propagated.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::ModelId;

/// A single-record input that cannot become a complete feature vector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing field: {field}")]
    MissingField { field: String },

    #[error("field '{field}' must be numeric, got {value}")]
    NotNumeric { field: String, value: String },

    #[error("field '{field}' has invalid value {value} (allowed: {})", allowed.join(", "))]
    UnknownLabel {
        field: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("no category codec for field '{field}'")]
    NoCodec { field: String },

    #[error("missing model features after mapping: {}", features.join(", "))]
    MissingFeatures { features: Vec<String> },

    #[error("undefined values after assembly: {}", features.join(", "))]
    UndefinedValues { features: Vec<String> },
}

impl ValidationError {
    /// Names of the fields this error is about.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Self::MissingField { field }
            | Self::NotNumeric { field, .. }
            | Self::UnknownLabel { field, .. }
            | Self::NoCodec { field } => vec![field.as_str()],
            Self::MissingFeatures { features } | Self::UndefinedValues { features } => {
                features.iter().map(String::as_str).collect()
            }
        }
    }
}

/// Errors returned to callers of the prediction core.
#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("model '{0}' is not available")]
    ModelUnavailable(ModelId),

    #[error("no prediction models are available")]
    NoModelsAvailable,

    #[error("feature '{feature}' cannot be produced: {reason}")]
    StructuralFeature { feature: String, reason: String },

    #[error("model '{model}' failed: {source}")]
    Inference {
        model: ModelId,
        #[source]
        source: ClassifierError,
    },
}

impl PredictorError {
    /// True for errors caused by the caller's input (4xx-class).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::ModelUnavailable(_) | Self::StructuralFeature { .. }
        )
    }
}

/// Failure to turn an artifact file into a usable classifier.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported artifact format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("invalid model: {0}")]
    Invalid(String),

    #[error("onnx runtime error: {0}")]
    Onnx(String),
}

/// Failure of one classifier on one call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifierError {
    #[error("expected {expected} features, got {got}")]
    FeatureCount { expected: usize, got: usize },

    #[error("model produced an invalid probability: {0}")]
    InvalidProbability(f64),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type PredictorResult<T> = Result<T, PredictorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_label_message_lists_domain() {
        let err = ValidationError::UnknownLabel {
            field: "mobility".to_string(),
            value: "\"flying\"".to_string(),
            allowed: vec!["unrestricted".to_string(), "restricted".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("mobility"));
        assert!(msg.contains("unrestricted, restricted"));
        assert_eq!(err.fields(), vec!["mobility"]);
    }

    #[test]
    fn client_errors_are_classified() {
        let validation: PredictorError = ValidationError::MissingField {
            field: "albumin".to_string(),
        }
        .into();
        assert!(validation.is_client_error());
        assert!(PredictorError::ModelUnavailable(ModelId::NaiveBayes).is_client_error());
        assert!(!PredictorError::NoModelsAvailable.is_client_error());
    }
}
