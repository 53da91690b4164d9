//! HAPI Risk Pipeline Library
//!
//! Ensemble inference core for hospital-acquired pressure injury risk:
//! raw clinical fields are normalized into a fixed 17-slot feature vector,
//! scored by several pre-fit classifiers, and combined into a mean
//! probability and a risk tier.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod risk;
pub mod schema;
pub mod service;
pub mod types;

pub use config::AppConfig;
pub use error::{PredictorError, PredictorResult, ValidationError};
pub use metrics::{evaluate, BatchMetrics};
pub use models::{Classifier, InferenceEngine, ModelId, ModelRegistry};
pub use normalizer::FeatureNormalizer;
pub use risk::{risk_tier, RiskTier};
pub use schema::{FeatureSchema, FEATURE_COUNT};
pub use service::{BatchReport, BatchTemplate, PredictorService};
pub use types::{BatchPrediction, FeatureTable, FeatureVector, InferenceResult, RawRecord, RawTable};
