//! Data types passed between pipeline stages

pub mod features;
pub mod prediction;
pub mod record;

pub use features::{FeatureTable, FeatureVector};
pub use prediction::{BatchPrediction, FeatureImportance, InferenceResult};
pub use record::{RawRecord, RawTable};
