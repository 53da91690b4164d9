//! Inference outputs

use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::ModelId;
use crate::risk::RiskTier;

/// Importance of one feature as reported by a tree-based model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Ensemble verdict for one input row.
///
/// Per-model entries exist for every model that was available; a `None`
/// value means that model failed on this row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceResult {
    pub predictions: BTreeMap<ModelId, Option<u8>>,
    pub probabilities: BTreeMap<ModelId, Option<f64>>,
    /// Descending ranking, when some available model exposes one.
    pub feature_importance: Option<Vec<FeatureImportance>>,
    pub ensemble_probability: Option<f64>,
    pub ensemble_class: Option<u8>,
    pub risk_tier: RiskTier,
}

impl InferenceResult {
    /// Probabilities of the models that succeeded.
    pub fn valid_probabilities(&self) -> Vec<f64> {
        self.probabilities.values().filter_map(|p| *p).collect()
    }
}

/// Column-oriented batch output: one array per model plus row-wise ensemble
/// arrays, all of the batch's length.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchPrediction {
    pub model_predictions: BTreeMap<ModelId, Vec<Option<u8>>>,
    pub model_probabilities: BTreeMap<ModelId, Vec<Option<f64>>>,
    pub ensemble_probabilities: Vec<Option<f64>>,
    pub ensemble_predictions: Vec<Option<u8>>,
    pub risk_tiers: Vec<RiskTier>,
}

impl BatchPrediction {
    pub fn len(&self) -> usize {
        self.ensemble_probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ensemble_probabilities.is_empty()
    }

    /// Row `i` as a standalone result.
    pub fn row(&self, i: usize) -> InferenceResult {
        InferenceResult {
            predictions: self
                .model_predictions
                .iter()
                .map(|(id, preds)| (*id, preds[i]))
                .collect(),
            probabilities: self
                .model_probabilities
                .iter()
                .map(|(id, probs)| (*id, probs[i]))
                .collect(),
            feature_importance: None,
            ensemble_probability: self.ensemble_probabilities[i],
            ensemble_class: self.ensemble_predictions[i],
            risk_tier: self.risk_tiers[i],
        }
    }

    pub fn rows(&self) -> Vec<InferenceResult> {
        (0..self.len()).map(|i| self.row(i)).collect()
    }
}
