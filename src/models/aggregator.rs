//! Score aggregation for the model ensemble

use std::collections::BTreeMap;

use crate::models::ModelId;
use crate::risk::mean;

/// Probability at or above which a model or the ensemble predicts class 1.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Class for a positive-class probability.
pub fn classify(probability: f64) -> u8 {
    u8::from(probability >= DECISION_THRESHOLD)
}

/// Mean of the probabilities that are present; `None` when all are missing.
pub fn aggregate<'a, I>(probabilities: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a Option<f64>>,
{
    let valid: Vec<f64> = probabilities.into_iter().filter_map(|p| *p).collect();
    mean(&valid)
}

/// Row-wise ensemble over per-model probability columns of length `rows`.
pub fn aggregate_rows(per_model: &BTreeMap<ModelId, Vec<Option<f64>>>, rows: usize) -> Vec<Option<f64>> {
    (0..rows)
        .map(|i| aggregate(per_model.values().filter_map(|column| column.get(i))))
        .collect()
}
