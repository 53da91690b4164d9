//! Classifier capability shared by every model backend

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ClassifierError;
use crate::types::FeatureTable;

/// Stable short identifier of a configured model.
///
/// Declaration order is registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelId {
    Xgboost,
    RandomForest,
    LogisticRegression,
    NaiveBayes,
}

impl ModelId {
    pub const ALL: [ModelId; 4] = [
        ModelId::Xgboost,
        ModelId::RandomForest,
        ModelId::LogisticRegression,
        ModelId::NaiveBayes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Xgboost => "xgboost",
            ModelId::RandomForest => "random_forest",
            ModelId::LogisticRegression => "logistic_regression",
            ModelId::NaiveBayes => "naive_bayes",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelId::Xgboost => "XGBoost",
            ModelId::RandomForest => "Random Forest",
            ModelId::LogisticRegression => "Logistic Regression",
            ModelId::NaiveBayes => "Naive Bayes",
        }
    }

    /// Primary artifact filename, e.g. `Random Forest_model.json`.
    pub fn canonical_filename(&self) -> String {
        format!("{}_model.json", self.display_name())
    }

    /// Alternate spellings tried, in order, after the canonical filename.
    pub fn alternate_filenames(&self) -> Vec<String> {
        let id = self.as_str();
        let display = self.display_name();
        let compact: String = display.chars().filter(|c| !c.is_whitespace()).collect();
        vec![
            format!("{id}_model.json"),
            format!("{id}.json"),
            format!("{compact}.json"),
            format!("{display}_model.onnx"),
            format!("{id}_model.onnx"),
            format!("{id}.onnx"),
        ]
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ModelId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown model id: {wanted}"))
    }
}

/// A loaded binary classifier.
///
/// Implementations never mutate shared state, so one handle can serve
/// concurrent callers.
pub trait Classifier: Send + Sync {
    /// Width of the feature vector the model was fit on.
    fn n_features(&self) -> usize;

    /// Positive-class probability for one row.
    fn predict_proba(&self, features: &[f64]) -> Result<f64, ClassifierError>;

    /// Predicted class for one row.
    fn predict(&self, features: &[f64]) -> Result<u8, ClassifierError> {
        Ok(u8::from(self.predict_proba(features)? >= 0.5))
    }

    /// Positive-class probabilities for every row of a table.
    fn predict_proba_batch(&self, table: &FeatureTable) -> Result<Vec<f64>, ClassifierError> {
        check_width(self.n_features(), table.n_features())?;
        table.rows().map(|row| self.predict_proba(row)).collect()
    }

    /// Per-feature importances in slot order, if the family exposes them.
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }

    /// Short description for logs.
    fn describe(&self) -> String;
}

pub(crate) fn check_width(expected: usize, got: usize) -> Result<(), ClassifierError> {
    if expected == got {
        Ok(())
    } else {
        Err(ClassifierError::FeatureCount { expected, got })
    }
}

pub(crate) fn check_probability(p: f64) -> Result<f64, ClassifierError> {
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(ClassifierError::InvalidProbability(p))
    }
}
