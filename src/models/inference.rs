//! Multi-model ensemble inference for HAPI risk

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{PredictorError, PredictorResult};
use crate::models::aggregator::{aggregate, aggregate_rows, classify};
use crate::models::registry::{ModelRegistry, RegistrySnapshot};
use crate::models::ModelId;
use crate::risk::{risk_tiers, RiskTier};
use crate::types::{BatchPrediction, FeatureTable, FeatureVector, InferenceResult};

/// Output of a single model over a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelBatch {
    pub model: ModelId,
    pub predictions: Vec<u8>,
    pub probabilities: Vec<f64>,
    pub risk_tiers: Vec<RiskTier>,
}

/// Runs every available model and combines their probabilities.
///
/// A model that fails on some input is recorded as `None` for that input
/// and never affects the other models.
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    registry: Arc<ModelRegistry>,
}

impl InferenceEngine {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Ensemble verdict for one feature vector.
    pub fn predict_one(&self, vector: &FeatureVector) -> PredictorResult<InferenceResult> {
        let snapshot = self.loaded_snapshot()?;

        let mut predictions = BTreeMap::new();
        let mut probabilities = BTreeMap::new();
        for (id, handle) in snapshot.available() {
            let probability = match handle.predict_proba(vector.as_slice()) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!(model = %id, error = %e, "Model inference failed");
                    None
                }
            };
            predictions.insert(id, probability.map(classify));
            probabilities.insert(id, probability);
        }

        let ensemble_probability = aggregate(probabilities.values());
        let risk_tier = RiskTier::from_probability(ensemble_probability);

        debug!(
            ensemble_probability = ?ensemble_probability,
            risk_tier = %risk_tier,
            model_scores = ?probabilities,
            "Ensemble inference complete"
        );

        Ok(InferenceResult {
            predictions,
            probabilities,
            feature_importance: snapshot.feature_importance().map(<[_]>::to_vec),
            ensemble_probability,
            ensemble_class: ensemble_probability.map(classify),
            risk_tier,
        })
    }

    /// Ensemble verdicts for every row, one batch call per model.
    pub fn predict_many(&self, table: &FeatureTable) -> PredictorResult<BatchPrediction> {
        let snapshot = self.loaded_snapshot()?;
        let rows = table.n_rows();

        let mut model_predictions = BTreeMap::new();
        let mut model_probabilities = BTreeMap::new();
        for (id, handle) in snapshot.available() {
            let column: Vec<Option<f64>> = match handle.predict_proba_batch(table) {
                Ok(probs) if probs.len() == rows => probs.into_iter().map(Some).collect(),
                Ok(probs) => {
                    error!(model = %id, expected = rows, got = probs.len(), "Model returned wrong row count");
                    vec![None; rows]
                }
                Err(e) => {
                    error!(model = %id, error = %e, rows, "Batch inference failed");
                    vec![None; rows]
                }
            };
            model_predictions.insert(id, column.iter().map(|p| p.map(classify)).collect());
            model_probabilities.insert(id, column);
        }

        let ensemble_probabilities = aggregate_rows(&model_probabilities, rows);
        let ensemble_predictions = ensemble_probabilities.iter().map(|p| p.map(classify)).collect();
        let risk_tiers = risk_tiers(&ensemble_probabilities);

        debug!(
            rows,
            models = model_probabilities.len(),
            undetermined = ensemble_probabilities.iter().filter(|p| p.is_none()).count(),
            "Batch inference complete"
        );

        Ok(BatchPrediction {
            model_predictions,
            model_probabilities,
            ensemble_probabilities,
            ensemble_predictions,
            risk_tiers,
        })
    }

    /// Run a single named model over a batch.
    pub fn predict_with_model(&self, id: ModelId, table: &FeatureTable) -> PredictorResult<ModelBatch> {
        let handle = self.registry.get(id)?;
        let probabilities = handle
            .predict_proba_batch(table)
            .map_err(|source| PredictorError::Inference { model: id, source })?;
        let tiers = probabilities.iter().map(|&p| RiskTier::from_probability(Some(p))).collect();
        Ok(ModelBatch {
            model: id,
            predictions: probabilities.iter().map(|&p| classify(p)).collect(),
            probabilities,
            risk_tiers: tiers,
        })
    }

    fn loaded_snapshot(&self) -> PredictorResult<Arc<RegistrySnapshot>> {
        let mut snapshot = self.registry.snapshot();
        if snapshot.loaded_at().is_none() {
            snapshot = self.registry.load_all();
        }
        if snapshot.available_count() == 0 {
            return Err(PredictorError::NoModelsAvailable);
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelsConfig;
    use crate::error::ClassifierError;
    use crate::models::Classifier;
    use crate::schema::{FeatureSchema, FEATURE_COUNT};

    struct Constant(f64);

    impl Classifier for Constant {
        fn n_features(&self) -> usize {
            FEATURE_COUNT
        }

        fn predict_proba(&self, _features: &[f64]) -> Result<f64, ClassifierError> {
            Ok(self.0)
        }

        fn describe(&self) -> String {
            format!("constant {}", self.0)
        }
    }

    struct Broken;

    impl Classifier for Broken {
        fn n_features(&self) -> usize {
            FEATURE_COUNT
        }

        fn predict_proba(&self, _features: &[f64]) -> Result<f64, ClassifierError> {
            Err(ClassifierError::Backend("session poisoned".to_string()))
        }

        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    fn mixed_engine() -> InferenceEngine {
        let handles: Vec<(ModelId, Arc<dyn Classifier>)> = vec![
            (ModelId::Xgboost, Arc::new(Constant(0.8))),
            (ModelId::RandomForest, Arc::new(Broken)),
            (ModelId::LogisticRegression, Arc::new(Constant(0.4))),
            (ModelId::NaiveBayes, Arc::new(Constant(0.6))),
        ];
        let registry = ModelRegistry::from_handles(
            ModelsConfig::default(),
            Arc::new(FeatureSchema::hapi()),
            handles,
        );
        InferenceEngine::new(Arc::new(registry))
    }

    fn engine(fallback: bool) -> (tempfile::TempDir, InferenceEngine) {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelsConfig {
            models_dir: dir.path().to_path_buf(),
            synthetic_fallback: fallback,
            ..ModelsConfig::default()
        };
        let registry = ModelRegistry::new(config, Arc::new(FeatureSchema::hapi()));
        (dir, InferenceEngine::new(Arc::new(registry)))
    }

    #[test]
    fn test_predict_one_uses_every_model() {
        let (_dir, engine) = engine(true);
        let result = engine.predict_one(&FeatureVector::new(vec![0.5; FEATURE_COUNT])).unwrap();

        assert_eq!(result.probabilities.len(), 4);
        let valid = result.valid_probabilities();
        assert_eq!(valid.len(), 4);
        let mean = valid.iter().sum::<f64>() / 4.0;
        let ensemble = result.ensemble_probability.unwrap();
        assert!((ensemble - mean).abs() < 1e-12);
        assert_eq!(result.ensemble_class, Some(classify(ensemble)));
        assert_ne!(result.risk_tier, RiskTier::Unknown);
        assert!(result.feature_importance.is_some());
    }

    #[test]
    fn test_wrong_width_fails_each_model_not_the_call() {
        let (_dir, engine) = engine(true);
        let result = engine.predict_one(&FeatureVector::new(vec![0.0; 3])).unwrap();
        assert!(result.probabilities.values().all(Option::is_none));
        assert!(result.predictions.values().all(Option::is_none));
        assert_eq!(result.ensemble_probability, None);
        assert_eq!(result.ensemble_class, None);
        assert_eq!(result.risk_tier, RiskTier::Unknown);
    }

    #[test]
    fn test_no_models_is_an_error() {
        let (_dir, engine) = engine(false);
        let err = engine.predict_one(&FeatureVector::new(vec![0.0; FEATURE_COUNT])).unwrap_err();
        assert!(matches!(err, PredictorError::NoModelsAvailable));
        let table = FeatureTable::new(FEATURE_COUNT);
        assert!(matches!(engine.predict_many(&table), Err(PredictorError::NoModelsAvailable)));
    }

    #[test]
    fn test_predict_many_matches_predict_one() {
        let (_dir, engine) = engine(true);
        let rows = vec![vec![0.1; FEATURE_COUNT], vec![0.9; FEATURE_COUNT]];
        let table = FeatureTable::from_rows(FEATURE_COUNT, &rows).unwrap();
        let batch = engine.predict_many(&table).unwrap();

        assert_eq!(batch.len(), 2);
        for (i, row) in rows.into_iter().enumerate() {
            let single = engine.predict_one(&FeatureVector::new(row)).unwrap();
            let from_batch = batch.row(i);
            assert_eq!(from_batch.probabilities, single.probabilities);
            assert_eq!(from_batch.ensemble_probability, single.ensemble_probability);
            assert_eq!(from_batch.risk_tier, single.risk_tier);
        }
    }

    #[test]
    fn test_predict_with_model() {
        let (_dir, engine) = engine(true);
        let table = FeatureTable::from_rows(FEATURE_COUNT, &[vec![0.3; FEATURE_COUNT]]).unwrap();
        let out = engine.predict_with_model(ModelId::LogisticRegression, &table).unwrap();
        assert_eq!(out.probabilities.len(), 1);
        assert_eq!(out.predictions[0], classify(out.probabilities[0]));
        assert_eq!(out.risk_tiers, vec![RiskTier::from_probability(Some(out.probabilities[0]))]);

        let narrow = FeatureTable::from_rows(2, &[vec![0.0, 1.0]]).unwrap();
        assert!(matches!(
            engine.predict_with_model(ModelId::Xgboost, &narrow),
            Err(PredictorError::Inference { model: ModelId::Xgboost, .. })
        ));
    }

    #[test]
    fn test_failing_model_is_skipped_in_predict_one() {
        let engine = mixed_engine();
        let result = engine.predict_one(&FeatureVector::new(vec![0.0; FEATURE_COUNT])).unwrap();

        assert_eq!(result.probabilities.len(), 4);
        assert_eq!(result.probabilities[&ModelId::RandomForest], None);
        assert_eq!(result.predictions[&ModelId::RandomForest], None);
        assert_eq!(result.probabilities[&ModelId::Xgboost], Some(0.8));
        assert_eq!(result.predictions[&ModelId::LogisticRegression], Some(0));

        let ensemble = result.ensemble_probability.unwrap();
        assert!((ensemble - 0.6).abs() < 1e-12);
        assert_eq!(result.ensemble_class, Some(1));
        assert_eq!(result.risk_tier, RiskTier::Medium);
    }

    #[test]
    fn test_failing_model_is_skipped_in_predict_many() {
        let engine = mixed_engine();
        let rows = vec![vec![0.0; FEATURE_COUNT]; 3];
        let table = FeatureTable::from_rows(FEATURE_COUNT, &rows).unwrap();
        let batch = engine.predict_many(&table).unwrap();

        assert_eq!(batch.model_probabilities[&ModelId::RandomForest], vec![None; 3]);
        assert_eq!(batch.model_predictions[&ModelId::RandomForest], vec![None; 3]);
        assert_eq!(batch.model_probabilities[&ModelId::NaiveBayes], vec![Some(0.6); 3]);
        for p in &batch.ensemble_probabilities {
            assert!((p.unwrap() - 0.6).abs() < 1e-12);
        }
        assert_eq!(batch.risk_tiers, vec![RiskTier::Medium; 3]);

        assert!(matches!(
            engine.predict_with_model(ModelId::RandomForest, &table),
            Err(PredictorError::Inference { model: ModelId::RandomForest, .. })
        ));
    }
}
