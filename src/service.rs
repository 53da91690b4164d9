//! Prediction facade used by the command line and embedding callers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::ModelsConfig;
use crate::error::PredictorResult;
use crate::metrics::{evaluate, parse_label, BatchMetrics, LABEL_COLUMN, LABEL_COLUMN_ALIAS};
use crate::models::{InferenceEngine, ModelId, ModelRegistry};
use crate::normalizer::FeatureNormalizer;
use crate::schema::{FeatureKind, FeatureSchema};
use crate::types::{BatchPrediction, InferenceResult, RawRecord, RawTable};

/// Result of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub row_count: usize,
    pub results: Vec<InferenceResult>,
    pub predictions: BatchPrediction,
    /// Present only when the batch carried labels and some row was evaluable.
    pub metrics: Option<BatchMetrics>,
}

/// Column list and example rows for batch uploads.
#[derive(Debug, Clone, Serialize)]
pub struct BatchTemplate {
    pub columns: Vec<String>,
    pub rows: Vec<RawRecord>,
}

/// Schema, registry and engine wired together.
#[derive(Debug, Clone)]
pub struct PredictorService {
    normalizer: FeatureNormalizer,
    engine: InferenceEngine,
}

impl PredictorService {
    /// Build the service and load every configured model.
    pub fn new(config: ModelsConfig) -> Self {
        let schema = Arc::new(FeatureSchema::hapi());
        let registry = Arc::new(ModelRegistry::load(config, Arc::clone(&schema)));
        Self::with_registry(schema, registry)
    }

    pub fn with_registry(schema: Arc<FeatureSchema>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            normalizer: FeatureNormalizer::new(schema),
            engine: InferenceEngine::new(registry),
        }
    }

    pub fn normalizer(&self) -> &FeatureNormalizer {
        &self.normalizer
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    pub fn available_models(&self) -> BTreeMap<ModelId, String> {
        self.engine.registry().available_models()
    }

    /// Reload every model and report what is now available.
    pub fn reload(&self) -> BTreeMap<ModelId, String> {
        self.engine
            .registry()
            .reload()
            .available()
            .map(|(id, _)| (id, id.display_name().to_string()))
            .collect()
    }

    /// Validate and score one record.
    pub fn predict_record(&self, raw: &RawRecord) -> PredictorResult<InferenceResult> {
        let vector = self.normalizer.normalize_one(raw)?;
        self.engine.predict_one(&vector)
    }

    /// Score a batch, evaluating it when it carries an `actual_label` column.
    pub fn predict_table(&self, mut table: RawTable) -> PredictorResult<BatchReport> {
        let labels: Option<Vec<Option<u8>>> = table
            .take_column(&[LABEL_COLUMN, LABEL_COLUMN_ALIAS])
            .map(|cells| cells.iter().map(parse_label).collect());

        let features = self.normalizer.normalize_many(&table)?;
        let predictions = self.engine.predict_many(&features)?;

        let metrics = labels.as_deref().and_then(|labels| {
            evaluate(
                &predictions.ensemble_predictions,
                &predictions.ensemble_probabilities,
                labels,
            )
        });

        let report = BatchReport {
            batch_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            row_count: predictions.len(),
            results: predictions.rows(),
            predictions,
            metrics,
        };
        info!(
            batch_id = %report.batch_id,
            rows = report.row_count,
            labelled = labels.is_some(),
            "Batch prediction complete"
        );
        Ok(report)
    }

    /// Upload template: identifiers, every feature, the label column, and two
    /// example rows.
    pub fn batch_template(&self) -> BatchTemplate {
        let schema = self.normalizer.schema();
        let mut columns = vec!["patient_id".to_string(), "age".to_string()];
        columns.extend(schema.names().into_iter().map(str::to_string));
        columns.push(LABEL_COLUMN.to_string());

        let rows = (1..=2u32)
            .map(|i| {
                let mut row = RawRecord::new();
                row.insert("patient_id".to_string(), json!(format!("P{}", 10000 + i)));
                row.insert("age".to_string(), json!(70 + i));
                for slot in schema.slots() {
                    let value = match (&slot.kind, slot.name.as_str()) {
                        (FeatureKind::Numeric { .. }, "hospital_days") => json!(3 + i),
                        (FeatureKind::Numeric { .. }, "white_cell_count") => json!(7.5),
                        (FeatureKind::Numeric { .. }, "serum_potassium") => json!(4.2),
                        (FeatureKind::Numeric { .. }, "albumin") => json!(42.0),
                        (FeatureKind::Numeric { batch_default }, _) => {
                            json!(batch_default.unwrap_or(0.0))
                        }
                        (FeatureKind::Categorical(codec), _) => {
                            let labels = codec.labels();
                            labels
                                .get(i as usize % labels.len().max(1))
                                .map_or(Value::Null, |l| json!(l))
                        }
                    };
                    row.insert(slot.name.clone(), value);
                }
                row.insert(LABEL_COLUMN.to_string(), json!(i % 2));
                row
            })
            .collect();

        BatchTemplate { columns, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskTier;

    fn service() -> (tempfile::TempDir, PredictorService) {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelsConfig {
            models_dir: dir.path().to_path_buf(),
            ..ModelsConfig::default()
        };
        (dir, PredictorService::new(config))
    }

    #[test]
    fn test_template_rows_are_valid_records() {
        let (_dir, service) = service();
        let template = service.batch_template();
        assert_eq!(template.columns.len(), 17 + 3);
        assert_eq!(template.rows.len(), 2);
        for row in &template.rows {
            let vector = service.normalizer().normalize_one(row).unwrap();
            assert_eq!(vector.len(), 17);
        }
        assert_eq!(template.rows[0]["friction_shear"], json!("potential"));
        assert_eq!(template.rows[1]["smoking_history"], json!("none"));
    }

    #[test]
    fn test_template_batch_round_trip_with_metrics() {
        let (_dir, service) = service();
        let table = RawTable::from_records(service.batch_template().rows);
        let report = service.predict_table(table).unwrap();

        assert_eq!(report.row_count, 2);
        assert_eq!(report.results.len(), 2);
        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.evaluated_rows, 2);
        assert!(report.results.iter().all(|r| r.risk_tier != RiskTier::Unknown));
    }

    #[test]
    fn test_unlabelled_batch_has_no_metrics() {
        let (_dir, service) = service();
        let mut rows = service.batch_template().rows;
        for row in &mut rows {
            row.remove(LABEL_COLUMN);
        }
        let report = service.predict_table(RawTable::from_records(rows)).unwrap();
        assert!(report.metrics.is_none());
    }

    #[test]
    fn test_reload_reports_models() {
        let (_dir, service) = service();
        assert_eq!(service.reload().len(), 4);
        assert_eq!(service.available_models().len(), 4);
    }
}
