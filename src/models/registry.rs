//! Process-wide model cache published as immutable snapshots.
//!
//! A load or reload builds a complete [`RegistrySnapshot`] off to the side and
//! swaps it in with one atomic store. Inference takes one snapshot per call,
//! so a concurrent reload can never hand it a half-replaced set of models.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ModelsConfig;
use crate::error::{PredictorError, PredictorResult};
use crate::models::classifier::{Classifier, ModelId};
use crate::models::loader::{LoadedModel, ModelLoader, ModelSource};
use crate::schema::FeatureSchema;
use crate::types::FeatureImportance;

/// One configured model, loaded or not.
#[derive(Clone)]
pub struct ModelEntry {
    pub id: ModelId,
    pub handle: Option<Arc<dyn Classifier>>,
    pub source: ModelSource,
    /// Descending importance ranking, computed once at load.
    pub importance: Option<Vec<FeatureImportance>>,
}

impl ModelEntry {
    pub fn display_name(&self) -> &'static str {
        self.id.display_name()
    }

    pub fn is_available(&self) -> bool {
        self.handle.is_some()
    }
}

impl fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEntry")
            .field("id", &self.id)
            .field("handle", &self.handle.as_ref().map(|h| h.describe()))
            .field("source", &self.source)
            .finish()
    }
}

/// Immutable view of every configured model at one point in time.
#[derive(Debug)]
pub struct RegistrySnapshot {
    entries: Vec<ModelEntry>,
    loaded_at: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            loaded_at: None,
        }
    }

    /// All entries in registry order, unavailable ones included.
    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    /// Entries that have a handle, in registry order.
    pub fn available(&self) -> impl Iterator<Item = (ModelId, &Arc<dyn Classifier>)> {
        self.entries
            .iter()
            .filter_map(|e| e.handle.as_ref().map(|h| (e.id, h)))
    }

    pub fn available_count(&self) -> usize {
        self.available().count()
    }

    pub fn get(&self, id: ModelId) -> Option<&Arc<dyn Classifier>> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .and_then(|e| e.handle.as_ref())
    }

    /// Ranking of the first available model that exposes one.
    pub fn feature_importance(&self) -> Option<&[FeatureImportance]> {
        self.entries
            .iter()
            .filter(|e| e.is_available())
            .find_map(|e| e.importance.as_deref())
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}

/// Owner of every model handle.
pub struct ModelRegistry {
    config: ModelsConfig,
    loader: ModelLoader,
    schema: Arc<FeatureSchema>,
    current: ArcSwap<RegistrySnapshot>,
}

impl ModelRegistry {
    /// Create an empty registry; the first query populates it.
    pub fn new(config: ModelsConfig, schema: Arc<FeatureSchema>) -> Self {
        #[cfg(feature = "onnx")]
        if let Err(e) = crate::models::onnx::init_runtime() {
            tracing::error!(error = %e, "ONNX Runtime initialization failed");
        }

        let loader = ModelLoader::new(&config, schema.len());
        Self {
            config,
            loader,
            schema,
            current: ArcSwap::from_pointee(RegistrySnapshot::empty()),
        }
    }

    /// Create a registry and load every configured model.
    pub fn load(config: ModelsConfig, schema: Arc<FeatureSchema>) -> Self {
        let registry = Self::new(config, schema);
        registry.load_all();
        registry
    }

    /// Resolve every configured model and publish the result.
    pub fn load_all(&self) -> Arc<RegistrySnapshot> {
        let dir = &self.config.models_dir;
        info!(dir = %dir.display(), models = self.config.enabled.len(), "Loading models");

        let entries: Vec<ModelEntry> = self
            .config
            .enabled
            .iter()
            .map(|&id| self.entry(self.loader.load(dir, id)))
            .collect();

        let snapshot = Arc::new(RegistrySnapshot {
            entries,
            loaded_at: Some(Utc::now()),
        });
        self.current.store(Arc::clone(&snapshot));

        let available = snapshot.available_count();
        if available == 0 {
            warn!(dir = %dir.display(), "No models available");
        } else {
            info!(
                available,
                configured = snapshot.entries.len(),
                "Loaded {} of {} models",
                available,
                snapshot.entries.len()
            );
        }
        snapshot
    }

    /// Replace the current snapshot with a freshly loaded one.
    pub fn reload(&self) -> Arc<RegistrySnapshot> {
        info!("Reloading model registry");
        self.load_all()
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Loaded model ids with display names.
    ///
    /// Reloads first when nothing is loaded, so a registry populated before
    /// its artifacts appeared recovers on the next query.
    pub fn available_models(&self) -> BTreeMap<ModelId, String> {
        let mut snapshot = self.snapshot();
        if snapshot.available_count() == 0 {
            snapshot = self.reload();
        }
        snapshot
            .available()
            .map(|(id, _)| (id, id.display_name().to_string()))
            .collect()
    }

    /// Handle for one model.
    pub fn get(&self, id: ModelId) -> PredictorResult<Arc<dyn Classifier>> {
        self.snapshot()
            .get(id)
            .cloned()
            .ok_or(PredictorError::ModelUnavailable(id))
    }

    /// Registry already holding the given handles, in the given order.
    #[cfg(test)]
    pub(crate) fn from_handles(
        config: ModelsConfig,
        schema: Arc<FeatureSchema>,
        handles: Vec<(ModelId, Arc<dyn Classifier>)>,
    ) -> Self {
        let registry = Self::new(config, schema);
        let entries = handles
            .into_iter()
            .map(|(id, handle)| ModelEntry {
                id,
                handle: Some(handle),
                source: ModelSource::Synthetic,
                importance: None,
            })
            .collect();
        registry.current.store(Arc::new(RegistrySnapshot {
            entries,
            loaded_at: Some(Utc::now()),
        }));
        registry
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn config(&self) -> &ModelsConfig {
        &self.config
    }

    fn entry(&self, loaded: LoadedModel) -> ModelEntry {
        let importance = loaded
            .handle
            .as_ref()
            .and_then(|h| h.feature_importances())
            .and_then(|values| self.rank(values));
        ModelEntry {
            id: loaded.id,
            handle: loaded.handle,
            source: loaded.source,
            importance,
        }
    }

    fn rank(&self, values: Vec<f64>) -> Option<Vec<FeatureImportance>> {
        if values.len() != self.schema.len() {
            return None;
        }
        let mut ranking: Vec<FeatureImportance> = self
            .schema
            .names()
            .into_iter()
            .zip(values)
            .map(|(feature, importance)| FeatureImportance {
                feature: feature.to_string(),
                importance,
            })
            .collect();
        ranking.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        Some(ranking)
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::native::NativeModel;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;

    fn config(dir: &std::path::Path, fallback: bool) -> ModelsConfig {
        ModelsConfig {
            models_dir: dir.to_path_buf(),
            synthetic_fallback: fallback,
            ..ModelsConfig::default()
        }
    }

    #[test]
    fn test_synthetic_registry_has_every_model() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::load(config(dir.path(), true), Arc::new(FeatureSchema::hapi()));
        let models = registry.available_models();
        assert_eq!(models.len(), 4);
        assert_eq!(models[&ModelId::RandomForest], "Random Forest");

        let snapshot = registry.snapshot();
        assert!(snapshot.entries().iter().all(|e| e.source == ModelSource::Synthetic));
        let ranking = snapshot.feature_importance().unwrap();
        assert_eq!(ranking.len(), 17);
        assert!(ranking.windows(2).all(|w| w[0].importance >= w[1].importance));
    }

    #[test]
    fn test_empty_registry_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::load(config(dir.path(), false), Arc::new(FeatureSchema::hapi()));
        assert!(registry.available_models().is_empty());
        assert_eq!(registry.snapshot().entries().len(), 4);
        assert!(matches!(
            registry.get(ModelId::Xgboost),
            Err(PredictorError::ModelUnavailable(ModelId::Xgboost))
        ));
    }

    #[test]
    fn test_available_models_self_heals() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(config(dir.path(), false), Arc::new(FeatureSchema::hapi()));
        assert!(registry.snapshot().loaded_at().is_none());
        assert!(registry.available_models().is_empty());

        let model = NativeModel::synthesize(ModelId::NaiveBayes, 17, &mut StdRng::seed_from_u64(3));
        fs::write(
            dir.path().join("Naive Bayes_model.json"),
            serde_json::to_vec(&model).unwrap(),
        )
        .unwrap();

        let models = registry.available_models();
        assert_eq!(models.keys().copied().collect::<Vec<_>>(), vec![ModelId::NaiveBayes]);
        assert!(registry.get(ModelId::NaiveBayes).is_ok());
    }

    #[test]
    fn test_reload_publishes_new_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::load(config(dir.path(), true), Arc::new(FeatureSchema::hapi()));
        let before = registry.snapshot();
        let after = registry.reload();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.available_count(), 4);
        assert!(Arc::ptr_eq(&after, &registry.snapshot()));
    }
}
