//! Model artifact resolution and loading

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::ModelsConfig;
use crate::error::ArtifactError;
use crate::models::classifier::{Classifier, ModelId};
use crate::models::native::NativeModel;

/// Where a registry entry's handle came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Artifact(PathBuf),
    Synthetic,
    Unavailable,
}

/// Outcome of resolving one model id.
pub struct LoadedModel {
    pub id: ModelId,
    pub handle: Option<Arc<dyn Classifier>>,
    pub source: ModelSource,
}

/// Resolves model ids to artifacts and loads them.
#[derive(Debug, Clone)]
pub struct ModelLoader {
    n_features: usize,
    synthetic_fallback: bool,
    synthetic_seed: u64,
    #[cfg_attr(not(feature = "onnx"), allow(dead_code))]
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a loader for models fit on `n_features` inputs.
    pub fn new(config: &ModelsConfig, n_features: usize) -> Self {
        Self {
            n_features,
            synthetic_fallback: config.synthetic_fallback,
            synthetic_seed: config.synthetic_seed,
            onnx_threads: config.onnx_threads.max(1),
        }
    }

    /// Candidate artifact paths for `id`, in resolution order.
    ///
    /// Fixed spellings come first; directory entries whose name contains the
    /// model id (case-insensitively) follow in sorted order.
    pub fn candidates(&self, dir: &Path, id: ModelId) -> Vec<PathBuf> {
        let canonical = dir.join(id.canonical_filename());
        let mut paths = Vec::new();
        if canonical.is_file() {
            paths.push(canonical);
        } else {
            warn!(model = %id, path = %canonical.display(), "Canonical model file not found");
        }
        for path in id.alternate_filenames().into_iter().map(|name| dir.join(name)) {
            if path.is_file() {
                paths.push(path);
            } else {
                debug!(model = %id, path = %path.display(), "Alternate model file not found");
            }
        }

        let needles = [
            id.as_str().to_lowercase(),
            id.display_name().to_lowercase(),
        ];
        match fs::read_dir(dir) {
            Ok(entries) => {
                let mut scanned: Vec<PathBuf> = entries
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|p| p.is_file())
                    .filter(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .map(|n| n.to_lowercase())
                            .is_some_and(|n| needles.iter().any(|needle| n.contains(needle.as_str())))
                    })
                    .collect();
                scanned.sort();
                for path in scanned {
                    if !paths.contains(&path) {
                        paths.push(path);
                    }
                }
            }
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Model directory not readable");
            }
        }
        paths
    }

    /// Load one artifact, dispatching on its extension.
    pub fn load_artifact(&self, path: &Path) -> Result<Arc<dyn Classifier>, ArtifactError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("json") => {
                let bytes = fs::read(path).map_err(|source| ArtifactError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let model: NativeModel =
                    serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Json {
                        path: path.to_path_buf(),
                        source,
                    })?;
                model.validate(self.n_features)?;
                Ok(Arc::new(model))
            }
            #[cfg(feature = "onnx")]
            Some("onnx") => {
                let model = crate::models::onnx::OnnxModel::load(path, self.n_features, self.onnx_threads)?;
                Ok(Arc::new(model))
            }
            _ => Err(ArtifactError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Resolve `id` against `dir`, falling back to a synthetic stand-in.
    pub fn load(&self, dir: &Path, id: ModelId) -> LoadedModel {
        for path in self.candidates(dir, id) {
            debug!(model = %id, path = %path.display(), "Trying model artifact");
            match self.load_artifact(&path) {
                Ok(handle) => {
                    info!(model = %id, path = %path.display(), kind = %handle.describe(), "Model loaded");
                    return LoadedModel {
                        id,
                        handle: Some(handle),
                        source: ModelSource::Artifact(path),
                    };
                }
                Err(e) => {
                    error!(model = %id, path = %path.display(), error = %e, "Failed to load model artifact");
                }
            }
        }

        if self.synthetic_fallback {
            warn!(model = %id, dir = %dir.display(), "No usable artifact, using synthetic stand-in");
            let mut rng = StdRng::seed_from_u64(self.synthetic_seed.wrapping_add(id as u64));
            let model = NativeModel::synthesize(id, self.n_features, &mut rng);
            return LoadedModel {
                id,
                handle: Some(Arc::new(model)),
                source: ModelSource::Synthetic,
            };
        }

        warn!(model = %id, dir = %dir.display(), "Model not found, marking unavailable");
        LoadedModel {
            id,
            handle: None,
            source: ModelSource::Unavailable,
        }
    }
}
