//! ONNX Runtime backend for `.onnx` artifacts

use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ArtifactError, ClassifierError};
use crate::models::classifier::{check_probability, check_width, Classifier};
use crate::types::FeatureTable;

/// Initialize the ONNX Runtime environment. Safe to call more than once.
pub fn init_runtime() -> Result<(), ArtifactError> {
    ort::init()
        .commit()
        .map_err(|e| ArtifactError::Onnx(e.to_string()))?;
    Ok(())
}

/// A classifier exported to ONNX (skl2onnx / onnxmltools layout).
pub struct OnnxModel {
    // `Session::run` takes `&mut self`.
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    n_features: usize,
}

impl OnnxModel {
    pub fn load(path: &Path, n_features: usize, threads: usize) -> Result<Self, ArtifactError> {
        let session = Session::builder()
            .map_err(|e| load_error(path, e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_error(path, e))?
            .with_intra_threads(threads)
            .map_err(|e| load_error(path, e))?
            .commit_from_file(path)
            .map_err(|e| load_error(path, e))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "probabilities".to_string());

        info!(
            path = %path.display(),
            input = %input_name,
            output = %output_name,
            threads,
            "ONNX session created"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            n_features,
        })
    }

    fn run(&self, rows: usize, flat: &[f64]) -> Result<Vec<f64>, ClassifierError> {
        let data: Vec<f32> = flat.iter().map(|&v| v as f32).collect();
        let shape = vec![rows as i64, self.n_features as i64];
        let input = Tensor::from_array((shape, data)).map_err(backend)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ClassifierError::Backend(format!("session lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(backend)?;

        let probs = extract_probabilities(&outputs, &self.output_name, rows)?;
        debug!(rows, "ONNX batch complete");
        probs.into_iter().map(check_probability).collect()
    }
}

impl Classifier for OnnxModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, features: &[f64]) -> Result<f64, ClassifierError> {
        check_width(self.n_features, features.len())?;
        let probs = self.run(1, features)?;
        probs
            .first()
            .copied()
            .ok_or_else(|| ClassifierError::Backend("empty model output".to_string()))
    }

    fn predict_proba_batch(&self, table: &FeatureTable) -> Result<Vec<f64>, ClassifierError> {
        check_width(self.n_features, table.n_features())?;
        if table.is_empty() {
            return Ok(Vec::new());
        }
        self.run(table.n_rows(), table.as_flat())
    }

    fn describe(&self) -> String {
        format!("onnx ({} -> {})", self.input_name, self.output_name)
    }
}

fn load_error(path: &Path, e: impl std::fmt::Display) -> ArtifactError {
    ArtifactError::Onnx(format!("{}: {e}", path.display()))
}

fn backend(e: impl std::fmt::Display) -> ClassifierError {
    ClassifierError::Backend(e.to_string())
}

/// Positive-class probability per row, from either a probability tensor
/// or a `seq(map(int64, float))` output.
fn extract_probabilities(
    outputs: &SessionOutputs,
    output_name: &str,
    rows: usize,
) -> Result<Vec<f64>, ClassifierError> {
    if let Some(output) = outputs.get(output_name) {
        if let Some(probs) = extract_value(output, rows) {
            return Ok(probs);
        }
    }

    for (name, output) in outputs.iter() {
        if name.contains("label") {
            continue;
        }
        if let Some(probs) = extract_value(&output, rows) {
            debug!(output = %name, "Probabilities taken from fallback output");
            return Ok(probs);
        }
    }

    Err(ClassifierError::Backend(
        "no probability output could be extracted".to_string(),
    ))
}

fn extract_value(output: &DynValue, rows: usize) -> Option<Vec<f64>> {
    if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
        let dims: Vec<i64> = shape.iter().copied().collect();
        return positive_column(&dims, data, rows);
    }
    if DynSequenceValueType::can_downcast(&output.dtype()) {
        return extract_sequence_map(output, rows).ok();
    }
    None
}

fn positive_column(dims: &[i64], data: &[f32], rows: usize) -> Option<Vec<f64>> {
    let width = match dims {
        [n, c] if *n as usize == rows => *c as usize,
        [n] if *n as usize == rows => 1,
        _ => return None,
    };
    let col = if width >= 2 { 1 } else { 0 };
    (0..rows)
        .map(|i| data.get(i * width + col).map(|&v| f64::from(v)))
        .collect()
}

fn extract_sequence_map(output: &DynValue, rows: usize) -> Result<Vec<f64>, ClassifierError> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(backend)?;
    let maps = sequence
        .try_extract_sequence::<DynMapValueType>(&allocator)
        .map_err(backend)?;
    if maps.len() != rows {
        return Err(ClassifierError::Backend(format!(
            "expected {rows} probability maps, got {}",
            maps.len()
        )));
    }

    maps.iter()
        .map(|map| {
            let pairs = map.try_extract_key_values::<i64, f32>().map_err(backend)?;
            let find = |class: i64| pairs.iter().find(|(k, _)| *k == class).map(|(_, p)| f64::from(*p));
            find(1)
                .or_else(|| find(0).map(|p| 1.0 - p))
                .ok_or_else(|| ClassifierError::Backend("no class probability in map".to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_column_layouts() {
        let data = [0.9, 0.1, 0.2, 0.8];
        assert_eq!(positive_column(&[2, 2], &data, 2), Some(vec![0.1f32 as f64, 0.8f32 as f64]));
        assert_eq!(positive_column(&[2], &[0.25, 0.5], 2), Some(vec![0.25, 0.5]));
        assert_eq!(positive_column(&[3, 2], &data, 2), None);
    }
}
