//! Model loading, registry and ensemble inference

pub mod aggregator;
pub mod classifier;
pub mod inference;
pub mod loader;
pub mod native;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod registry;
pub mod tree;

pub use classifier::{Classifier, ModelId};
pub use inference::{InferenceEngine, ModelBatch};
pub use loader::{ModelLoader, ModelSource};
pub use native::NativeModel;
pub use registry::{ModelEntry, ModelRegistry, RegistrySnapshot};
