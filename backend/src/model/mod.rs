pub mod keras;
pub mod loader;
pub mod torch;

use std::path::Path;
use std::sync::Arc;

use crate::preprocess::ImageTensor;

pub use keras::KerasShim;
pub use loader::{ArtifactPaths, ModelLoadError, ModelLoader};
pub use torch::TorchScriptRuntime;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime unavailable: {0}")]
    Unavailable(String),
    #[error("load failed: {0}")]
    Failed(String),
    #[error("forward pass failed: {0}")]
    Forward(String),
}

/// A loaded classifier. Returns one probability per class.
pub trait Classifier: Send + Sync {
    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>, RuntimeError>;
}

/// Shared, read-only handle to the loaded classifier.
pub type ModelHandle = Arc<dyn Classifier>;

/// One way of turning an artifact on disk into a [`Classifier`].
pub trait ModelRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    fn load(&self, path: &Path) -> Result<ModelHandle, RuntimeError>;
}
