use std::path::Path;

use super::{ModelHandle, ModelRuntime, RuntimeError};

/// TorchScript artifacts through libtorch. Needs the `torch` feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct TorchScriptRuntime;

#[cfg(feature = "torch")]
mod imp {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use tch::{CModule, Device, Kind, Tensor};

    use crate::model::{Classifier, ModelHandle, RuntimeError};
    use crate::preprocess::{CHANNELS, INPUT_SIZE, ImageTensor};

    pub struct TorchScriptModel {
        module: Mutex<CModule>,
        device: Device,
    }

    pub fn load(path: &Path) -> Result<ModelHandle, RuntimeError> {
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(path, device)
            .map_err(|e| RuntimeError::Failed(e.to_string()))?;
        Ok(Arc::new(TorchScriptModel {
            module: Mutex::new(module),
            device,
        }))
    }

    impl Classifier for TorchScriptModel {
        fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>, RuntimeError> {
            let side = i64::from(INPUT_SIZE);
            let tensor = Tensor::from_slice(&input.to_vec())
                .view([1, side, side, CHANNELS as i64])
                .to_device(self.device);

            let output = self
                .module
                .lock()
                .map_err(|_| RuntimeError::Forward("model lock poisoned".to_string()))?
                .forward_ts(&[tensor])
                .map_err(|e| RuntimeError::Forward(e.to_string()))?;

            // Exported modules end at the logits layer.
            let probs = output
                .softmax(-1, Kind::Float)
                .to_device(Device::Cpu)
                .view([-1]);
            Vec::<f32>::try_from(&probs).map_err(|e| RuntimeError::Forward(e.to_string()))
        }
    }
}

impl ModelRuntime for TorchScriptRuntime {
    fn name(&self) -> &'static str {
        "torchscript"
    }

    #[cfg(feature = "torch")]
    fn load(&self, path: &Path) -> Result<ModelHandle, RuntimeError> {
        imp::load(path)
    }

    #[cfg(not(feature = "torch"))]
    fn load(&self, _path: &Path) -> Result<ModelHandle, RuntimeError> {
        Err(RuntimeError::Unavailable(
            "built without the `torch` feature".to_string(),
        ))
    }
}
