use std::path::Path;

use super::{ModelHandle, ModelRuntime, RuntimeError};

/// Legacy Keras 2.x artifacts (`.h5`) through an embedded Python
/// interpreter and the `tf_keras` package. Needs the `keras-shim` feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct KerasShim;

#[cfg(feature = "keras-shim")]
mod imp {
    use std::path::Path;
    use std::sync::Arc;

    use pyo3::exceptions::PyImportError;
    use pyo3::prelude::*;
    use pyo3::types::{IntoPyDict, PyModule};

    use crate::model::{Classifier, ModelHandle, RuntimeError};
    use crate::preprocess::{CHANNELS, INPUT_SIZE, ImageTensor};

    pub struct KerasModel {
        model: Py<PyAny>,
        numpy: Py<PyModule>,
    }

    fn import(py: Python<'_>, name: &str) -> Result<Py<PyModule>, RuntimeError> {
        PyModule::import(py, name).map(Into::into).map_err(|e| {
            if e.is_instance_of::<PyImportError>(py) {
                RuntimeError::Unavailable(format!("python module `{}` not installed", name))
            } else {
                RuntimeError::Failed(e.to_string())
            }
        })
    }

    pub fn load(path: &Path) -> Result<ModelHandle, RuntimeError> {
        Python::with_gil(|py| {
            let tf_keras = import(py, "tf_keras")?;
            let numpy = import(py, "numpy")?;

            let kwargs = [("compile", false)].into_py_dict(py);
            let model = tf_keras
                .as_ref(py)
                .getattr("models")
                .and_then(|models| {
                    models.call_method(
                        "load_model",
                        (path.to_string_lossy().into_owned(),),
                        Some(kwargs),
                    )
                })
                .map_err(|e| RuntimeError::Failed(e.to_string()))?;

            Ok(Arc::new(KerasModel {
                model: model.into(),
                numpy,
            }) as ModelHandle)
        })
    }

    impl Classifier for KerasModel {
        fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>, RuntimeError> {
            let side = INPUT_SIZE as usize;
            Python::with_gil(|py| -> PyResult<Vec<f32>> {
                let batch = self
                    .numpy
                    .as_ref(py)
                    .call_method1("asarray", (input.to_vec(), "float32"))?
                    .call_method1("reshape", ((1usize, side, side, CHANNELS),))?;
                let kwargs = [("verbose", 0)].into_py_dict(py);
                self.model
                    .as_ref(py)
                    .call_method("predict", (batch,), Some(kwargs))?
                    .call_method0("flatten")?
                    .call_method0("tolist")?
                    .extract()
            })
            .map_err(|e| RuntimeError::Forward(e.to_string()))
        }
    }
}

impl ModelRuntime for KerasShim {
    fn name(&self) -> &'static str {
        "tf_keras"
    }

    #[cfg(feature = "keras-shim")]
    fn load(&self, path: &Path) -> Result<ModelHandle, RuntimeError> {
        imp::load(path)
    }

    #[cfg(not(feature = "keras-shim"))]
    fn load(&self, _path: &Path) -> Result<ModelHandle, RuntimeError> {
        Err(RuntimeError::Unavailable(
            "built without the `keras-shim` feature".to_string(),
        ))
    }
}
