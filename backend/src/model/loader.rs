use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

use log::{error, info, warn};

use super::{KerasShim, ModelHandle, ModelRuntime, RuntimeError, TorchScriptRuntime};

/// Candidate artifact locations. The converted one wins when it exists.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub converted: PathBuf,
    pub original: PathBuf,
}

impl ArtifactPaths {
    pub fn new(converted: impl Into<PathBuf>, original: impl Into<PathBuf>) -> Self {
        Self {
            converted: converted.into(),
            original: original.into(),
        }
    }

    pub fn resolve(&self) -> &Path {
        if self.converted.exists() {
            &self.converted
        } else {
            &self.original
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageFailure {
    pub runtime: &'static str,
    pub error: RuntimeError,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.runtime, self.error)
    }
}

#[derive(Debug, thiserror::Error)]
#[error(
    "Failed to load model {}: {causes}. This is most likely a serialization format mismatch between the artifact and the installed runtime",
    .path.display()
)]
pub struct ModelLoadError {
    pub path: PathBuf,
    pub attempts: Vec<StageFailure>,
    causes: String,
}

impl ModelLoadError {
    fn new(path: PathBuf, attempts: Vec<StageFailure>) -> Self {
        let causes = if attempts.is_empty() {
            "no model runtime configured".to_string()
        } else {
            attempts
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        };
        Self {
            path,
            attempts,
            causes,
        }
    }

    /// True when no runtime was even available to try.
    pub fn no_runtime_available(&self) -> bool {
        self.attempts
            .iter()
            .all(|a| matches!(a.error, RuntimeError::Unavailable(_)))
    }

    pub fn guidance(&self) -> &'static str {
        "Options:\n  \
         1. Run in demo mode: set DEMO_MODE=true\n  \
         2. Install the legacy Keras runtime (tf_keras) and build with --features keras-shim\n  \
         3. Convert the artifact to TorchScript and build with --features torch"
    }
}

/// Loads the classifier once and hands out the cached handle afterwards.
///
/// Runtimes are tried in order; an unavailable or failing runtime falls
/// through to the next one. Loads are serialized on `loading` so concurrent
/// first requests trigger at most one; readers of `handle` never wait on it.
pub struct ModelLoader {
    artifacts: ArtifactPaths,
    runtimes: Vec<Box<dyn ModelRuntime>>,
    handle: OnceLock<ModelHandle>,
    loading: Mutex<()>,
}

impl ModelLoader {
    pub fn new(artifacts: ArtifactPaths, runtimes: Vec<Box<dyn ModelRuntime>>) -> Self {
        Self {
            artifacts,
            runtimes,
            handle: OnceLock::new(),
            loading: Mutex::new(()),
        }
    }

    /// Legacy Keras shim first, then the TorchScript runtime.
    pub fn with_default_runtimes(artifacts: ArtifactPaths) -> Self {
        Self::new(
            artifacts,
            vec![Box::new(KerasShim), Box::new(TorchScriptRuntime)],
        )
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.get().is_some()
    }

    pub fn load(&self) -> Result<ModelHandle, ModelLoadError> {
        if let Some(model) = self.handle.get() {
            return Ok(model.clone());
        }

        let _guard = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = self.handle.get() {
            return Ok(model.clone());
        }

        let path = self.artifacts.resolve().to_path_buf();
        info!("Loading model from {}", path.display());

        let mut attempts = Vec::with_capacity(self.runtimes.len());
        for runtime in &self.runtimes {
            match runtime.load(&path) {
                Ok(model) => {
                    info!("Model loaded with the {} runtime", runtime.name());
                    return Ok(self.handle.get_or_init(|| model).clone());
                }
                Err(RuntimeError::Unavailable(reason)) => {
                    info!("{} runtime not available ({}), trying next", runtime.name(), reason);
                    attempts.push(StageFailure {
                        runtime: runtime.name(),
                        error: RuntimeError::Unavailable(reason),
                    });
                }
                Err(err) => {
                    warn!("{} runtime could not load {}: {}", runtime.name(), path.display(), err);
                    attempts.push(StageFailure {
                        runtime: runtime.name(),
                        error: err,
                    });
                }
            }
        }

        let err = ModelLoadError::new(path, attempts);
        error!("{}", err);
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Classifier;
    use crate::preprocess::ImageTensor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    struct FixedModel;

    impl Classifier for FixedModel {
        fn predict(&self, _input: &ImageTensor) -> Result<Vec<f32>, RuntimeError> {
            Ok(vec![0.1, 0.2, 0.3, 0.4])
        }
    }

    /// Loads only artifacts whose file name ends with `accepts`.
    struct FakeRuntime {
        name: &'static str,
        available: bool,
        accepts: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl FakeRuntime {
        fn boxed(name: &'static str, available: bool, accepts: &'static str) -> (Box<dyn ModelRuntime>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let runtime = FakeRuntime {
                name,
                available,
                accepts,
                calls: calls.clone(),
            };
            (Box::new(runtime), calls)
        }
    }

    impl ModelRuntime for FakeRuntime {
        fn name(&self) -> &'static str {
            self.name
        }

        fn load(&self, path: &Path) -> Result<ModelHandle, RuntimeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.available {
                return Err(RuntimeError::Unavailable(format!("{} is not installed", self.name)));
            }
            if path.to_string_lossy().ends_with(self.accepts) {
                Ok(Arc::new(FixedModel))
            } else {
                Err(RuntimeError::Failed(format!("cannot read {}", path.display())))
            }
        }
    }

    fn legacy_artifact() -> ArtifactPaths {
        ArtifactPaths::new("/nonexistent/model_converted.pt", "/nonexistent/model.h5")
    }

    #[test]
    fn original_path_is_used_when_converted_is_missing() {
        let paths = legacy_artifact();
        assert_eq!(paths.resolve(), Path::new("/nonexistent/model.h5"));
    }

    #[test]
    fn converted_path_wins_when_present() {
        let dir = std::env::temp_dir().join(format!("neuroscan-loader-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let converted = dir.join("model_converted.pt");
        std::fs::write(&converted, b"stub").unwrap();

        let paths = ArtifactPaths::new(&converted, dir.join("model.h5"));
        assert_eq!(paths.resolve(), converted.as_path());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn standard_runtime_alone_cannot_read_a_legacy_artifact() {
        let (standard, _) = FakeRuntime::boxed("standard", true, ".pt");
        let loader = ModelLoader::new(legacy_artifact(), vec![standard]);

        let err = loader.load().err().unwrap();
        assert_eq!(err.attempts.len(), 1);
        assert!(matches!(err.attempts[0].error, RuntimeError::Failed(_)));
        assert!(!err.no_runtime_available());
        assert!(err.to_string().contains("serialization format mismatch"));
        assert!(!loader.is_loaded());
    }

    #[test]
    fn legacy_shim_loads_once_and_the_handle_is_cached() {
        let (legacy, legacy_calls) = FakeRuntime::boxed("legacy", true, ".h5");
        let (standard, standard_calls) = FakeRuntime::boxed("standard", true, ".pt");
        let loader = ModelLoader::new(legacy_artifact(), vec![legacy, standard]);

        let first = loader.load().unwrap();
        let second = loader.load().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(legacy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(standard_calls.load(Ordering::SeqCst), 0);
        assert!(loader.is_loaded());
    }

    #[test]
    fn unavailable_shim_falls_through_to_standard_runtime() {
        let (legacy, legacy_calls) = FakeRuntime::boxed("legacy", false, ".pt");
        let (standard, standard_calls) = FakeRuntime::boxed("standard", true, ".h5");
        let loader = ModelLoader::new(legacy_artifact(), vec![legacy, standard]);

        assert!(loader.load().is_ok());
        assert_eq!(legacy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(standard_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_shim_still_tries_standard_runtime() {
        let (legacy, _) = FakeRuntime::boxed("legacy", true, ".keras");
        let (standard, standard_calls) = FakeRuntime::boxed("standard", true, ".h5");
        let loader = ModelLoader::new(legacy_artifact(), vec![legacy, standard]);

        assert!(loader.load().is_ok());
        assert_eq!(standard_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn every_stage_failing_reports_all_causes() {
        let (legacy, _) = FakeRuntime::boxed("legacy", false, ".h5");
        let (standard, _) = FakeRuntime::boxed("standard", false, ".h5");
        let loader = ModelLoader::new(legacy_artifact(), vec![legacy, standard]);

        let err = loader.load().err().unwrap();
        assert!(err.no_runtime_available());
        let message = err.to_string();
        assert!(message.contains("legacy: runtime unavailable"));
        assert!(message.contains("standard: runtime unavailable"));
    }

    #[test]
    fn failed_loads_are_retried_on_the_next_call() {
        let (legacy, calls) = FakeRuntime::boxed("legacy", true, ".bin");
        let loader = ModelLoader::new(legacy_artifact(), vec![legacy]);

        assert!(loader.load().is_err());
        assert!(loader.load().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Reports when a load starts, then blocks until released.
    struct GatedRuntime {
        started: mpsc::Sender<()>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ModelRuntime for GatedRuntime {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn load(&self, _path: &Path) -> Result<ModelHandle, RuntimeError> {
            self.started.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            Ok(Arc::new(FixedModel))
        }
    }

    #[test]
    fn load_state_is_readable_while_a_load_is_in_flight() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let runtime = GatedRuntime {
            started: started_tx,
            release: Mutex::new(release_rx),
        };
        let loader = Arc::new(ModelLoader::new(legacy_artifact(), vec![Box::new(runtime)]));

        let worker = {
            let loader = loader.clone();
            std::thread::spawn(move || loader.load().is_ok())
        };
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(!loader.is_loaded());

        release_tx.send(()).unwrap();
        assert!(worker.join().unwrap());
        assert!(loader.is_loaded());
    }

    #[test]
    fn concurrent_first_access_loads_once() {
        let (legacy, calls) = FakeRuntime::boxed("legacy", true, ".h5");
        let loader = Arc::new(ModelLoader::new(legacy_artifact(), vec![legacy]));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let loader = loader.clone();
                std::thread::spawn(move || loader.load().is_ok())
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
