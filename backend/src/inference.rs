use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use shared::ClassificationResult;

use crate::demo::DemoPredictor;
use crate::model::{ModelLoadError, ModelLoader, RuntimeError};
use crate::preprocess::{PreprocessError, preprocess};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("No image provided")]
    NoImageProvided,
    #[error("No image selected")]
    NoImageSelected,
    #[error("Invalid base64 image data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("Failed to read upload: {0}")]
    Upload(String),
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("Model returned {0} outputs, expected one per class")]
    UnexpectedOutput(usize),
    #[error("Inference worker failed: {0}")]
    Worker(String),
}

impl InferenceError {
    /// Input problems are the caller's; everything else is a 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            InferenceError::NoImageProvided | InferenceError::NoImageSelected => StatusCode::BAD_REQUEST,
            InferenceError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Decodes a JSON `image` field. A data-URL header (`data:...;base64,`) is
/// stripped up to the first comma; line breaks and other ASCII whitespace in
/// the payload are ignored.
pub fn decode_inline_image(encoded: &str) -> Result<Vec<u8>, InferenceError> {
    let payload = match encoded.split_once(',') {
        Some((_, data)) => data,
        None => encoded,
    };
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

/// What `/predict` produces on success.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub result: ClassificationResult,
    pub demo: bool,
}

/// Demo-or-real dispatch over one set of image bytes.
pub struct InferenceService {
    loader: Arc<ModelLoader>,
    demo_mode: bool,
    demo_latency: Duration,
    demo: DemoPredictor,
}

impl InferenceService {
    pub fn new(loader: Arc<ModelLoader>, demo_mode: bool, demo_latency: Duration) -> Self {
        Self {
            loader,
            demo_mode,
            demo_latency,
            demo: DemoPredictor,
        }
    }

    pub fn demo_mode(&self) -> bool {
        self.demo_mode
    }

    pub fn model_loaded(&self) -> bool {
        self.loader.is_loaded()
    }

    pub async fn predict(&self, image: Vec<u8>) -> Result<Prediction, InferenceError> {
        if self.demo_mode {
            if !self.demo_latency.is_zero() {
                actix_web::rt::time::sleep(self.demo_latency).await;
            }
            return Ok(Prediction {
                result: self.demo.predict(),
                demo: true,
            });
        }

        let loader = self.loader.clone();
        let result = actix_web::web::block(move || classify(&loader, &image))
            .await
            .map_err(|e| InferenceError::Worker(e.to_string()))??;

        Ok(Prediction {
            result,
            demo: false,
        })
    }
}

/// Load (first call only), preprocess, forward, shape. Blocking.
pub fn classify(loader: &ModelLoader, image: &[u8]) -> Result<ClassificationResult, InferenceError> {
    let model = loader.load()?;
    let tensor = preprocess(image)?;
    let output = model.predict(&tensor)?;

    let probs: Vec<f64> = output.iter().map(|&p| f64::from(p)).collect();
    let result = ClassificationResult::from_probabilities(&probs)
        .ok_or(InferenceError::UnexpectedOutput(output.len()))?;
    Ok(result.with_rounded_confidence())
}
