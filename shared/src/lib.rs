use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// Output classes of the MRI classifier, in model output order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumIter,
)]
pub enum TumorClass {
    Glioma,
    Meningioma,
    #[serde(rename = "No Tumor")]
    #[strum(serialize = "No Tumor")]
    NoTumor,
    Pituitary,
}

impl TumorClass {
    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct InferenceRequest {
    #[serde(default)]
    pub image: Option<String>,
}

/// A single classification. Percentages are in `[0, 100]`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClassificationResult {
    pub prediction: TumorClass,
    pub confidence: f64,
    pub probabilities: BTreeMap<TumorClass, f64>,
}

impl ClassificationResult {
    /// Builds a result from per-class probabilities in `[0, 1]`, indexed in
    /// [`TumorClass`] order. Returns `None` when `probs` does not hold exactly
    /// one finite value per class.
    pub fn from_probabilities(probs: &[f64]) -> Option<Self> {
        if probs.len() != TumorClass::iter().count() || probs.iter().any(|p| !p.is_finite()) {
            return None;
        }

        let (best, best_prob) = probs
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |acc, (i, p)| if p > acc.1 { (i, p) } else { acc });

        let probabilities = TumorClass::iter()
            .zip(probs.iter())
            .map(|(class, p)| (class, p * 100.0))
            .collect();

        Some(Self {
            prediction: TumorClass::from_index(best)?,
            confidence: best_prob * 100.0,
            probabilities,
        })
    }

    /// Rounds `confidence` to two decimals; probabilities are left as-is.
    pub fn with_rounded_confidence(mut self) -> Self {
        self.confidence = (self.confidence * 100.0).round() / 100.0;
        self
    }

    pub fn probability_sum(&self) -> f64 {
        self.probabilities.values().sum()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InferenceResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_mode: Option<bool>,
    #[serde(flatten)]
    pub result: ClassificationResult,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum ChatResponse {
    Answered { success: bool, response: String },
    Degraded { error: String, response: String },
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub demo_mode: bool,
    pub model_loaded: bool,
    pub chatbot_configured: bool,
}
