use rand::Rng;
use shared::{ClassificationResult, TumorClass};
use strum::IntoEnumIterator;

/// Symmetric Dirichlet concentration. Must stay integral: each Gamma(k, 1)
/// draw is taken as the sum of k unit exponentials.
const CONCENTRATION: u32 = 2;
const DOMINANT_PROBABILITY: f64 = 0.7;
const DOMINANT_BOOST: f64 = 0.5;

/// Synthesizes plausible classifier output without touching a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoPredictor;

impl DemoPredictor {
    pub fn predict(&self) -> ClassificationResult {
        self.predict_with(&mut rand::rng())
    }

    pub fn predict_with<R: Rng>(&self, rng: &mut R) -> ClassificationResult {
        let mut weights = dirichlet(rng, TumorClass::iter().count());

        if rng.random_bool(DOMINANT_PROBABILITY) {
            let dominant = rng.random_range(0..weights.len());
            weights[dominant] += DOMINANT_BOOST;
            let total: f64 = weights.iter().sum();
            weights.iter_mut().for_each(|w| *w /= total);
        }

        ClassificationResult::from_probabilities(&weights)
            .unwrap_or_else(|| unreachable!("demo weights always cover every class"))
    }
}

fn dirichlet<R: Rng>(rng: &mut R, dims: usize) -> Vec<f64> {
    let draws: Vec<f64> = (0..dims).map(|_| gamma_integral(rng, CONCENTRATION)).collect();
    let total: f64 = draws.iter().sum();
    draws.into_iter().map(|d| d / total).collect()
}

fn gamma_integral<R: Rng>(rng: &mut R, shape: u32) -> f64 {
    (0..shape)
        .map(|_| {
            // (0, 1] keeps ln finite
            let u: f64 = 1.0 - rng.random::<f64>();
            -u.ln()
        })
        .sum()
}
