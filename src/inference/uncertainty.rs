//! Monte Carlo Dropout uncertainty
//!
//! Runs the same input through one model several times with dropout forced
//! on. The spread of the resulting distributions approximates epistemic
//! uncertainty; the entropy is taken of the averaged distribution, not
//! averaged over passes.
//!
//! Cost grows linearly with the pass count, so callers opt in per request.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::inference::preprocess::ImageTensor;
use crate::model::runtime::ClassifierModel;
use crate::utils::error::{Result, VoxRayError};
use crate::utils::metrics::{is_probability_vector, shannon_entropy, DistributionSummary};

/// Smallest pass count for which a variance means anything
pub const MIN_PASSES: usize = 2;

/// Summary of the stochastic passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyResult {
    /// Mean distribution over the passes
    pub mean_probability: Vec<f32>,

    /// Per-class population variance over the passes
    pub variance: Vec<f32>,

    /// Shannon entropy of `mean_probability`
    pub entropy: f32,

    /// Every pass's distribution, in order
    pub samples: Vec<Vec<f32>>,

    /// Number of passes run
    pub passes: usize,
}

/// MC Dropout estimator with a fixed pass count
#[derive(Debug, Clone, Copy)]
pub struct UncertaintyEstimator {
    passes: usize,
}

impl UncertaintyEstimator {
    pub fn new(passes: usize) -> Result<Self> {
        if passes < MIN_PASSES {
            return Err(VoxRayError::InvalidPassCount(passes));
        }
        Ok(Self { passes })
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn estimate(
        &self,
        model: &dyn ClassifierModel,
        input: &ImageTensor,
    ) -> Result<UncertaintyResult> {
        estimate(model, input, self.passes)
    }
}

/// Run `passes` stochastic forward passes; any failing pass fails the whole call
pub fn estimate(
    model: &dyn ClassifierModel,
    input: &ImageTensor,
    passes: usize,
) -> Result<UncertaintyResult> {
    if passes < MIN_PASSES {
        return Err(VoxRayError::InvalidPassCount(passes));
    }

    let start = Instant::now();
    let samples = (0..passes)
        .map(|pass| {
            let probabilities = model.predict_stochastic(input)?;
            if !is_probability_vector(&probabilities) {
                return Err(VoxRayError::Inference(format!(
                    "pass {} on '{}' produced values outside [0, 1]",
                    pass,
                    model.name()
                )));
            }
            Ok(probabilities)
        })
        .collect::<Result<Vec<_>>>()?;

    let summary = DistributionSummary::from_samples(&samples)?;
    let entropy = shannon_entropy(&summary.mean);

    debug!(
        "MC Dropout on '{}': {} passes in {:.2} ms, entropy {:.4}",
        model.name(),
        passes,
        start.elapsed().as_secs_f64() * 1000.0,
        entropy
    );

    Ok(UncertaintyResult {
        mean_probability: summary.mean,
        variance: summary.variance,
        entropy,
        samples,
        passes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{blank_input, FakeModel};

    #[test]
    fn test_single_pass_rejected() {
        let model = FakeModel::fixed("m", vec![0.5, 0.5]);
        assert!(matches!(
            estimate(&model, &blank_input(), 1),
            Err(VoxRayError::InvalidPassCount(1))
        ));
        assert!(matches!(
            UncertaintyEstimator::new(0),
            Err(VoxRayError::InvalidPassCount(0))
        ));
    }

    #[test]
    fn test_deterministic_model_has_zero_variance() {
        let probs = vec![0.1, 0.2, 0.7];
        let model = FakeModel::fixed("m", probs.clone());

        let result = UncertaintyEstimator::new(5)
            .unwrap()
            .estimate(&model, &blank_input())
            .unwrap();

        assert_eq!(result.passes, 5);
        assert_eq!(result.samples.len(), 5);
        assert!(result.variance.iter().all(|&v| v.abs() < 1e-12));
        assert!((result.entropy - shannon_entropy(&probs)).abs() < 1e-6);
    }

    #[test]
    fn test_entropy_of_mean_not_mean_of_entropies() {
        // Two confident but opposite passes: each has near-zero entropy,
        // their mean is uniform with entropy ln 2
        let model = FakeModel::cycling("m", vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let result = estimate(&model, &blank_input(), 2).unwrap();

        assert!((result.mean_probability[0] - 0.5).abs() < 1e-6);
        assert!((result.entropy - 2f32.ln()).abs() < 1e-5);
        assert!((result.variance[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_failing_pass_fails_the_estimate() {
        let model = FakeModel::failing("m", 2);
        assert!(estimate(&model, &blank_input(), 3).is_err());
    }

    #[test]
    fn test_non_finite_pass_fails_the_estimate() {
        let model = FakeModel::cycling("m", vec![vec![0.4, 0.6], vec![f32::NAN, 0.6]]);
        assert!(matches!(
            estimate(&model, &blank_input(), 2),
            Err(VoxRayError::Inference(msg)) if msg.contains("outside [0, 1]")
        ));
    }
}
