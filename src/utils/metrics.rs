//! Distribution statistics shared by the ensemble and uncertainty paths
//!
//! Provides:
//! - Elementwise mean and population variance across probability vectors
//! - Shannon entropy with a numeric floor
//! - Argmax / top-k helpers that never panic on NaN

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, VoxRayError};

/// Probabilities are clipped to this floor before taking the log
pub const ENTROPY_EPSILON: f64 = 1e-15;

/// Mean and population variance of a set of equally long probability vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    /// Elementwise arithmetic mean
    pub mean: Vec<f32>,

    /// Elementwise population variance (divides by N, not N - 1)
    pub variance: Vec<f32>,

    /// Number of vectors summarized
    pub count: usize,
}

impl DistributionSummary {
    /// Summarize `samples`, which must be non-empty and share one length
    pub fn from_samples(samples: &[Vec<f32>]) -> Result<Self> {
        let first = samples.first().ok_or_else(|| {
            VoxRayError::Inference("cannot summarize an empty set of predictions".to_string())
        })?;
        let width = first.len();

        if let Some(bad) = samples.iter().find(|s| s.len() != width) {
            return Err(VoxRayError::LabelMismatch {
                expected: width,
                actual: bad.len(),
            });
        }

        let n = samples.len() as f64;
        let mut mean = vec![0.0f64; width];
        for sample in samples {
            for (acc, &p) in mean.iter_mut().zip(sample) {
                *acc += p as f64;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut variance = vec![0.0f64; width];
        for sample in samples {
            for ((acc, &p), &m) in variance.iter_mut().zip(sample).zip(&mean) {
                let d = p as f64 - m;
                *acc += d * d;
            }
        }
        variance.iter_mut().for_each(|v| *v /= n);

        Ok(Self {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            variance: variance.into_iter().map(|v| v as f32).collect(),
            count: samples.len(),
        })
    }
}

/// Shannon entropy (natural log) of a probability vector
///
/// Each element is clipped to `[ENTROPY_EPSILON, 1]` first, so a one-hot
/// vector yields a value close to, but not exactly, zero.
pub fn shannon_entropy(probabilities: &[f32]) -> f32 {
    probabilities
        .iter()
        .map(|&p| {
            let p = (p as f64).clamp(ENTROPY_EPSILON, 1.0);
            -p * p.ln()
        })
        .sum::<f64>() as f32
}

/// Whether every element is a finite probability in `[0, 1]`
pub fn is_probability_vector(values: &[f32]) -> bool {
    values.iter().all(|&p| p.is_finite() && (0.0..=1.0).contains(&p))
}

/// Index and value of the largest element; ties resolve to the lowest index
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if v.total_cmp(&b).is_le() => best,
            _ => Some((i, v)),
        })
}

/// Indices of the `k` largest elements, highest first
pub fn top_k(values: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(k);
    indexed
}
