//! Grad-CAM saliency maps
//!
//! Given the activations of a late convolutional feature map and the gradient
//! of one class's pre-softmax score with respect to them, Grad-CAM weights each
//! channel by its spatially averaged gradient, sums the channels, keeps only
//! positive evidence (ReLU) and normalizes the result to [0, 1].

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, VoxRayError};

/// Feature-map activations and the matching gradients, both `[channels, height, width]`
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureGradients {
    channels: usize,
    height: usize,
    width: usize,
    activations: Vec<f32>,
    gradients: Vec<f32>,
}

impl FeatureGradients {
    pub fn new(
        channels: usize,
        height: usize,
        width: usize,
        activations: Vec<f32>,
        gradients: Vec<f32>,
    ) -> Result<Self> {
        let expected = channels * height * width;
        if expected == 0 {
            return Err(VoxRayError::ExplanationUnavailable(
                "feature map has no spatial extent".to_string(),
            ));
        }
        if activations.len() != expected || gradients.len() != expected {
            return Err(VoxRayError::ExplanationUnavailable(format!(
                "feature map shape mismatch: expected {} values, got {} activations and {} gradients",
                expected,
                activations.len(),
                gradients.len()
            )));
        }
        Ok(Self {
            channels,
            height,
            width,
            activations,
            gradients,
        })
    }

    /// `[channels, height, width]`
    pub fn dims(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }
}

/// A 2-D saliency grid, row-major, values in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    width: usize,
    height: usize,
    values: Vec<f32>,
}

impl Heatmap {
    pub fn new(width: usize, height: usize, values: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 || values.len() != width * height {
            return Err(VoxRayError::ExplanationUnavailable(format!(
                "heatmap of {}x{} cannot hold {} values",
                width,
                height,
                values.len()
            )));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x < self.width && y < self.height {
            Some(self.values[y * self.width + x])
        } else {
            None
        }
    }

    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }
}

/// Compute a Grad-CAM heatmap at feature-map resolution
///
/// Returns `ExplanationUnavailable` when the gradients carry no signal or the
/// weighted map has no positive value, instead of producing NaNs.
pub fn grad_cam(features: &FeatureGradients) -> Result<Heatmap> {
    let [channels, height, width] = features.dims();
    let plane = height * width;

    if features.gradients.iter().any(|g| !g.is_finite()) {
        return Err(VoxRayError::ExplanationUnavailable(
            "gradients contain non-finite values".to_string(),
        ));
    }

    // Global average pooling of the gradients: one weight per channel
    let weights: Vec<f32> = features
        .gradients
        .chunks_exact(plane)
        .map(|g| g.iter().sum::<f32>() / plane as f32)
        .collect();

    if weights.iter().all(|&w| w == 0.0) {
        return Err(VoxRayError::ExplanationUnavailable(
            "gradient of the target class is zero everywhere".to_string(),
        ));
    }

    let mut cam = vec![0.0f32; plane];
    for (c, activation) in features.activations.chunks_exact(plane).enumerate().take(channels) {
        let w = weights[c];
        for (acc, &a) in cam.iter_mut().zip(activation) {
            *acc += w * a;
        }
    }

    // Only evidence for the class is kept
    cam.iter_mut().for_each(|v| *v = v.max(0.0));

    let max = cam.iter().copied().fold(0.0f32, f32::max);
    if !(max > 0.0 && max.is_finite()) {
        return Err(VoxRayError::ExplanationUnavailable(
            "no positive activation for the target class".to_string(),
        ));
    }
    cam.iter_mut().for_each(|v| *v /= max);

    Heatmap::new(width, height, cam)
}
