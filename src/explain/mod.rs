//! Explanation module: Grad-CAM heatmaps and their overlays
//!
//! This module provides:
//! - Grad-CAM computation from feature activations and gradients
//! - Overlay rendering (threshold, upsample, blur, jet colors, masked blend)
//! - `ExplanationGenerator`, which turns failures into an explicit
//!   "unavailable" outcome so a diagnosis never depends on its explanation

pub mod gradcam;
pub mod overlay;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::inference::preprocess::ImageTensor;
use crate::model::labels::ClassLabels;
use crate::model::runtime::ClassifierModel;
use crate::utils::error::{catch_panic, Result, VoxRayError};

// Re-export main types for convenience
pub use gradcam::{grad_cam, FeatureGradients, Heatmap};
pub use overlay::{encode_base64_png, jet_colormap, render_overlay, OverlayConfig};

/// A rendered explanation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// Class whose evidence is shown
    pub target_class: usize,

    /// Label of the target class
    pub label: Option<String>,

    /// Overlay PNG, standard base64
    pub heatmap_png_base64: String,

    /// Overlay size (the original image size)
    pub width: u32,
    pub height: u32,

    /// Feature-map resolution the heatmap was computed at (width, height)
    pub feature_grid: (usize, usize),
}

/// Either an explanation or the reason there is none
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExplanationOutcome {
    Ready(Explanation),
    Unavailable { reason: String },
}

impl ExplanationOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ExplanationOutcome::Ready(_))
    }
}

/// Best-effort Grad-CAM explainer
#[derive(Debug, Clone, Default)]
pub struct ExplanationGenerator {
    overlay: OverlayConfig,
}

impl ExplanationGenerator {
    pub fn new(overlay: OverlayConfig) -> Self {
        Self { overlay }
    }

    pub fn overlay_config(&self) -> &OverlayConfig {
        &self.overlay
    }

    /// Raw Grad-CAM heatmap at feature-map resolution
    pub fn heatmap(
        &self,
        model: &dyn ClassifierModel,
        input: &ImageTensor,
        target_class: usize,
    ) -> Result<Heatmap> {
        let num_classes = model.num_classes();
        if target_class >= num_classes {
            return Err(VoxRayError::InvalidClassIndex {
                index: target_class,
                num_classes,
            });
        }

        let features = model.activations_and_gradients(input, target_class)?;
        grad_cam(&features)
    }

    /// Heatmap and overlay for `target_class`, rendered over `original`
    ///
    /// Only an out-of-range class is an error; every other failure becomes
    /// `ExplanationOutcome::Unavailable`.
    pub fn explain(
        &self,
        model: &dyn ClassifierModel,
        input: &ImageTensor,
        original: &RgbImage,
        target_class: usize,
        labels: &ClassLabels,
    ) -> Result<ExplanationOutcome> {
        let rendered = catch_panic("Grad-CAM", || {
            let heatmap = self.heatmap(model, input, target_class)?;
            let overlay = render_overlay(&heatmap, original, &self.overlay)?;
            let encoded = encode_base64_png(&overlay)?;
            Ok((heatmap, overlay.dimensions(), encoded))
        });

        match rendered {
            Ok((heatmap, (width, height), heatmap_png_base64)) => {
                debug!(
                    "Grad-CAM for class {} on '{}' at {}x{}",
                    target_class,
                    model.name(),
                    heatmap.width(),
                    heatmap.height()
                );
                Ok(ExplanationOutcome::Ready(Explanation {
                    target_class,
                    label: labels.get(target_class).map(str::to_string),
                    heatmap_png_base64,
                    width,
                    height,
                    feature_grid: (heatmap.width(), heatmap.height()),
                }))
            }
            Err(e @ VoxRayError::InvalidClassIndex { .. }) => Err(e),
            Err(e) => {
                warn!("Explanation unavailable for class {}: {}", target_class, e);
                Ok(ExplanationOutcome::Unavailable {
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{blank_input, random_input, tiny_classifier, FakeModel};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use image::Rgb;

    fn labels() -> ClassLabels {
        ClassLabels::new(["A", "B", "C"]).unwrap()
    }

    fn hot_corner_features() -> FeatureGradients {
        FeatureGradients::new(1, 2, 2, vec![4.0, 1.0, 0.0, 0.0], vec![1.0; 4]).unwrap()
    }

    #[test]
    fn test_explanation_ready() {
        let model =
            FakeModel::fixed("m", vec![0.2, 0.3, 0.5]).with_features(hot_corner_features());
        let original = RgbImage::from_pixel(30, 20, Rgb([100, 100, 100]));

        let outcome = ExplanationGenerator::default()
            .explain(&model, &blank_input(), &original, 2, &labels())
            .unwrap();

        let ExplanationOutcome::Ready(explanation) = outcome else {
            panic!("expected an explanation, got {:?}", outcome);
        };
        assert_eq!(explanation.label.as_deref(), Some("C"));
        assert_eq!((explanation.width, explanation.height), (30, 20));
        assert_eq!(explanation.feature_grid, (2, 2));

        let png = STANDARD.decode(&explanation.heatmap_png_base64).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (30, 20));
    }

    #[test]
    fn test_heatmap_values_normalized() {
        let model =
            FakeModel::fixed("m", vec![0.2, 0.3, 0.5]).with_features(hot_corner_features());
        let heatmap = ExplanationGenerator::default()
            .heatmap(&model, &blank_input(), 0)
            .unwrap();

        assert_eq!(heatmap.values(), &[1.0, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_zero_gradient_is_unavailable_not_error() {
        let flat = FeatureGradients::new(1, 2, 2, vec![1.0; 4], vec![0.0; 4]).unwrap();
        let model = FakeModel::fixed("m", vec![0.2, 0.3, 0.5]).with_features(flat);
        let original = RgbImage::new(8, 8);

        let outcome = ExplanationGenerator::default()
            .explain(&model, &blank_input(), &original, 1, &labels())
            .unwrap();
        assert!(!outcome.is_ready());
    }

    #[test]
    fn test_model_without_gradients_is_unavailable() {
        let model = FakeModel::fixed("m", vec![0.2, 0.3, 0.5]);
        let original = RgbImage::new(8, 8);

        let outcome = ExplanationGenerator::default()
            .explain(&model, &blank_input(), &original, 0, &labels())
            .unwrap();
        assert!(matches!(outcome, ExplanationOutcome::Unavailable { .. }));
    }

    #[test]
    fn test_out_of_range_class_is_an_error() {
        let model =
            FakeModel::fixed("m", vec![0.2, 0.3, 0.5]).with_features(hot_corner_features());
        let original = RgbImage::new(8, 8);

        let result =
            ExplanationGenerator::default().explain(&model, &blank_input(), &original, 3, &labels());
        assert!(matches!(
            result,
            Err(VoxRayError::InvalidClassIndex { index: 3, num_classes: 3 })
        ));
    }

    #[test]
    fn test_panicking_model_is_unavailable() {
        let model = FakeModel::panicking("m", 3);
        let original = RgbImage::new(8, 8);

        let outcome = ExplanationGenerator::default()
            .explain(&model, &blank_input(), &original, 1, &labels())
            .unwrap();
        assert!(matches!(
            outcome,
            ExplanationOutcome::Unavailable { reason } if reason.contains("panicked")
        ));
    }

    #[test]
    fn test_burn_heatmap_is_normalized_or_unavailable() {
        let model = tiny_classifier("tiny", 3);
        let input = random_input(32);
        let generator = ExplanationGenerator::default();

        for class in 0..3 {
            match generator.heatmap(&model, &input, class) {
                Ok(heatmap) => {
                    let values = heatmap.values();
                    assert_eq!((heatmap.width(), heatmap.height()), (2, 2));
                    assert!(values.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)));
                    let max = values.iter().copied().fold(f32::MIN, f32::max);
                    assert!((max - 1.0).abs() < 1e-6, "max {} is not 1", max);
                }
                Err(VoxRayError::ExplanationUnavailable(_)) => {}
                Err(e) => panic!("unexpected error for class {}: {}", class, e),
            }
        }
    }

    #[test]
    fn test_burn_explanation_end_to_end() {
        let model = tiny_classifier("tiny", 3);
        let original = RgbImage::from_pixel(32, 32, Rgb([90, 90, 90]));

        let outcome = ExplanationGenerator::default()
            .explain(&model, &random_input(32), &original, 0, &labels())
            .unwrap();

        match outcome {
            ExplanationOutcome::Ready(explanation) => {
                assert_eq!(explanation.feature_grid, (2, 2));
                let png = STANDARD.decode(&explanation.heatmap_png_base64).unwrap();
                let decoded = image::load_from_memory(&png).unwrap();
                assert_eq!((decoded.width(), decoded.height()), (32, 32));
            }
            ExplanationOutcome::Unavailable { reason } => assert!(!reason.is_empty()),
        }
    }
}
