//! Heatmap overlay rendering
//!
//! Turns a feature-resolution Grad-CAM heatmap into a viewable image:
//! weak activations are dropped, the map is upsampled with bicubic
//! interpolation, blurred to dissolve block edges, re-normalized, colored with
//! a jet ramp and blended onto the original only where it is active.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};

use crate::explain::gradcam::Heatmap;
use crate::inference::preprocess::encode_png;
use crate::utils::error::{Result, VoxRayError};

type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Overlay rendering parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Heatmap values below this are zeroed before upsampling
    pub threshold: f32,

    /// Pixels whose smoothed value is not above this keep the original color
    pub mask_threshold: f32,

    /// Weight of the heatmap color in blended pixels
    pub alpha: f32,

    /// Blur kernel size as a fraction of the shorter image side
    pub blur_fraction: f32,

    /// Smallest blur kernel size (odd)
    pub min_kernel: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            threshold: 0.35,
            mask_threshold: 0.05,
            alpha: 0.4,
            blur_fraction: 0.05,
            min_kernel: 5,
        }
    }
}

impl OverlayConfig {
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        for (name, value) in [
            ("threshold", self.threshold),
            ("mask_threshold", self.mask_threshold),
            ("alpha", self.alpha),
            ("blur_fraction", self.blur_fraction),
        ] {
            if !unit.contains(&value) {
                return Err(VoxRayError::Config(format!(
                    "overlay {} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Odd blur kernel size for an image whose shorter side is `min_side`
    pub fn kernel_size(&self, min_side: u32) -> u32 {
        let mut kernel = (min_side as f32 * self.blur_fraction) as u32;
        if kernel % 2 == 0 {
            kernel += 1;
        }
        let floor = self.min_kernel | 1;
        kernel.max(floor)
    }
}

/// Gaussian sigma OpenCV derives for a kernel of `kernel_size` when none is given
fn sigma_for_kernel(kernel_size: u32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Jet color ramp: dark blue at 0, through cyan, yellow, to dark red at 1
pub fn jet_colormap(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0);
    let channel = |center: f32| -> u8 {
        let intensity = (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0);
        (intensity * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Threshold, upsample to `width`x`height`, blur, clip and re-normalize a heatmap
pub fn smooth_heatmap(
    heatmap: &Heatmap,
    width: u32,
    height: u32,
    config: &OverlayConfig,
) -> Result<GrayF32> {
    let thresholded: Vec<f32> = heatmap
        .values()
        .iter()
        .map(|&v| {
            let v = v.max(0.0);
            if v < config.threshold {
                0.0
            } else {
                v
            }
        })
        .collect();

    let grid = GrayF32::from_raw(heatmap.width() as u32, heatmap.height() as u32, thresholded)
        .ok_or_else(|| {
            VoxRayError::ExplanationUnavailable("heatmap buffer size mismatch".to_string())
        })?;

    let upsampled = image::imageops::resize(&grid, width, height, FilterType::CatmullRom);
    let sigma = sigma_for_kernel(config.kernel_size(width.min(height)));
    let mut smoothed = gaussian_blur_f32(&upsampled, sigma);

    // Bicubic overshoot is clipped before re-normalizing
    smoothed.pixels_mut().for_each(|p| p.0[0] = p.0[0].clamp(0.0, 1.0));
    let max = smoothed.pixels().map(|p| p.0[0]).fold(0.0f32, f32::max);
    if max > 0.0 {
        smoothed.pixels_mut().for_each(|p| p.0[0] /= max);
    }

    Ok(smoothed)
}

/// Blend a heatmap onto `original`; inactive pixels stay untouched
pub fn render_overlay(
    heatmap: &Heatmap,
    original: &RgbImage,
    config: &OverlayConfig,
) -> Result<RgbImage> {
    let (width, height) = original.dimensions();
    let smoothed = smooth_heatmap(heatmap, width, height, config)?;
    let alpha = config.alpha;

    let mut output = original.clone();
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let value = smoothed.get_pixel(x, y).0[0];
        if value <= config.mask_threshold {
            continue;
        }
        let Rgb(color) = jet_colormap(value);
        for (channel, &heat) in pixel.0.iter_mut().zip(color.iter()) {
            let blended = (1.0 - alpha) * *channel as f32 + alpha * heat as f32;
            *channel = blended.round().clamp(0.0, 255.0) as u8;
        }
    }

    Ok(output)
}

/// PNG-encode an image and wrap it in standard base64
pub fn encode_base64_png(image: &RgbImage) -> Result<String> {
    let png = encode_png(image)?;
    Ok(STANDARD.encode(png))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_size_is_odd_with_floor() {
        let config = OverlayConfig::default();
        assert_eq!(config.kernel_size(40), 5);
        assert_eq!(config.kernel_size(224), 11);
        assert_eq!(config.kernel_size(1024), 51);
        assert!(config.kernel_size(1000) % 2 == 1);
    }

    #[test]
    fn test_jet_endpoints() {
        let cold = jet_colormap(0.0);
        let hot = jet_colormap(1.0);
        assert!(cold.0[2] > cold.0[0]);
        assert!(hot.0[0] > hot.0[2]);
        assert_eq!(jet_colormap(0.5).0[1], 255);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let config = OverlayConfig {
            alpha: 1.2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(OverlayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_smoothed_values_clipped_and_normalized() {
        let heatmap = Heatmap::new(2, 2, vec![1.0, 0.6, 0.2, 0.0]).unwrap();
        let smoothed = smooth_heatmap(&heatmap, 32, 32, &OverlayConfig::default()).unwrap();

        assert_eq!(smoothed.dimensions(), (32, 32));
        let values: Vec<f32> = smoothed.pixels().map(|p| p.0[0]).collect();
        assert!(values.iter().all(|&v| (0.0..=1.0).contains(&v)));
        let max = values.iter().copied().fold(0.0f32, f32::max);
        assert!((max - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_all_below_threshold_leaves_image_untouched() {
        let heatmap = Heatmap::new(2, 2, vec![0.3, 0.2, 0.1, 0.0]).unwrap();
        let original = RgbImage::from_pixel(24, 24, Rgb([90, 90, 90]));

        let overlay = render_overlay(&heatmap, &original, &OverlayConfig::default()).unwrap();
        assert_eq!(overlay, original);
    }

    #[test]
    fn test_overlay_only_touches_active_region() {
        let heatmap = Heatmap::new(2, 2, vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        let original = RgbImage::from_pixel(40, 40, Rgb([90, 90, 90]));

        let overlay = render_overlay(&heatmap, &original, &OverlayConfig::default()).unwrap();

        assert_eq!(overlay.dimensions(), original.dimensions());
        assert_ne!(overlay.get_pixel(0, 0), original.get_pixel(0, 0));
        assert_eq!(overlay.get_pixel(39, 39), original.get_pixel(39, 39));
    }

    #[test]
    fn test_base64_png_roundtrip_decodes() {
        let image = RgbImage::from_pixel(3, 3, Rgb([1, 2, 3]));
        let encoded = encode_base64_png(&image).unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded, image);
    }
}
