//! Image Preprocessing Module
//!
//! Turns raw image bytes (or a decoded pixel array from a non-photographic
//! source) into the normalized, batched tensor the classifier expects.
//!
//! The resize is a hard resize to a square without aspect-ratio preservation,
//! and the normalization must be the one the models were trained with: a wrong
//! choice does not fail, it silently shifts every probability.

use image::{imageops::FilterType, DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, VoxRayError};

/// ImageNet normalization mean values (RGB)
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
/// Caffe-style per-channel means, in BGR order
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

/// Backbone-specific pixel normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Scale 0..255 to [-1, 1] (ResNet V2 / Inception style)
    ResNetV2,
    /// Scale to [0, 1], then subtract ImageNet mean and divide by std
    ImageNet,
    /// Reorder to BGR and subtract per-channel ImageNet means on the 0..255 scale
    CaffeMeanSubtraction,
}

impl Normalization {
    /// Normalize one RGB pixel, returning values in tensor channel order
    pub fn apply(&self, [r, g, b]: [u8; 3]) -> [f32; 3] {
        let (r, g, b) = (r as f32, g as f32, b as f32);
        match self {
            Normalization::ResNetV2 => [r / 127.5 - 1.0, g / 127.5 - 1.0, b / 127.5 - 1.0],
            Normalization::ImageNet => [
                (r / 255.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0],
                (g / 255.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1],
                (b / 255.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2],
            ],
            Normalization::CaffeMeanSubtraction => [
                b - CAFFE_MEAN_BGR[0],
                g - CAFFE_MEAN_BGR[1],
                r - CAFFE_MEAN_BGR[2],
            ],
        }
    }
}

/// A single preprocessed image, shape `[1, 3, height, width]`, CHW layout
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    height: usize,
    width: usize,
}

impl ImageTensor {
    /// Number of color channels
    pub const CHANNELS: usize = 3;

    /// Wrap CHW data; the length must equal `3 * height * width`
    pub fn new(data: Vec<f32>, height: usize, width: usize) -> Result<Self> {
        let expected = Self::CHANNELS * height * width;
        if height == 0 || width == 0 || data.len() != expected {
            return Err(VoxRayError::InvalidImage(format!(
                "tensor data has {} values, expected {} for {}x{}",
                data.len(),
                expected,
                height,
                width
            )));
        }
        Ok(Self {
            data,
            height,
            width,
        })
    }

    /// `[batch, channels, height, width]`
    pub fn shape(&self) -> [usize; 4] {
        [1, Self::CHANNELS, self.height, self.width]
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// A decoded pixel array of arbitrary shape and numeric range (e.g. DICOM pixel data)
#[derive(Debug, Clone, PartialEq)]
pub struct RawPixels {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl RawPixels {
    /// Row-major data; the product of `shape` must equal `data.len()`
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if shape.is_empty() || expected != data.len() {
            return Err(VoxRayError::InvalidImage(format!(
                "pixel array of shape {:?} cannot hold {} values",
                shape,
                data.len()
            )));
        }
        if shape.contains(&0) {
            return Err(VoxRayError::InvalidImage(format!(
                "pixel array of shape {:?} is empty",
                shape
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(VoxRayError::InvalidImage(
                "pixel array contains non-finite values".to_string(),
            ));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

/// Converts raw inputs into classifier tensors
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    /// Target width and height
    pub image_size: u32,

    /// Normalization matching the training pipeline
    pub normalization: Normalization,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self {
            image_size: 224,
            normalization: Normalization::ResNetV2,
        }
    }
}

impl ImagePreprocessor {
    pub fn new(image_size: u32, normalization: Normalization) -> Self {
        Self {
            image_size,
            normalization,
        }
    }

    /// Decode image bytes (JPEG, PNG, ...) to RGB; grayscale is replicated across channels
    pub fn decode(&self, bytes: &[u8]) -> Result<RgbImage> {
        if bytes.is_empty() {
            return Err(VoxRayError::InvalidImage("empty image payload".to_string()));
        }
        let image = image::load_from_memory(bytes)
            .map_err(|e| VoxRayError::InvalidImage(format!("cannot decode image: {}", e)))?;
        Ok(image.to_rgb8())
    }

    /// Convert a decoded pixel array to 8-bit RGB
    ///
    /// Values are min-max rescaled to 0..255. Singleton dimensions are squeezed;
    /// the result must be `[H, W]` (grayscale) or `[H, W, 3]`.
    pub fn rgb_from_pixels(&self, pixels: &RawPixels) -> Result<RgbImage> {
        let (min, max) = pixels
            .data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;
        let denom = if range > 0.0 { range } else { 1.0 };
        let scaled: Vec<u8> = pixels
            .data
            .iter()
            .map(|&v| ((v - min) / denom * 255.0) as u8)
            .collect();

        let dims: Vec<usize> = pixels.shape.iter().copied().filter(|&d| d != 1).collect();

        let (height, width, rgb) = match dims.as_slice() {
            [h, w] => {
                let rgb = scaled.iter().flat_map(|&v| [v, v, v]).collect::<Vec<u8>>();
                (*h, *w, rgb)
            }
            [h, w, 3] => (*h, *w, scaled),
            _ => {
                return Err(VoxRayError::InvalidImage(format!(
                    "unsupported pixel array shape {:?}",
                    pixels.shape
                )))
            }
        };

        let (width, height) = (
            u32::try_from(width).map_err(|_| VoxRayError::InvalidImage("image too wide".into()))?,
            u32::try_from(height).map_err(|_| VoxRayError::InvalidImage("image too tall".into()))?,
        );
        RgbImage::from_raw(width, height, rgb)
            .ok_or_else(|| VoxRayError::InvalidImage("pixel buffer size mismatch".to_string()))
    }

    /// Hard-resize to `image_size` square (bicubic) and normalize into a CHW tensor
    pub fn tensor_from_rgb(&self, image: &RgbImage) -> ImageTensor {
        let size = self.image_size;
        let resized = image::imageops::resize(image, size, size, FilterType::CatmullRom);

        let num_pixels = size as usize * size as usize;
        let mut data = vec![0.0f32; 3 * num_pixels];

        for (i, pixel) in resized.pixels().enumerate() {
            let [c0, c1, c2] = self.normalization.apply(pixel.0);
            // CHW layout: all channel-0 values, then channel 1, then channel 2
            data[i] = c0;
            data[num_pixels + i] = c1;
            data[2 * num_pixels + i] = c2;
        }

        ImageTensor {
            data,
            height: size as usize,
            width: size as usize,
        }
    }

    /// Bytes to tensor
    pub fn preprocess(&self, bytes: &[u8]) -> Result<ImageTensor> {
        let rgb = self.decode(bytes)?;
        Ok(self.tensor_from_rgb(&rgb))
    }

    /// Decoded pixel array to tensor
    pub fn preprocess_pixels(&self, pixels: &RawPixels) -> Result<ImageTensor> {
        let rgb = self.rgb_from_pixels(pixels)?;
        Ok(self.tensor_from_rgb(&rgb))
    }
}

/// Encode an RGB image as PNG bytes
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone()).write_to(&mut buffer, image::ImageFormat::Png)?;
    Ok(buffer.into_inner())
}
