//! Serving Configuration Module
//!
//! Defines the configuration for loading an ensemble and serving predictions:
//! model paths, the class label set, preprocessing, Monte Carlo Dropout and
//! heatmap overlay parameters.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::explain::overlay::OverlayConfig;
use crate::inference::preprocess::Normalization;
use crate::model::cnn::{XrayClassifierConfig, BACKBONE_STRIDE};
use crate::model::labels::ClassLabels;
use crate::utils::error::{Result, VoxRayError};

/// Default input resolution of the classifier (square)
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Smallest input that leaves a non-empty feature map after the backbone
pub const MIN_IMAGE_SIZE: u32 = BACKBONE_STRIDE;

/// Largest accepted input resolution
pub const MAX_IMAGE_SIZE: u32 = 4096;

/// Default number of Monte Carlo Dropout passes
pub const DEFAULT_MC_PASSES: usize = 10;

/// Hyperparameters needed to rebuild the network before loading its weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectureConfig {
    /// Number of filters in the first convolutional block
    pub base_filters: usize,

    /// Width of the hidden dense layer
    pub hidden_units: usize,

    /// Dropout rate before the output layer (also the MC Dropout rate)
    pub dropout_rate: f64,
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        Self {
            base_filters: 32,
            hidden_units: 256,
            dropout_rate: 0.3,
        }
    }
}

impl ArchitectureConfig {
    /// Burn module config for a model with `num_classes` outputs
    pub fn classifier_config(&self, num_classes: usize) -> XrayClassifierConfig {
        XrayClassifierConfig::new(num_classes)
            .with_base_filters(self.base_filters)
            .with_hidden_units(self.hidden_units)
            .with_dropout_rate(self.dropout_rate)
    }
}

/// Complete configuration of a model server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Ensemble members, in load order; the first that loads is the primary model
    pub model_paths: Vec<PathBuf>,

    /// Class labels in training order
    pub class_labels: ClassLabels,

    /// Input width and height after the hard resize
    pub image_size: u32,

    /// Normalization the models were trained with
    pub normalization: Normalization,

    /// Stochastic passes for the optional uncertainty estimate
    pub mc_dropout_passes: usize,

    /// Network hyperparameters
    pub architecture: ArchitectureConfig,

    /// Heatmap rendering parameters
    pub overlay: OverlayConfig,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            model_paths: vec![PathBuf::from("models/medical_model_final.mpk")],
            class_labels: ClassLabels::voxray(),
            image_size: DEFAULT_IMAGE_SIZE,
            normalization: Normalization::ResNetV2,
            mc_dropout_passes: DEFAULT_MC_PASSES,
            architecture: ArchitectureConfig::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl ServingConfig {
    /// Configuration for the given model files, defaults elsewhere
    pub fn with_models<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        Self {
            model_paths: paths.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Read and validate a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.model_paths.is_empty() {
            return Err(VoxRayError::Config("no model paths configured".to_string()));
        }
        if self.class_labels.is_empty() {
            return Err(VoxRayError::Config("class label set is empty".to_string()));
        }
        if !(MIN_IMAGE_SIZE..=MAX_IMAGE_SIZE).contains(&self.image_size) {
            return Err(VoxRayError::Config(format!(
                "image_size must be in [{}, {}], got {}",
                MIN_IMAGE_SIZE, MAX_IMAGE_SIZE, self.image_size
            )));
        }
        if self.mc_dropout_passes < 2 {
            return Err(VoxRayError::Config(format!(
                "mc_dropout_passes must be >= 2, got {}",
                self.mc_dropout_passes
            )));
        }
        if !(0.0..1.0).contains(&self.architecture.dropout_rate) {
            return Err(VoxRayError::Config(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.architecture.dropout_rate
            )));
        }
        self.overlay.validate()?;
        Ok(())
    }
}
