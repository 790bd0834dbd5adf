//! Model module for the X-ray classifier and its serving runtime
//!
//! This module provides:
//! - The Burn CNN used by every ensemble member
//! - Serving configuration and architecture hyperparameters
//! - The ordered class label set and enumerated diagnosis codes
//! - The model capability trait and the `.mpk` loader

pub mod cnn;
pub mod config;
pub mod labels;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use cnn::{DropoutMode, XrayClassifier, XrayClassifierConfig};
pub use config::{ArchitectureConfig, ServingConfig};
pub use labels::{ClassLabels, DiagnosisCode, VOXRAY_CLASS_LABELS};
pub use runtime::{BurnClassifier, BurnModelLoader, ClassifierModel, ModelLoader};
