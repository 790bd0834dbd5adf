//! # VoxRay Serving
//!
//! The prediction core behind the VoxRay X-ray assistant, built on the Burn framework.
//!
//! ## Features
//!
//! - **Ensemble diagnosis** by soft voting over independently loaded classifiers
//! - **Monte Carlo Dropout** uncertainty as an opt-in, slower path
//! - **Grad-CAM** heatmaps rendered as PNG overlays
//! - **Clinical benchmarks** giving a qualitative read of the confidence
//!
//! ## Modules
//!
//! - `model`: CNN architecture, configuration, label set and model loading
//! - `inference`: preprocessing, ensemble, uncertainty, benchmarks and the model server
//! - `explain`: Grad-CAM and overlay rendering
//! - `utils`: errors, logging and distribution statistics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voxray_serving::{ModelServer, ServingConfig};
//!
//! let config = ServingConfig::with_models(["models/medical_model_final.mpk"]);
//! let server = ModelServer::load(&config)?;
//!
//! let report = server.predict_image(&std::fs::read("chest.png")?, true)?;
//! println!("{} ({:.1}%)", report.diagnosis, report.confidence * 100.0);
//! ```

pub mod backend;
pub mod explain;
pub mod inference;
pub mod model;
pub mod utils;

// Re-export commonly used items for convenience
pub use explain::{ExplanationGenerator, ExplanationOutcome};
pub use inference::{
    BenchmarkComparator, DiagnosisReport, EnsemblePredictor, ImagePreprocessor, ModelServer,
    ModelServerHandle, UncertaintyEstimator,
};
pub use model::{ClassLabels, ClassifierModel, DiagnosisCode, ModelLoader, ServingConfig};
pub use utils::error::{Result, VoxRayError};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
