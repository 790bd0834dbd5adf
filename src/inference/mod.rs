//! Inference module for ensemble diagnosis
//!
//! This module provides:
//! - Image and raw pixel preprocessing
//! - Soft-vote ensemble prediction over independently loaded models
//! - Optional Monte Carlo Dropout uncertainty
//! - Clinical benchmark comparison
//! - The `ModelServer` service object tying them together
//!
//! ## Request flow
//!
//! Bytes are decoded and normalized once; the tensor goes to every ensemble
//! member, then (if asked) through the primary member's MC Dropout passes.
//! Explanations are a separate call on the same primary member.

pub mod clinical;
pub mod ensemble;
pub mod predictor;
pub mod preprocess;
pub mod server;
pub mod uncertainty;

// Re-export main types for convenience
pub use clinical::{BenchmarkComparator, ComparisonVerdict};
pub use ensemble::{EnsembleMember, EnsemblePredictor, EnsembleResult};
pub use predictor::PredictionResult;
pub use preprocess::{ImagePreprocessor, ImageTensor, Normalization, RawPixels};
pub use server::{DiagnosisReport, ModelServer, ModelServerHandle};
pub use uncertainty::{UncertaintyEstimator, UncertaintyResult};
