//! Error Handling Module
//!
//! Defines the error taxonomy for the VoxRay prediction core.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for VoxRay serving operations
#[derive(Error, Debug)]
pub enum VoxRayError {
    /// Input bytes or pixel array could not be turned into an image
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// A single ensemble member could not be loaded
    #[error("Failed to load model at '{path}': {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    /// None of the configured models could be loaded
    #[error("No ensemble members could be loaded")]
    NoModelsLoaded,

    /// Model output width does not match the label set
    #[error("Model produces {actual} outputs but the label set has {expected} classes")]
    LabelMismatch { expected: usize, actual: usize },

    /// Every ensemble member failed for this call
    #[error("No successful predictions from any ensemble member")]
    NoPredictionsAvailable,

    /// Monte Carlo Dropout needs at least two passes
    #[error("Invalid pass count {0}: at least 2 stochastic passes are required")]
    InvalidPassCount(usize),

    /// Grad-CAM could not produce a saliency map
    #[error("Explanation unavailable: {0}")]
    ExplanationUnavailable(String),

    /// Class index outside the label set
    #[error("Class index {index} out of range for {num_classes} classes")]
    InvalidClassIndex { index: usize, num_classes: usize },

    /// Error raised by the inference runtime
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// How a caller-facing layer should classify an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusHint {
    /// The request itself was bad; retrying the same input will not help
    ClientError,
    /// The service cannot answer right now (no models, all members failed)
    Unavailable,
    /// Anything else
    Internal,
}

impl VoxRayError {
    /// Map the error onto the caller-facing class
    pub fn status_hint(&self) -> StatusHint {
        match self {
            VoxRayError::InvalidImage(_)
            | VoxRayError::InvalidPassCount(_)
            | VoxRayError::InvalidClassIndex { .. } => StatusHint::ClientError,
            VoxRayError::NoModelsLoaded
            | VoxRayError::NoPredictionsAvailable
            | VoxRayError::ExplanationUnavailable(_) => StatusHint::Unavailable,
            VoxRayError::ModelLoad { .. }
            | VoxRayError::LabelMismatch { .. }
            | VoxRayError::Inference(_)
            | VoxRayError::Config(_)
            | VoxRayError::Io(_)
            | VoxRayError::Serialization(_) => StatusHint::Internal,
        }
    }
}

impl From<image::ImageError> for VoxRayError {
    fn from(err: image::ImageError) -> Self {
        VoxRayError::InvalidImage(err.to_string())
    }
}

impl From<serde_json::Error> for VoxRayError {
    fn from(err: serde_json::Error) -> Self {
        VoxRayError::Serialization(err.to_string())
    }
}

/// Convenience Result type for VoxRay serving operations
pub type Result<T> = std::result::Result<T, VoxRayError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| VoxRayError::Inference(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| VoxRayError::Inference(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| VoxRayError::Inference(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| VoxRayError::Inference(f()))
    }
}

/// Run one model call, turning a panic inside it into `VoxRayError::Inference`
///
/// Burn reports shape and backend failures by panicking; callers that isolate
/// one model from the rest go through here.
pub fn catch_panic<T>(what: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(VoxRayError::Inference(format!("{} panicked: {}", what, message)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VoxRayError::InvalidPassCount(1);
        assert_eq!(
            format!("{}", err),
            "Invalid pass count 1: at least 2 stochastic passes are required"
        );
    }

    #[test]
    fn test_model_load_error_mentions_path() {
        let err = VoxRayError::ModelLoad {
            path: PathBuf::from("/models/medical_model_final.mpk"),
            reason: "file not found".to_string(),
        };
        assert!(format!("{}", err).contains("medical_model_final.mpk"));
    }

    #[test]
    fn test_status_hint() {
        assert_eq!(
            VoxRayError::InvalidImage("bad".into()).status_hint(),
            StatusHint::ClientError
        );
        assert_eq!(
            VoxRayError::NoPredictionsAvailable.status_hint(),
            StatusHint::Unavailable
        );
        assert_eq!(
            VoxRayError::Config("x".into()).status_hint(),
            StatusHint::Internal
        );
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let with_context = result.context("Failed to read weights");
        assert!(matches!(with_context, Err(VoxRayError::Inference(msg)) if msg.contains("weights")));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        assert!(opt.context("Value was None").is_err());
    }

    #[test]
    fn test_catch_panic_becomes_inference_error() {
        let result: Result<()> = catch_panic("member 'broken'", || panic!("maxpool on empty input"));
        match result {
            Err(VoxRayError::Inference(msg)) => {
                assert!(msg.contains("member 'broken'"));
                assert!(msg.contains("maxpool on empty input"));
            }
            other => panic!("expected an inference error, got {:?}", other),
        }

        let formatted: Result<()> = catch_panic("pass", || panic!("index {} out of range", 7));
        assert!(matches!(formatted, Err(VoxRayError::Inference(msg)) if msg.contains("index 7")));
    }

    #[test]
    fn test_catch_panic_passes_results_through() {
        assert_eq!(catch_panic("ok", || Ok(3)).unwrap(), 3);
        assert!(matches!(
            catch_panic::<()>("err", || Err(VoxRayError::NoModelsLoaded)),
            Err(VoxRayError::NoModelsLoaded)
        ));
    }
}
