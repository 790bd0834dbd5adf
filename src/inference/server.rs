//! Model Server Module
//!
//! `ModelServer` is the in-process entry point a request layer calls: it owns
//! the preprocessor, the ensemble and the uncertainty, benchmark and
//! explanation components, and is shared across threads as `Arc<ModelServer>`.
//! `ModelServerHandle` guards its one-time construction.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use tracing::{error, info};

use crate::backend::{default_device, ServingBackend};
use crate::explain::{ExplanationGenerator, ExplanationOutcome};
use crate::inference::clinical::{Benchmark, BenchmarkComparator};
use crate::inference::ensemble::{EnsemblePredictor, EnsembleResult};
use crate::inference::predictor::{ClassProbabilities, PredictionResult, RankedClass};
use crate::inference::preprocess::{ImagePreprocessor, ImageTensor, RawPixels};
use crate::inference::uncertainty::{UncertaintyEstimator, UncertaintyResult};
use crate::model::config::ServingConfig;
use crate::model::labels::{ClassLabels, DiagnosisCode};
use crate::model::runtime::{BurnModelLoader, ModelLoader};
use crate::utils::error::{Result, VoxRayError};
use crate::utils::metrics::argmax;

/// Everything `predict_image` reports for one image
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisReport {
    /// Label of the top class
    pub diagnosis: String,

    /// Enumerated form of `diagnosis`
    pub diagnosis_code: DiagnosisCode,

    pub predicted_class: usize,

    /// Ensemble mean probability of the top class
    pub confidence: f32,

    /// Ensemble mean probability per label, in training order
    pub probabilities: ClassProbabilities,

    pub top_k: Vec<RankedClass>,

    /// Top-1 minus top-2 probability
    pub margin: f32,

    /// Entropy of the ensemble mean
    pub entropy: f32,

    pub ensemble: EnsembleResult,

    /// Present only when requested and the MC Dropout pass succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<UncertaintyResult>,

    pub benchmark_comparison: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<Benchmark>,

    pub inference_time_ms: f64,

    /// When the report was produced
    pub generated_at: DateTime<Utc>,
}

/// The prediction core, constructed once and shared by reference
pub struct ModelServer {
    preprocessor: ImagePreprocessor,
    ensemble: EnsemblePredictor,
    uncertainty: UncertaintyEstimator,
    comparator: BenchmarkComparator,
    explainer: ExplanationGenerator,
}

impl ModelServer {
    pub fn new(
        preprocessor: ImagePreprocessor,
        ensemble: EnsemblePredictor,
        uncertainty: UncertaintyEstimator,
        explainer: ExplanationGenerator,
    ) -> Self {
        Self {
            preprocessor,
            ensemble,
            uncertainty,
            comparator: BenchmarkComparator::new(),
            explainer,
        }
    }

    /// Validate `config` and load its ensemble through `loader`
    pub fn from_config(config: &ServingConfig, loader: &dyn ModelLoader) -> Result<Self> {
        config.validate()?;

        let ensemble = EnsemblePredictor::load(&config.model_paths, &config.class_labels, loader)?;
        let server = Self::new(
            ImagePreprocessor::new(config.image_size, config.normalization),
            ensemble,
            UncertaintyEstimator::new(config.mc_dropout_passes)?,
            ExplanationGenerator::new(config.overlay.clone()),
        );

        info!(
            "Model server ready: {} member(s), {} classes, {}x{} input",
            server.ensemble.len(),
            server.labels().len(),
            config.image_size,
            config.image_size
        );
        Ok(server)
    }

    /// Load Burn `.mpk` members on the default device
    pub fn load(config: &ServingConfig) -> Result<Self> {
        let loader = BurnModelLoader::<ServingBackend>::new(
            config.architecture.clone(),
            config.class_labels.clone(),
            default_device(),
        );
        Self::from_config(config, &loader)
    }

    pub fn labels(&self) -> &ClassLabels {
        self.ensemble.labels()
    }

    pub fn ensemble(&self) -> &EnsemblePredictor {
        &self.ensemble
    }

    /// Diagnose encoded image bytes; MC Dropout runs only when `with_uncertainty`
    pub fn predict_image(&self, image_bytes: &[u8], with_uncertainty: bool) -> Result<DiagnosisReport> {
        let start = Instant::now();
        let tensor = self.preprocessor.preprocess(image_bytes)?;
        self.diagnose(&tensor, with_uncertainty, start)
    }

    /// Diagnose an already decoded pixel array
    pub fn predict_pixels(&self, pixels: &RawPixels, with_uncertainty: bool) -> Result<DiagnosisReport> {
        let start = Instant::now();
        let tensor = self.preprocessor.preprocess_pixels(pixels)?;
        self.diagnose(&tensor, with_uncertainty, start)
    }

    fn diagnose(
        &self,
        tensor: &ImageTensor,
        with_uncertainty: bool,
        start: Instant,
    ) -> Result<DiagnosisReport> {
        let ensemble = self.ensemble.predict(tensor)?;
        let prediction = PredictionResult::new(
            ensemble.mean_probability.clone(),
            self.labels(),
            start.elapsed(),
        )?;

        let uncertainty = if with_uncertainty {
            let primary = self.ensemble.primary();
            match primary.guarded(|m| self.uncertainty.estimate(m, tensor)) {
                Ok(result) => Some(result),
                Err(e) => {
                    error!("MC Dropout on '{}' failed: {}", primary.name(), e);
                    None
                }
            }
        } else {
            None
        };

        let comparison = self
            .comparator
            .compare_diagnosis(&prediction.diagnosis, prediction.confidence);

        Ok(DiagnosisReport {
            diagnosis: prediction.class_name.clone(),
            diagnosis_code: prediction.diagnosis.clone(),
            predicted_class: prediction.predicted_class,
            confidence: prediction.confidence,
            probabilities: ClassProbabilities::new(self.labels(), &prediction.probabilities),
            margin: prediction.margin(),
            entropy: prediction.entropy(),
            top_k: prediction.top_k,
            ensemble,
            uncertainty,
            benchmark_comparison: comparison.message,
            benchmark: comparison.benchmark,
            inference_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            generated_at: Utc::now(),
        })
    }

    /// Grad-CAM overlay for `target_class`, or for the ensemble's top class when `None`
    pub fn explain(
        &self,
        image_bytes: &[u8],
        target_class: Option<usize>,
    ) -> Result<ExplanationOutcome> {
        let original = self.preprocessor.decode(image_bytes)?;
        self.explain_rgb(&original, target_class)
    }

    pub fn explain_rgb(
        &self,
        original: &RgbImage,
        target_class: Option<usize>,
    ) -> Result<ExplanationOutcome> {
        let tensor = self.preprocessor.tensor_from_rgb(original);
        let num_classes = self.labels().len();

        let target = match target_class {
            Some(index) if index >= num_classes => {
                return Err(VoxRayError::InvalidClassIndex { index, num_classes })
            }
            Some(index) => index,
            None => {
                let ensemble = self.ensemble.predict(&tensor)?;
                argmax(&ensemble.mean_probability)
                    .map(|(index, _)| index)
                    .ok_or(VoxRayError::NoPredictionsAvailable)?
            }
        };

        self.ensemble.primary().with_model(|m| {
            self.explainer
                .explain(m, &tensor, original, target, self.labels())
        })
    }
}

/// Single-initialization guard around a shared `ModelServer`
///
/// The first `get_or_init` builds the server while holding the lock, so
/// concurrent early callers wait instead of loading twice. A failed build is
/// not remembered; the next call tries again.
#[derive(Default)]
pub struct ModelServerHandle {
    slot: Mutex<Option<Arc<ModelServer>>>,
}

impl ModelServerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_init<F>(&self, init: F) -> Result<Arc<ModelServer>>
    where
        F: FnOnce() -> Result<ModelServer>,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(server) = slot.as_ref() {
            return Ok(Arc::clone(server));
        }

        let server = Arc::new(init()?);
        *slot = Some(Arc::clone(&server));
        Ok(server)
    }

    /// The server, if it has been built
    pub fn get(&self) -> Option<Arc<ModelServer>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
    }

    pub fn is_initialized(&self) -> bool {
        self.get().is_some()
    }
}
