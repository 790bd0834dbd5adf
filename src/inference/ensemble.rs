//! Ensemble Prediction Module
//!
//! Soft voting over independently loaded classifiers. Every member answers on
//! its own; a failing member is logged and left out of the vote, and only a
//! call where every member fails is an error.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::inference::preprocess::ImageTensor;
use crate::model::labels::ClassLabels;
use crate::model::runtime::{ClassifierModel, ModelLoader};
use crate::utils::error::{catch_panic, Result, VoxRayError};
use crate::utils::metrics::{is_probability_vector, DistributionSummary};

/// One loaded model, serialized behind its own lock
pub struct EnsembleMember {
    name: String,
    model: Mutex<Box<dyn ClassifierModel>>,
}

impl EnsembleMember {
    pub fn new(model: Box<dyn ClassifierModel>) -> Self {
        Self {
            name: model.name().to_string(),
            model: Mutex::new(model),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` with exclusive access to the model
    pub fn with_model<T>(&self, f: impl FnOnce(&dyn ClassifierModel) -> T) -> T {
        // Weights are never mutated, so a poisoned lock still guards a usable model
        let guard = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_ref())
    }

    pub fn num_classes(&self) -> usize {
        self.with_model(|m| m.num_classes())
    }

    /// Like `with_model`, but a panic inside `f` comes back as an `Inference` error
    pub fn guarded<T>(&self, f: impl FnOnce(&dyn ClassifierModel) -> Result<T>) -> Result<T> {
        self.with_model(|m| catch_panic(&format!("member '{}'", self.name), || f(m)))
    }

    /// Deterministic probabilities for one image
    pub fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        self.guarded(|m| m.predict(input))
    }
}

/// One member's vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberPrediction {
    pub name: String,
    pub probabilities: Vec<f32>,
}

/// Aggregated ensemble output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    /// Elementwise mean over the members that answered
    pub mean_probability: Vec<f32>,

    /// Elementwise population variance over the same members
    pub variance: Vec<f32>,

    /// Raw vote of each answering member, in load order
    pub individual_predictions: Vec<MemberPrediction>,

    /// Number of members whose votes were averaged
    pub model_count: usize,

    /// Members that failed on this call
    pub failed_members: Vec<String>,
}

/// Owns the ensemble members and the label set they were validated against
pub struct EnsemblePredictor {
    members: Vec<EnsembleMember>,
    labels: ClassLabels,
}

impl EnsemblePredictor {
    /// Load every path with `loader`; unloadable paths are logged and skipped
    ///
    /// Fails with `NoModelsLoaded` only when no path produced a usable member.
    pub fn load(
        paths: &[PathBuf],
        labels: &ClassLabels,
        loader: &dyn ModelLoader,
    ) -> Result<Self> {
        let mut models = Vec::with_capacity(paths.len());

        for path in paths {
            match loader.load(path) {
                Ok(model) => match labels.check_output_width(model.num_classes()) {
                    Ok(()) => models.push(model),
                    Err(e) => warn!("Skipping ensemble member {:?}: {}", path, e),
                },
                Err(e) => warn!("Skipping ensemble member {:?}: {}", path, e),
            }
        }

        if models.len() < paths.len() {
            warn!(
                "Partial ensemble: {} of {} models loaded",
                models.len(),
                paths.len()
            );
        }

        let predictor = Self::from_models(models, labels.clone())?;
        info!(
            "Ensemble ready with {} member(s): {}",
            predictor.len(),
            predictor.member_names().join(", ")
        );
        Ok(predictor)
    }

    /// Build from already loaded models; every model must match the label set
    pub fn from_models(models: Vec<Box<dyn ClassifierModel>>, labels: ClassLabels) -> Result<Self> {
        if models.is_empty() {
            return Err(VoxRayError::NoModelsLoaded);
        }
        for model in &models {
            labels.check_output_width(model.num_classes())?;
        }

        Ok(Self {
            members: models.into_iter().map(EnsembleMember::new).collect(),
            labels,
        })
    }

    /// Soft-vote prediction for one image
    pub fn predict(&self, input: &ImageTensor) -> Result<EnsembleResult> {
        let start = Instant::now();
        let mut individual = Vec::with_capacity(self.members.len());
        let mut failed = Vec::new();

        for member in &self.members {
            match member.predict(input) {
                Ok(probabilities) if probabilities.len() != self.labels.len() => {
                    error!(
                        "Member '{}' returned {} probabilities for {} classes",
                        member.name(),
                        probabilities.len(),
                        self.labels.len()
                    );
                    failed.push(member.name().to_string());
                }
                Ok(probabilities) if !is_probability_vector(&probabilities) => {
                    error!(
                        "Member '{}' returned values outside [0, 1]: {:?}",
                        member.name(),
                        probabilities
                    );
                    failed.push(member.name().to_string());
                }
                Ok(probabilities) => {
                    individual.push(MemberPrediction {
                        name: member.name().to_string(),
                        probabilities,
                    });
                }
                Err(e) => {
                    error!("Member '{}' failed: {}", member.name(), e);
                    failed.push(member.name().to_string());
                }
            }
        }

        if individual.is_empty() {
            return Err(VoxRayError::NoPredictionsAvailable);
        }

        let votes: Vec<Vec<f32>> = individual.iter().map(|m| m.probabilities.clone()).collect();
        let summary = DistributionSummary::from_samples(&votes)?;

        debug!(
            "Ensemble vote from {} member(s) in {:.2} ms",
            summary.count,
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(EnsembleResult {
            mean_probability: summary.mean,
            variance: summary.variance,
            individual_predictions: individual,
            model_count: summary.count,
            failed_members: failed,
        })
    }

    /// The first loaded member, used for uncertainty and explanations
    pub fn primary(&self) -> &EnsembleMember {
        &self.members[0]
    }

    pub fn members(&self) -> &[EnsembleMember] {
        &self.members
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(EnsembleMember::name).collect()
    }

    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
