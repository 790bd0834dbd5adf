//! Scripted classifiers standing in for trained weights in unit tests

use std::sync::atomic::{AtomicUsize, Ordering};

use burn::backend::Autodiff;
use burn::tensor::{backend::Backend, Distribution, Tensor};
use burn_ndarray::NdArray;

use crate::explain::gradcam::FeatureGradients;
use crate::inference::preprocess::ImageTensor;
use crate::model::config::ArchitectureConfig;
use crate::model::runtime::{BurnClassifier, ClassifierModel};
use crate::utils::error::{Result, VoxRayError};

/// Replays fixed probability vectors; stochastic passes cycle through `samples`
pub(crate) struct FakeModel {
    name: String,
    samples: Vec<Vec<f32>>,
    next: AtomicUsize,
    fail: bool,
    panic: bool,
    features: Option<FeatureGradients>,
}

impl FakeModel {
    /// Always returns `probabilities`
    pub(crate) fn fixed(name: &str, probabilities: Vec<f32>) -> Self {
        Self::cycling(name, vec![probabilities])
    }

    /// Deterministic pass returns the first sample; stochastic passes rotate
    pub(crate) fn cycling(name: &str, samples: Vec<Vec<f32>>) -> Self {
        Self {
            name: name.to_string(),
            samples,
            next: AtomicUsize::new(0),
            fail: false,
            panic: false,
            features: None,
        }
    }

    /// Every call fails
    pub(crate) fn failing(name: &str, num_classes: usize) -> Self {
        Self {
            fail: true,
            ..Self::fixed(name, vec![0.0; num_classes])
        }
    }

    /// Every call panics, the way Burn reports shape errors
    pub(crate) fn panicking(name: &str, num_classes: usize) -> Self {
        Self {
            panic: true,
            ..Self::fixed(name, vec![0.0; num_classes])
        }
    }

    pub(crate) fn with_features(mut self, features: FeatureGradients) -> Self {
        self.features = Some(features);
        self
    }

    pub(crate) fn boxed(self) -> Box<dyn ClassifierModel> {
        Box::new(self)
    }

    fn check(&self) -> Result<()> {
        if self.panic {
            panic!("'{}' hit a backend panic", self.name);
        }
        if self.fail {
            return Err(VoxRayError::Inference(format!(
                "'{}' failed on purpose",
                self.name
            )));
        }
        Ok(())
    }
}

impl ClassifierModel for FakeModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_classes(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    fn predict(&self, _input: &ImageTensor) -> Result<Vec<f32>> {
        self.check()?;
        Ok(self.samples[0].clone())
    }

    fn predict_stochastic(&self, _input: &ImageTensor) -> Result<Vec<f32>> {
        self.check()?;
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.samples.len();
        Ok(self.samples[i].clone())
    }

    fn activations_and_gradients(
        &self,
        _input: &ImageTensor,
        class_index: usize,
    ) -> Result<FeatureGradients> {
        self.check()?;
        if class_index >= self.num_classes() {
            return Err(VoxRayError::InvalidClassIndex {
                index: class_index,
                num_classes: self.num_classes(),
            });
        }
        self.features.clone().ok_or_else(|| {
            VoxRayError::ExplanationUnavailable(format!(
                "model '{}' does not expose feature gradients",
                self.name
            ))
        })
    }
}

/// A small all-zero input tensor
pub(crate) fn blank_input() -> ImageTensor {
    ImageTensor::new(vec![0.0; 3 * 8 * 8], 8, 8).unwrap()
}

pub(crate) type TestBackend = Autodiff<NdArray>;

/// Smallest useful backbone: 4 base filters, 8 hidden units
pub(crate) fn tiny_architecture() -> ArchitectureConfig {
    ArchitectureConfig {
        base_filters: 4,
        hidden_units: 8,
        dropout_rate: 0.3,
    }
}

/// Randomly initialized Burn classifier on the NdArray backend
pub(crate) fn tiny_classifier(name: &str, num_classes: usize) -> BurnClassifier<TestBackend> {
    let device: <TestBackend as Backend>::Device = Default::default();
    let model = tiny_architecture()
        .classifier_config(num_classes)
        .init::<TestBackend>(&device);
    BurnClassifier::new(name, model, device)
}

/// Uniform noise in `[-1, 1]`, already normalized
pub(crate) fn random_input(size: usize) -> ImageTensor {
    let device = Default::default();
    let data: Vec<f32> = Tensor::<NdArray, 1>::random(
        [3 * size * size],
        Distribution::Uniform(-1.0, 1.0),
        &device,
    )
    .into_data()
    .to_vec()
    .unwrap();
    ImageTensor::new(data, size, size).unwrap()
}
