//! Model Runtime Module
//!
//! The `ClassifierModel` capability every ensemble member satisfies, the
//! `ModelLoader` seam that turns a filesystem path into a member, and their
//! Burn implementations.
//!
//! ## Grad-CAM graph access
//!
//! The Burn classifier keeps two copies of its weights: the autodiff model and
//! its inference-mode twin (`AutodiffModule::valid`). Predictions and
//! Monte Carlo passes run on the twin, so batch norm always uses its running
//! statistics. Explanations run the backbone on the twin, lift the final
//! feature map into the autodiff backend as a tracked leaf and back-propagate
//! the target logit through the head only.

use std::path::{Path, PathBuf};

use burn::{
    module::{AutodiffModule, Module},
    record::CompactRecorder,
    tensor::{
        backend::{AutodiffBackend, Backend},
        Tensor, TensorData,
    },
};
use tracing::{debug, info};

use crate::explain::gradcam::FeatureGradients;
use crate::inference::preprocess::ImageTensor;
use crate::model::cnn::{DropoutMode, XrayClassifier};
use crate::model::config::ArchitectureConfig;
use crate::model::labels::ClassLabels;
use crate::utils::error::{Result, VoxRayError};

/// A loaded classifier that produces class probability vectors
///
/// Implementations only need to be `Send`; callers serialize access per model.
pub trait ClassifierModel: Send {
    /// Human-readable member name (usually the model file stem)
    fn name(&self) -> &str;

    /// Width of the probability vector
    fn num_classes(&self) -> usize;

    /// Deterministic softmax probabilities for one image
    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>>;

    /// Softmax probabilities with dropout forced active
    fn predict_stochastic(&self, input: &ImageTensor) -> Result<Vec<f32>>;

    /// Final backbone activations and the gradient of `class_index`'s logit with respect to them
    fn activations_and_gradients(
        &self,
        _input: &ImageTensor,
        _class_index: usize,
    ) -> Result<FeatureGradients> {
        Err(VoxRayError::ExplanationUnavailable(format!(
            "model '{}' does not expose feature gradients",
            self.name()
        )))
    }
}

/// Turns a model path into a loaded classifier
pub trait ModelLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn ClassifierModel>>;
}

fn input_tensor<B: Backend>(input: &ImageTensor, device: &B::Device) -> Tensor<B, 4> {
    Tensor::from_floats(TensorData::new(input.data().to_vec(), input.shape()), device)
}

fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| VoxRayError::Inference(format!("cannot read tensor data: {:?}", e)))
}

/// `XrayClassifier` bound to an autodiff backend
pub struct BurnClassifier<B: AutodiffBackend> {
    name: String,
    model: XrayClassifier<B>,
    inference: XrayClassifier<B::InnerBackend>,
    device: B::Device,
}

impl<B: AutodiffBackend> BurnClassifier<B> {
    pub fn new(name: impl Into<String>, model: XrayClassifier<B>, device: B::Device) -> Self {
        let inference = model.valid();
        Self {
            name: name.into(),
            model,
            inference,
            device,
        }
    }

    fn probabilities(&self, input: &ImageTensor, dropout: DropoutMode) -> Result<Vec<f32>> {
        let x = input_tensor::<B::InnerBackend>(input, &self.device);
        let probs = self.inference.forward_softmax(x, dropout);
        tensor_to_vec(probs)
    }
}

impl<B: AutodiffBackend> ClassifierModel for BurnClassifier<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_classes(&self) -> usize {
        self.inference.output_width()
    }

    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        self.probabilities(input, DropoutMode::Disabled)
    }

    fn predict_stochastic(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        self.probabilities(input, DropoutMode::Sampled)
    }

    fn activations_and_gradients(
        &self,
        input: &ImageTensor,
        class_index: usize,
    ) -> Result<FeatureGradients> {
        let num_classes = self.num_classes();
        if class_index >= num_classes {
            return Err(VoxRayError::InvalidClassIndex {
                index: class_index,
                num_classes,
            });
        }

        let x = input_tensor::<B::InnerBackend>(input, &self.device);
        let features = self.inference.features(x);
        let [_, channels, height, width] = features.dims();

        let features = Tensor::<B, 4>::from_inner(features).require_grad();
        let logits = self.model.classify(features.clone(), DropoutMode::Disabled);

        // Pre-softmax score of the target class
        let score = logits.slice([0..1, class_index..class_index + 1]).sum();
        let grads = score.backward();

        let gradients = features.grad(&grads).ok_or_else(|| {
            VoxRayError::ExplanationUnavailable(
                "no gradient reached the final feature map".to_string(),
            )
        })?;

        FeatureGradients::new(
            channels,
            height,
            width,
            tensor_to_vec(features.inner())?,
            tensor_to_vec(gradients)?,
        )
    }
}

/// Loads `CompactRecorder` (`.mpk`) records into `XrayClassifier`s
pub struct BurnModelLoader<B: AutodiffBackend> {
    architecture: ArchitectureConfig,
    labels: ClassLabels,
    device: B::Device,
}

impl<B: AutodiffBackend> BurnModelLoader<B> {
    pub fn new(architecture: ArchitectureConfig, labels: ClassLabels, device: B::Device) -> Self {
        Self {
            architecture,
            labels,
            device,
        }
    }

    /// The path as given, or with the recorder's `.mpk` extension added
    fn resolve(path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        let with_ext = path.with_extension("mpk");
        with_ext.is_file().then_some(with_ext)
    }
}

impl<B: AutodiffBackend> ModelLoader for BurnModelLoader<B> {
    fn load(&self, path: &Path) -> Result<Box<dyn ClassifierModel>> {
        let resolved = Self::resolve(path).ok_or_else(|| VoxRayError::ModelLoad {
            path: path.to_path_buf(),
            reason: "file not found".to_string(),
        })?;

        debug!("Loading weights from {:?}", resolved);
        let config = self.architecture.classifier_config(self.labels.len());
        let model: XrayClassifier<B> = config
            .init(&self.device)
            .load_file(&resolved, &CompactRecorder::new(), &self.device)
            .map_err(|e| VoxRayError::ModelLoad {
                path: resolved.clone(),
                reason: format!("{:?}", e),
            })?;

        // The label list and the model are only valid as a pair
        self.labels.check_output_width(model.output_width())?;

        let name = resolved
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("model")
            .to_string();
        info!(
            "Loaded model '{}' ({} classes) from {:?}",
            name,
            model.output_width(),
            resolved
        );

        Ok(Box::new(BurnClassifier::new(name, model, self.device.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cnn::XrayClassifierConfig;
    use crate::model::testing::{random_input, tiny_architecture, tiny_classifier, TestBackend};
    use burn_ndarray::NdArray;

    #[test]
    fn test_predict_returns_distribution() {
        let classifier = tiny_classifier("tiny", 6);
        let probs = classifier.predict(&random_input(32)).unwrap();

        assert_eq!(probs.len(), 6);
        assert_eq!(classifier.num_classes(), 6);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn test_predict_is_deterministic() {
        let classifier = tiny_classifier("tiny", 6);
        let input = random_input(32);

        let a = classifier.predict(&input).unwrap();
        let b = classifier.predict(&input).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stochastic_pass_is_a_distribution() {
        let classifier = tiny_classifier("tiny", 4);
        let probs = classifier.predict_stochastic(&random_input(32)).unwrap();

        assert_eq!(probs.len(), 4);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_feature_gradients_shape() {
        let classifier = tiny_classifier("tiny", 6);
        let fg = classifier
            .activations_and_gradients(&random_input(32), 2)
            .unwrap();

        // base 4 * 8 channels, 32 / 16 spatial
        assert_eq!(fg.dims(), [32, 2, 2]);
    }

    #[test]
    fn test_gradient_class_out_of_range() {
        let classifier = tiny_classifier("tiny", 6);
        let result = classifier.activations_and_gradients(&random_input(32), 6);

        assert!(matches!(
            result,
            Err(VoxRayError::InvalidClassIndex { index: 6, num_classes: 6 })
        ));
    }

    #[test]
    fn test_loader_missing_file() {
        let loader = BurnModelLoader::<TestBackend>::new(
            tiny_architecture(),
            ClassLabels::voxray(),
            Default::default(),
        );

        let result = loader.load(Path::new("/nonexistent/dir/model.mpk"));
        assert!(matches!(result, Err(VoxRayError::ModelLoad { .. })));
    }

    #[test]
    fn test_loader_roundtrip_with_and_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("member_a");

        XrayClassifierConfig::new(6)
            .with_base_filters(4)
            .with_hidden_units(8)
            .init::<NdArray>(&Default::default())
            .save_file(stem.clone(), &CompactRecorder::new())
            .unwrap();

        let loader = BurnModelLoader::<TestBackend>::new(
            tiny_architecture(),
            ClassLabels::voxray(),
            Default::default(),
        );

        let from_stem = loader.load(&stem).unwrap();
        assert_eq!(from_stem.name(), "member_a");
        assert_eq!(from_stem.num_classes(), 6);

        let from_file = loader.load(&stem.with_extension("mpk")).unwrap();
        assert_eq!(from_file.predict(&random_input(32)).unwrap().len(), 6);
    }

    #[test]
    fn test_loader_rejects_label_width_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("three_class");

        XrayClassifierConfig::new(3)
            .with_base_filters(4)
            .with_hidden_units(8)
            .init::<NdArray>(&Default::default())
            .save_file(stem.clone(), &CompactRecorder::new())
            .unwrap();

        let loader = BurnModelLoader::<TestBackend>::new(
            tiny_architecture(),
            ClassLabels::voxray(),
            Default::default(),
        );

        assert!(matches!(
            loader.load(&stem),
            Err(VoxRayError::LabelMismatch { .. }) | Err(VoxRayError::ModelLoad { .. })
        ));
    }
}
