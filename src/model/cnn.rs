//! CNN Model Architecture for X-ray Classification
//!
//! A convolutional backbone followed by a pooled dense head, built with Burn.
//! The backbone and head are exposed separately so callers can reach the last
//! spatial feature map (needed for Grad-CAM) without rebuilding the graph.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Distribution, Tensor},
};

/// Downsampling of the backbone: four 2x2 max pools
pub const BACKBONE_STRIDE: u32 = 16;

/// Configuration for the XrayClassifier CNN model
#[derive(Config, Debug)]
pub struct XrayClassifierConfig {
    /// Number of output classes (must equal the label set length)
    pub num_classes: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Base number of convolutional filters
    #[config(default = "32")]
    pub base_filters: usize,

    /// Width of the hidden dense layer
    #[config(default = "256")]
    pub hidden_units: usize,

    /// Dropout rate applied before the output layer
    #[config(default = "0.3")]
    pub dropout_rate: f64,
}

impl XrayClassifierConfig {
    /// Initialize a model with freshly initialized weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> XrayClassifier<B> {
        XrayClassifier::new(self, device)
    }
}

/// How the head treats its dropout layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropoutMode {
    /// Burn's behaviour: active only on autodiff backends
    Backend,
    /// Always sample a fresh dropout mask (Monte Carlo Dropout)
    Sampled,
    /// Never drop
    Disabled,
}

/// A CNN block with Conv2d, BatchNorm, ReLU, and optional MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    /// Create a new convolutional block
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        with_pool: bool,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        let bn = BatchNormConfig::new(out_channels).init(device);

        let pool = if with_pool {
            Some(MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init())
        } else {
            None
        };

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    /// Forward pass through the block
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);

        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// X-ray classifier CNN
///
/// Architecture:
/// - Backbone: 4 convolutional blocks (3 -> b -> 2b -> 4b -> 8b filters), each halving resolution
/// - Head: global average pooling, dense + ReLU, dropout, dense to class logits
#[derive(Module, Debug)]
pub struct XrayClassifier<B: Backend> {
    // Backbone
    pub conv1: ConvBlock<B>,
    pub conv2: ConvBlock<B>,
    pub conv3: ConvBlock<B>,
    pub conv4: ConvBlock<B>,

    // Head
    pub global_pool: AdaptiveAvgPool2d,
    pub fc1: Linear<B>,
    pub dropout: Dropout,
    pub fc2: Linear<B>,

    num_classes: usize,
}

impl<B: Backend> XrayClassifier<B> {
    /// Create a new XrayClassifier from configuration
    pub fn new(config: &XrayClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_filters;

        let conv1 = ConvBlock::new(config.in_channels, base, 3, true, device); // 224 -> 112
        let conv2 = ConvBlock::new(base, base * 2, 3, true, device); // 112 -> 56
        let conv3 = ConvBlock::new(base * 2, base * 4, 3, true, device); // 56 -> 28
        let conv4 = ConvBlock::new(base * 4, base * 8, 3, true, device); // 28 -> 14

        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let fc1 = LinearConfig::new(base * 8, config.hidden_units).init(device);
        let dropout = DropoutConfig::new(config.dropout_rate).init();
        let fc2 = LinearConfig::new(config.hidden_units, config.num_classes).init(device);

        Self {
            conv1,
            conv2,
            conv3,
            conv4,
            global_pool,
            fc1,
            dropout,
            fc2,
            num_classes: config.num_classes,
        }
    }

    /// Backbone only: input `[batch, 3, H, W]` to the last feature map `[batch, C, H/16, W/16]`
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        self.conv4.forward(x)
    }

    /// Head only: feature map to pre-softmax logits `[batch, num_classes]`
    pub fn classify(&self, features: Tensor<B, 4>, dropout: DropoutMode) -> Tensor<B, 2> {
        // Global pooling: [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(features);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.fc1.forward(x);
        let x = Relu::new().forward(x);
        let x = match dropout {
            DropoutMode::Backend => self.dropout.forward(x),
            DropoutMode::Sampled => self.sampled_dropout(x),
            DropoutMode::Disabled => x,
        };
        self.fc2.forward(x)
    }

    /// Forward pass through the network, returning logits
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.features(x);
        self.classify(features, DropoutMode::Backend)
    }

    /// Forward pass with softmax
    pub fn forward_softmax(&self, x: Tensor<B, 4>, dropout: DropoutMode) -> Tensor<B, 2> {
        let logits = self.classify(self.features(x), dropout);
        burn::tensor::activation::softmax(logits, 1)
    }

    /// Inverted dropout with a freshly sampled mask, regardless of backend
    fn sampled_dropout(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let rate = self.dropout.prob;
        if rate <= 0.0 {
            return x;
        }
        let keep = 1.0 - rate;
        let mask = x.random_like(Distribution::Bernoulli(keep));
        x.mul(mask).div_scalar(keep)
    }

    /// Number of classes this model was configured with
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Width of the output layer as stored in the weights
    pub fn output_width(&self) -> usize {
        self.fc2.weight.val().dims()[1]
    }
}
