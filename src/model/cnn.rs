//! Tri-head CNN for digit domain adaptation
//!
//! A shared convolutional backbone feeds three independent dense heads. Heads 1
//! and 2 act as pseudo-labelers and differ in activation (SELU, ELU) so they
//! disagree on ambiguous inputs; head 3 is the target-domain classifier.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Distribution, Tensor},
};

use super::config::TriHeadConfig;

const SELU_ALPHA: f64 = 1.673_263_242_354_377_3;
const SELU_LAMBDA: f64 = 1.050_700_987_355_480_5;

fn selu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let pos = x.clone().clamp_min(0.0);
    let neg = (x.clamp_max(0.0).exp() - 1.0) * SELU_ALPHA;
    (pos + neg) * SELU_LAMBDA
}

fn elu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let pos = x.clone().clamp_min(0.0);
    let neg = x.clamp_max(0.0).exp() - 1.0;
    pos + neg
}

/// Additive zero-mean Gaussian noise, active only while training
fn gaussian_noise<B: Backend, const D: usize>(x: Tensor<B, D>, std: f64) -> Tensor<B, D> {
    if !B::ad_enabled() || std <= 0.0 {
        return x;
    }
    let noise = x.random_like(Distribution::Normal(0.0, std));
    x + noise
}

/// Shared feature extractor: two 5x5 conv/pool stages, then flatten
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub conv1: Conv2d<B>,
    pub conv2: Conv2d<B>,
    pool: MaxPool2d,
    relu: Relu,
    dropout: Dropout,
    noise_std: f64,
}

impl<B: Backend> Backbone<B> {
    pub fn new(config: &TriHeadConfig, device: &B::Device) -> Self {
        let kernel = [config.kernel_size, config.kernel_size];
        Self {
            conv1: Conv2dConfig::new([config.in_channels, config.filters], kernel)
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            conv2: Conv2dConfig::new([config.filters, config.filters], kernel)
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            relu: Relu::new(),
            dropout: DropoutConfig::new(config.dropout).init(),
            noise_std: config.noise_std,
        }
    }

    /// `[batch, C, H, W]` -> `[batch, filters * H/4 * W/4]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.conv1.forward(x));
        let x = self.pool.forward(self.dropout.forward(x));

        let x = self.relu.forward(self.conv2.forward(x));
        let x = self.pool.forward(self.dropout.forward(x));
        let x = gaussian_noise(x, self.noise_std);

        let [batch, c, h, w] = x.dims();
        x.reshape([batch, c * h * w])
    }
}

/// Head 1: three SELU layers
#[derive(Module, Debug)]
pub struct SeluHead<B: Backend> {
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    pub fc3: Linear<B>,
    pub out: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> SeluHead<B> {
    pub fn new(config: &TriHeadConfig, device: &B::Device) -> Self {
        Self {
            fc1: LinearConfig::new(config.feature_size(), 48).init(device),
            fc2: LinearConfig::new(48, 32).init(device),
            fc3: LinearConfig::new(32, 32).init(device),
            out: LinearConfig::new(32, config.num_classes).init(device),
            dropout: DropoutConfig::new(config.dropout).init(),
        }
    }

    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = selu(self.fc1.forward(features));
        let x = self.dropout.forward(selu(self.fc2.forward(x)));
        let x = self.dropout.forward(selu(self.fc3.forward(x)));
        self.out.forward(x)
    }
}

/// Head 2: ELU with dropout and input noise
#[derive(Module, Debug)]
pub struct EluHead<B: Backend> {
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    pub out: Linear<B>,
    dropout: Dropout,
    noise_std: f64,
}

impl<B: Backend> EluHead<B> {
    pub fn new(config: &TriHeadConfig, device: &B::Device) -> Self {
        Self {
            fc1: LinearConfig::new(config.feature_size(), 32).init(device),
            fc2: LinearConfig::new(32, 16).init(device),
            out: LinearConfig::new(16, config.num_classes).init(device),
            dropout: DropoutConfig::new(config.dropout).init(),
            noise_std: config.noise_std,
        }
    }

    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = elu(self.fc1.forward(features));
        let x = gaussian_noise(self.dropout.forward(x), self.noise_std);
        let x = elu(self.fc2.forward(x));
        self.out.forward(x)
    }
}

/// Head 3: the target classifier, ReLU
#[derive(Module, Debug)]
pub struct ReluHead<B: Backend> {
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    pub out: Linear<B>,
    relu: Relu,
    dropout: Dropout,
    noise_std: f64,
}

impl<B: Backend> ReluHead<B> {
    pub fn new(config: &TriHeadConfig, device: &B::Device) -> Self {
        Self {
            fc1: LinearConfig::new(config.feature_size(), 48).init(device),
            fc2: LinearConfig::new(48, 32).init(device),
            out: LinearConfig::new(32, config.num_classes).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(config.dropout).init(),
            noise_std: config.noise_std,
        }
    }

    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.fc1.forward(features));
        let x = gaussian_noise(self.dropout.forward(x), self.noise_std);
        let x = self.relu.forward(self.fc2.forward(x));
        self.out.forward(self.dropout.forward(x))
    }
}

/// Backbone plus the three heads
///
/// Parameter layout matters for checkpoints: the source model and the adaptation
/// model share it, so weights saved after pretraining load into either variant.
#[derive(Module, Debug)]
pub struct TriHeadNet<B: Backend> {
    pub backbone: Backbone<B>,
    pub head1: SeluHead<B>,
    pub head2: EluHead<B>,
    pub head3: ReluHead<B>,
    num_classes: usize,
}

impl<B: Backend> TriHeadNet<B> {
    pub fn new(config: &TriHeadConfig, device: &B::Device) -> Self {
        Self {
            backbone: Backbone::new(config, device),
            head1: SeluHead::new(config, device),
            head2: EluHead::new(config, device),
            head3: ReluHead::new(config, device),
            num_classes: config.num_classes,
        }
    }

    /// Logits of every head, in head order
    pub fn forward(&self, images: Tensor<B, 4>) -> [Tensor<B, 2>; 3] {
        let features = self.backbone.forward(images);
        [
            self.head1.forward(features.clone()),
            self.head2.forward(features.clone()),
            self.head3.forward(features),
        ]
    }

    /// Softmax probabilities of every head
    pub fn forward_softmax(&self, images: Tensor<B, 4>) -> [Tensor<B, 2>; 3] {
        self.forward(images).map(|logits| softmax(logits, 1))
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl TriHeadConfig {
    /// Build the network on `device`
    pub fn init<B: Backend>(&self, device: &B::Device) -> TriHeadNet<B> {
        TriHeadNet::new(self, device)
    }
}
