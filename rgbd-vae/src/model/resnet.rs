use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::Conv2d,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor},
};
use dl_utils::{conv_2d, nn::Relu, pipe};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::residual::{ResidualBlock, ResidualBlockConfig};

/// Named parameter groups of the backbone, the unit of freezing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackboneStage {
    /// First convolution and its batch norm.
    Stem,
    Layer1,
    Layer2,
    Layer3,
    Layer4,
    /// Final dense projection.
    Head,
}

impl BackboneStage {
    pub const ALL: [BackboneStage; 6] = [
        Self::Stem,
        Self::Layer1,
        Self::Layer2,
        Self::Layer3,
        Self::Layer4,
        Self::Head,
    ];
}

/// Which backbone stages keep `require_grad`. Only trainable stages receive
/// gradients, so only they are touched by the optimizer.
#[derive(Config, Debug)]
pub struct FreezePolicy {
    #[config(default = "vec![BackboneStage::Layer1, BackboneStage::Layer2]")]
    pub frozen: Vec<BackboneStage>,
}

impl FreezePolicy {
    pub fn all_trainable() -> Self {
        Self::new().with_frozen(Vec::new())
    }

    pub fn is_trainable(&self, stage: BackboneStage) -> bool {
        !self.frozen.contains(&stage)
    }
}

#[derive(Debug, Module)]
pub struct ResNet<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    act: Relu,
    pool: MaxPool2d,
    pub layer1: Vec<ResidualBlock<B>>,
    pub layer2: Vec<ResidualBlock<B>>,
    pub layer3: Vec<ResidualBlock<B>>,
    pub layer4: Vec<ResidualBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
    pub fc: Linear<B>,
    stem_width: usize,
    features: usize,
}

impl<B: Backend> ResNet<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = pipe!(x, self.conv1, self.bn1, self.act, self.pool);
        let x = [&self.layer1, &self.layer2, &self.layer3, &self.layer4]
            .into_iter()
            .flatten()
            .fold(x, |x, block| block.forward(x));
        let x = self.avgpool.forward(x);
        self.fc.forward(x.flatten(1, 3))
    }

    /// Swaps the first convolution for a freshly initialized one taking `channels` inputs.
    pub fn replace_stem(mut self, channels: usize, device: &B::Device) -> Self {
        self.conv1 = stem_conv(channels, self.stem_width).init(device);
        self
    }

    /// Swaps the dense head for a freshly initialized `features → outputs` projection.
    pub fn replace_head(mut self, outputs: usize, device: &B::Device) -> Self {
        self.fc = LinearConfig::new(self.features, outputs).init(device);
        self
    }

    pub fn freeze(mut self, policy: &FreezePolicy) -> Self {
        for stage in BackboneStage::ALL {
            if policy.is_trainable(stage) {
                continue;
            }
            log::debug!("freezing backbone stage {stage:?}");
            match stage {
                BackboneStage::Stem => {
                    self.conv1 = self.conv1.no_grad();
                    self.bn1 = self.bn1.no_grad();
                }
                BackboneStage::Layer1 => self.layer1 = self.layer1.no_grad(),
                BackboneStage::Layer2 => self.layer2 = self.layer2.no_grad(),
                BackboneStage::Layer3 => self.layer3 = self.layer3.no_grad(),
                BackboneStage::Layer4 => self.layer4 = self.layer4.no_grad(),
                BackboneStage::Head => self.fc = self.fc.no_grad(),
            }
        }
        self
    }
}

fn stem_conv(channels: usize, width: usize) -> burn::nn::conv::Conv2dConfig {
    conv_2d!(channels, width, kernel_size = 7, padding = 3, stride = 2, bias = false)
}

/// ResNet with basic (two 3×3 convolution) blocks. The default is ResNet-34
/// in its ImageNet shape: 3 input channels, 1000 outputs.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    #[config(default = 3)]
    pub in_channels: usize,
    #[config(default = 1000)]
    pub num_classes: usize,
    #[config(default = "[3, 4, 6, 3]")]
    pub blocks: [usize; 4],
    #[config(default = "[64, 128, 256, 512]")]
    pub widths: [usize; 4],
}

impl ResNetConfig {
    pub fn features(&self) -> usize {
        self.widths[3]
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let [w1, w2, w3, w4] = self.widths;
        let [n1, n2, n3, n4] = self.blocks;

        ResNet {
            conv1: stem_conv(self.in_channels, w1).init(device),
            bn1: BatchNormConfig::new(w1).init(device),
            act: Relu::new(),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1: layer(w1, w1, n1, 1, device),
            layer2: layer(w1, w2, n2, 2, device),
            layer3: layer(w2, w3, n3, 2, device),
            layer4: layer(w3, w4, n4, 2, device),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(self.features(), self.num_classes).init(device),
            stem_width: w1,
            features: self.features(),
        }
    }
}

/// One stage: the first block adapts channels/stride, the rest keep the shape.
fn layer<B: Backend>(
    c_in: usize,
    c_out: usize,
    num_blocks: usize,
    stride: usize,
    device: &B::Device,
) -> Vec<ResidualBlock<B>> {
    (0..num_blocks)
        .map(|idx| {
            let config = if idx == 0 {
                ResidualBlockConfig::new(c_in, c_out).with_stride(stride)
            } else {
                ResidualBlockConfig::new(c_out, c_out)
            };
            config.with_bias(false).init(device)
        })
        .collect_vec()
}
