use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};
use dl_utils::nn::softplus;

use super::{
    distribution::Normal,
    resnet::{FreezePolicy, ResNet, ResNetConfig},
    weights::WeightSource,
};
use crate::error::ModelError;

/// ResNet feature extractor producing the parameters of `q(z | x)`.
#[derive(Debug, Module)]
pub struct Encoder<B: Backend> {
    pub backbone: ResNet<B>,
    z_dim: usize,
    scale_floor: f64,
}

impl<B: Backend> Encoder<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Normal<B, 2> {
        let out = self.backbone.forward(x);
        let batch_size = out.shape().dims[0];

        let loc = out.clone().slice([0..batch_size, 0..self.z_dim]);
        let raw_scale = out.slice([0..batch_size, self.z_dim..2 * self.z_dim]);
        let scale = softplus(raw_scale).add_scalar(self.scale_floor);

        Normal::new(loc, scale)
    }

    pub fn z_dim(&self) -> usize {
        self.z_dim
    }
}

#[derive(Config, Debug)]
pub struct EncoderConfig {
    pub z_dim: usize,
    #[config(default = 4)]
    pub channels: usize,
    #[config(default = "ResNetConfig::new()")]
    pub backbone: ResNetConfig,
    #[config(default = "FreezePolicy::new()")]
    pub freeze: FreezePolicy,
    /// Added after the softplus so the scale never reaches zero.
    #[config(default = 1.0e-5)]
    pub scale_floor: f64,
}

impl EncoderConfig {
    pub fn init<B: Backend>(
        &self,
        weights: &impl WeightSource<B>,
        device: &B::Device,
    ) -> Result<Encoder<B>, ModelError> {
        if self.z_dim == 0 {
            return Err(ModelError::ZeroLatentDim);
        }

        log::info!("initializing backbone from {}", weights.describe());
        let backbone = weights.load_backbone(self.backbone.init(device), device)?;
        let freeze = if weights.is_pretrained() {
            self.freeze.clone()
        } else {
            if !self.freeze.frozen.is_empty() {
                log::warn!(
                    "backbone is not pretrained, keeping {:?} trainable",
                    self.freeze.frozen
                );
            }
            FreezePolicy::all_trainable()
        };
        let backbone = backbone
            .replace_stem(self.channels, device)
            .replace_head(2 * self.z_dim, device)
            .freeze(&freeze);

        Ok(Encoder {
            backbone,
            z_dim: self.z_dim,
            scale_floor: self.scale_floor,
        })
    }
}
