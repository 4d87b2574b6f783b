use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};

pub mod decoder;
pub mod distribution;
pub mod encoder;
pub mod residual;
pub mod resnet;
pub mod weights;

use self::{
    decoder::{Decoder, DecoderConfig},
    distribution::Normal,
    encoder::{Encoder, EncoderConfig},
    weights::{RandomInit, WeightSource},
};
use crate::{error::ModelError, sampler::LatentSampler};

/// Everything the negative ELBO needs from one forward pass.
#[derive(Debug, Clone)]
pub struct VaeOutput<B: Backend> {
    /// `p(x | z)`
    pub reconstruction: Normal<B, 4>,
    pub input: Tensor<B, 4>,
    /// `q(z | x)`
    pub latent: Normal<B, 2>,
    /// The reparameterized draw that was decoded.
    pub sample: Tensor<B, 2>,
}

#[derive(Debug, Module)]
pub struct Vae<B: Backend> {
    pub encoder: Encoder<B>,
    pub decoder: Decoder<B>,
    z_dim: usize,
    channels: usize,
    image_size: usize,
}

impl<B: Backend> Vae<B> {
    /// encode → sample → decode
    pub fn forward(&self, x: Tensor<B, 4>, sampler: &mut LatentSampler) -> VaeOutput<B> {
        let latent = self.encoder.forward(x.clone());
        let sample = latent.rsample(sampler);
        let reconstruction = self.decoder.forward(sample.clone());

        VaeOutput {
            reconstruction,
            input: x,
            latent,
            sample,
        }
    }

    /// Decodes the latent mean and returns the reconstruction mean. No noise
    /// is involved, so equal parameters and inputs give equal outputs.
    pub fn reconstruct(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let latent = self.encoder.forward(x);
        self.decoder.forward(latent.mean()).mean()
    }

    pub fn check_input(&self, x: &Tensor<B, 4>) -> Result<(), ModelError> {
        let dims = x.shape().dims;
        if dims[1] != self.channels || dims[2] != self.image_size || dims[3] != self.image_size {
            return Err(ModelError::ShapeMismatch {
                found: dims,
                channels: self.channels,
                size: self.image_size,
            });
        }
        Ok(())
    }

    pub fn z_dim(&self) -> usize {
        self.z_dim
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }
}

#[derive(Config, Debug)]
pub struct VaeConfig {
    pub encoder: EncoderConfig,
    pub decoder: DecoderConfig,
}

impl VaeConfig {
    /// ResNet-34 encoder and a decoder for `image_size`² images with 4 channels.
    pub fn rgbd(z_dim: usize, image_size: usize) -> Self {
        Self::new(
            EncoderConfig::new(z_dim),
            DecoderConfig::new(z_dim).with_image_size(image_size),
        )
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Vae<B>, ModelError> {
        self.init_with_weights(&RandomInit, device)
    }

    pub fn init_with_weights<B: Backend>(
        &self,
        weights: &impl WeightSource<B>,
        device: &B::Device,
    ) -> Result<Vae<B>, ModelError> {
        if self.encoder.z_dim != self.decoder.z_dim {
            return Err(ModelError::LatentMismatch {
                encoder: self.encoder.z_dim,
                decoder: self.decoder.z_dim,
            });
        }
        if self.encoder.channels != self.decoder.channels {
            return Err(ModelError::ChannelMismatch {
                encoder: self.encoder.channels,
                decoder: self.decoder.channels,
            });
        }

        let encoder = self.encoder.init(weights, device)?;
        let decoder = self.decoder.init(device)?;
        log::info!(
            "vae ready: z_dim={}, {}×{}×{} images, {} parameters",
            self.encoder.z_dim,
            self.encoder.channels,
            self.decoder.image_size,
            self.decoder.image_size,
            encoder.num_params() + decoder.num_params(),
        );

        Ok(Vae {
            encoder,
            decoder,
            z_dim: self.encoder.z_dim,
            channels: self.encoder.channels,
            image_size: self.decoder.image_size,
        })
    }
}
