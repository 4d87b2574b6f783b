use burn::{
    config::Config,
    module::Module,
    nn::{conv::ConvTranspose2d, BatchNorm, BatchNormConfig, Linear, LinearConfig},
    tensor::{backend::Backend, Tensor},
};
use dl_utils::{
    conv_transpose_2d,
    nn::{LeakyRelu, Tanh},
    pipe,
};
use itertools::Itertools;

use super::{
    distribution::Normal,
    residual::{ResidualBlock, ResidualBlockConfig},
};
use crate::error::ModelError;

/// Side length of the grid the dense layer projects onto.
pub const SEED_GRID: usize = 4;

/// Residual block at the current resolution followed by a ×2 transposed
/// convolution. The last stage has neither norm nor activation.
#[derive(Debug, Module)]
pub struct UpsampleStage<B: Backend> {
    residual: ResidualBlock<B>,
    upsample: ConvTranspose2d<B>,
    norm: Option<BatchNorm<B, 2>>,
    act: Option<LeakyRelu>,
}

impl<B: Backend> UpsampleStage<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = pipe!(x, self.residual, self.upsample);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        match &self.act {
            Some(act) => act.forward(x),
            None => x,
        }
    }
}

/// Maps a latent vector to `p(x | z)`, a Gaussian with fixed scale around a
/// `tanh`-bounded mean image.
#[derive(Debug, Module)]
pub struct Decoder<B: Backend> {
    fc: Linear<B>,
    stages: Vec<UpsampleStage<B>>,
    out: Tanh,
    seed_channels: usize,
    std: f64,
}

impl<B: Backend> Decoder<B> {
    pub fn forward(&self, z: Tensor<B, 2>) -> Normal<B, 4> {
        let batch_size = z.shape().dims[0];
        let x = self
            .fc
            .forward(z)
            .reshape([batch_size, self.seed_channels, SEED_GRID, SEED_GRID]);
        let x = self.stages.iter().fold(x, |x, stage| stage.forward(x));
        let mean = self.out.forward(x);

        Normal::with_fixed_scale(mean, self.std)
    }
}

#[derive(Config, Debug)]
pub struct DecoderConfig {
    pub z_dim: usize,
    #[config(default = 4)]
    pub channels: usize,
    #[config(default = 128)]
    pub image_size: usize,
    /// Width of the last hidden stage; earlier stages double it, capped at 16×.
    #[config(default = 32)]
    pub filters: usize,
    /// Fixed standard deviation of the reconstruction distribution.
    #[config(default = 1.0)]
    pub std: f64,
    #[config(default = 0.2)]
    pub negative_slope: f64,
}

impl DecoderConfig {
    /// Number of ×2 stages between the seed grid and `image_size`.
    pub fn num_stages(&self) -> Result<usize, ModelError> {
        let ratio = self.image_size / SEED_GRID;
        if self.image_size % SEED_GRID != 0 || ratio < 2 || !ratio.is_power_of_two() {
            return Err(ModelError::InvalidImageSize {
                size: self.image_size,
            });
        }
        Ok(ratio.trailing_zeros() as usize)
    }

    /// Channel count entering each stage, followed by the output channel count.
    pub fn widths(&self) -> Result<Vec<usize>, ModelError> {
        let num_stages = self.num_stages()?;
        let widths = (0..num_stages)
            .rev()
            .map(|k| self.filters << k.min(4))
            .chain(std::iter::once(self.channels))
            .collect_vec();
        Ok(widths)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Decoder<B>, ModelError> {
        if self.z_dim == 0 {
            return Err(ModelError::ZeroLatentDim);
        }
        let widths = self.widths()?;
        let last = widths.len() - 2;

        let stages = widths
            .iter()
            .tuple_windows()
            .enumerate()
            .map(|(idx, (&c_in, &c_out))| {
                let hidden = idx < last;
                UpsampleStage {
                    residual: ResidualBlockConfig::new(c_in, c_in).init(device),
                    upsample: conv_transpose_2d!(c_in, c_out, kernel_size = 4, padding = 1, stride = 2)
                        .init(device),
                    norm: hidden.then(|| BatchNormConfig::new(c_out).init(device)),
                    act: hidden.then(|| LeakyRelu::new(self.negative_slope)),
                }
            })
            .collect_vec();

        Ok(Decoder {
            fc: LinearConfig::new(self.z_dim, widths[0] * SEED_GRID * SEED_GRID).init(device),
            stages,
            out: Tanh::new(),
            seed_channels: widths[0],
            std: self.std,
        })
    }
}
