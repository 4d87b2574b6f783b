use burn::tensor::{backend::Backend, Tensor};

use crate::sampler::LatentSampler;

/// `ln(√(2π))`
const LOG_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Elementwise independent Gaussian, `loc` and `scale` share one shape.
#[derive(Debug, Clone)]
pub struct Normal<B: Backend, const D: usize> {
    pub loc: Tensor<B, D>,
    pub scale: Tensor<B, D>,
}

impl<B: Backend, const D: usize> Normal<B, D> {
    pub fn new(loc: Tensor<B, D>, scale: Tensor<B, D>) -> Self {
        Self { loc, scale }
    }

    /// A distribution with the same `scale` everywhere.
    pub fn with_fixed_scale(loc: Tensor<B, D>, scale: f64) -> Self {
        let scale = Tensor::ones(loc.shape(), &loc.device()).mul_scalar(scale);
        Self { loc, scale }
    }

    pub fn mean(&self) -> Tensor<B, D> {
        self.loc.clone()
    }

    pub fn stddev(&self) -> Tensor<B, D> {
        self.scale.clone()
    }

    pub fn variance(&self) -> Tensor<B, D> {
        self.scale.clone() * self.scale.clone()
    }

    /// `loc + scale ⊙ ε` with `ε ~ N(0, I)`; gradients flow to both parameters.
    pub fn rsample(&self, sampler: &mut LatentSampler) -> Tensor<B, D> {
        let noise = sampler.standard_normal::<B, D>(self.loc.shape().dims, &self.loc.device());
        self.loc.clone() + self.scale.clone() * noise
    }

    pub fn log_prob(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let diff = x - self.loc.clone();
        let squared = (diff.clone() * diff) / self.variance().mul_scalar(2.0);
        squared.neg() - self.scale.clone().log() - LOG_SQRT_2PI
    }
}
