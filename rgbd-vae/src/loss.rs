use burn::tensor::{backend::Backend, Tensor};

use crate::model::{distribution::Normal, VaeOutput};

/// The two halves of the evidence lower bound, each already averaged over the batch.
#[derive(Debug, Clone)]
pub struct ElboTerms<B: Backend> {
    /// `E_q[log p(x | z)]`, summed over pixels.
    pub reconstruction: Tensor<B, 1>,
    /// `KL(q(z | x) ‖ N(0, I))`, summed over latent dimensions.
    pub kl: Tensor<B, 1>,
}

impl<B: Backend> ElboTerms<B> {
    pub fn elbo(self) -> Tensor<B, 1> {
        self.reconstruction - self.kl
    }
}

/// Batch mean of the per-image summed log-likelihood of `x`.
pub fn reconstruction_log_likelihood<B: Backend>(
    reconstruction: &Normal<B, 4>,
    x: Tensor<B, 4>,
) -> Tensor<B, 1> {
    reconstruction.log_prob(x).mean_dim(0).sum()
}

/// Closed form for a diagonal Gaussian against the standard normal prior:
/// `-½ Σ (1 + ln σ² - μ² - σ²)`, averaged over the batch.
///
/// Requires `σ > 0`. A collapsed scale makes `ln σ²` infinite and so the result.
pub fn kl_to_standard_normal<B: Backend>(latent: &Normal<B, 2>) -> Tensor<B, 1> {
    let variance = latent.variance();
    let mean = latent.mean();
    let inner = variance.clone().log().add_scalar(1.0) - mean.clone() * mean - variance;
    inner.sum_dim(1).mul_scalar(-0.5).mean()
}

pub fn elbo_terms<B: Backend>(
    reconstruction: &Normal<B, 4>,
    x: Tensor<B, 4>,
    latent: &Normal<B, 2>,
) -> ElboTerms<B> {
    ElboTerms {
        reconstruction: reconstruction_log_likelihood(reconstruction, x),
        kl: kl_to_standard_normal(latent),
    }
}

/// The training objective, `-ELBO`.
pub fn neg_elbo<B: Backend>(output: &VaeOutput<B>) -> Tensor<B, 1> {
    elbo_terms(&output.reconstruction, output.input.clone(), &output.latent)
        .elbo()
        .neg()
}
