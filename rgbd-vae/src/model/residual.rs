use burn::{
    config::Config,
    module::Module,
    nn::{conv::Conv2d, BatchNorm, BatchNormConfig},
    tensor::{backend::Backend, Tensor},
};
use dl_utils::{conv_2d, nn::Relu, pipe};

/// `conv3x3 → bn → relu → conv3x3 → bn`
#[derive(Debug, Module)]
pub struct ResidualBlockCore<B: Backend> {
    pub conv_1: Conv2d<B>,
    pub bn_1: BatchNorm<B, 2>,
    act: Relu,
    pub conv_2: Conv2d<B>,
    pub bn_2: BatchNorm<B, 2>,
}

impl<B: Backend> ResidualBlockCore<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        pipe!(x, self.conv_1, self.bn_1, self.act, self.conv_2, self.bn_2)
    }
}

/// 1×1 projection used when the block changes channel count or resolution.
#[derive(Debug, Module)]
pub struct Projection<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Projection<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        pipe!(x, self.conv, self.bn)
    }
}

/// `relu(core(x) + shortcut(x))`, where the shortcut is the identity unless
/// the channel count or stride changes.
#[derive(Debug, Module)]
pub struct ResidualBlock<B: Backend> {
    pub core: ResidualBlockCore<B>,
    pub shortcut: Option<Projection<B>>,
    act: Relu,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = self.core.forward(x.clone());
        let x = match &self.shortcut {
            Some(projection) => projection.forward(x),
            None => x,
        };
        self.act.forward(residual + x)
    }
}

#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    pub c_in: usize,
    pub c_out: usize,
    /// Applied by the first convolution and the projection.
    #[config(default = 1)]
    pub stride: usize,
    #[config(default = true)]
    pub bias: bool,
}

impl ResidualBlockConfig {
    pub fn needs_projection(&self) -> bool {
        self.c_in != self.c_out || self.stride != 1
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResidualBlock<B> {
        let core = ResidualBlockCore {
            conv_1: conv_2d!(
                self.c_in,
                self.c_out,
                kernel_size = 3,
                padding = 1,
                stride = self.stride,
                bias = self.bias
            )
            .init(device),
            bn_1: BatchNormConfig::new(self.c_out).init(device),
            act: Relu::new(),
            conv_2: conv_2d!(self.c_out, self.c_out, kernel_size = 3, padding = 1, bias = self.bias)
                .init(device),
            bn_2: BatchNormConfig::new(self.c_out).init(device),
        };

        let shortcut = self.needs_projection().then(|| Projection {
            conv: conv_2d!(
                self.c_in,
                self.c_out,
                kernel_size = 1,
                stride = self.stride,
                bias = self.bias
            )
            .init(device),
            bn: BatchNormConfig::new(self.c_out).init(device),
        });

        ResidualBlock {
            core,
            shortcut,
            act: Relu::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ResidualBlockConfig;
    use burn::tensor::{backend::Backend, Distribution, Tensor};

    fn test_block<B: Backend>(device: &B::Device) {
        let x: Tensor<B, 4> = Tensor::random([2, 8, 16, 16], Distribution::Normal(0.0, 1.0), device);

        let identity = ResidualBlockConfig::new(8, 8).init::<B>(device);
        assert!(identity.shortcut.is_none());
        assert_eq!(identity.forward(x.clone()).shape().dims, [2, 8, 16, 16]);

        let widen = ResidualBlockConfig::new(8, 16).init::<B>(device);
        assert!(widen.shortcut.is_some());
        assert_eq!(widen.forward(x.clone()).shape().dims, [2, 16, 16, 16]);

        let downsample = ResidualBlockConfig::new(8, 16)
            .with_stride(2)
            .with_bias(false)
            .init::<B>(device);
        assert_eq!(downsample.forward(x.clone()).shape().dims, [2, 16, 8, 8]);

        // the final relu keeps every output non-negative
        let out = identity.forward(x).into_data().convert::<f32>().value;
        assert!(out.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn sanity_ndarray() {
        type B = burn::backend::ndarray::NdArray;
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        test_block::<B>(&device);
    }
}
