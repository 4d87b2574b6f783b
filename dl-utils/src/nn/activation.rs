use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};
use derive_new::new;

/// `max(x, 0) + ln(1 + e^{-|x|})`, which never overflows for large `|x|`.
pub fn softplus<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let tail = x.clone().abs().neg().exp().log1p();
    burn::tensor::activation::relu(x) + tail
}

pub fn leaky_relu<B: Backend, const D: usize>(x: Tensor<B, D>, negative_slope: f64) -> Tensor<B, D> {
    let negative = x.clone().clamp_max(0.0).mul_scalar(negative_slope);
    x.clamp_min(0.0) + negative
}

macro_rules! impl_activation {
    ($name:ident, $config_name:ident, $fn:expr) => {
        #[derive(Debug, Module, Clone, Copy, Default, new)]
        pub struct $name {}

        impl $name {
            pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
                $fn(x)
            }
        }

        #[derive(Debug, Config)]
        pub struct $config_name {}

        impl $config_name {
            pub fn init(&self) -> $name {
                $name::new()
            }
        }
    };
}

impl_activation!(Relu, ReluConfig, burn::tensor::activation::relu);
impl_activation!(Tanh, TanhConfig, burn::tensor::activation::tanh);

#[derive(Debug, Module, Clone, new)]
pub struct LeakyRelu {
    pub negative_slope: f64,
}

impl LeakyRelu {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        leaky_relu(x, self.negative_slope)
    }
}

#[derive(Debug, Config)]
pub struct LeakyReluConfig {
    #[config(default = 0.01)]
    pub negative_slope: f64,
}

impl LeakyReluConfig {
    pub fn init(&self) -> LeakyRelu {
        LeakyRelu::new(self.negative_slope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Data, Shape};

    type B = burn::backend::NdArray;

    fn values(x: Tensor<B, 1>) -> Vec<f32> {
        x.into_data().convert::<f32>().value
    }

    fn input(values: Vec<f32>) -> Tensor<B, 1> {
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        let len = values.len();
        Tensor::from_data(Data::new(values, Shape::new([len])).convert(), &device)
    }

    #[test]
    fn softplus_is_positive_and_finite_at_extremes() {
        let out = values(softplus(input(vec![-1.0e6, -30.0, 0.0, 30.0, 1.0e6])));

        assert_eq!(out[0], 0.0);
        assert!(out[1] > 0.0 && out[1] < 1.0e-12);
        assert!((out[2] - std::f32::consts::LN_2).abs() < 1.0e-6);
        assert!((out[3] - 30.0).abs() < 1.0e-4);
        assert!(out.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn leaky_relu_scales_negative_side() {
        let act = LeakyReluConfig::new().with_negative_slope(0.2).init();
        let out = values(act.forward(input(vec![-2.0, -0.5, 0.0, 3.0])));

        let expected = [-0.4, -0.1, 0.0, 3.0];
        for (o, e) in out.iter().zip(expected) {
            assert!((o - e).abs() < 1.0e-6, "{o} != {e}");
        }
    }

    #[test]
    fn tanh_stays_in_unit_range() {
        let out = values(TanhConfig::new().init().forward(input(vec![-1.0e4, -1.0, 1.0, 1.0e4])));
        assert!(out.iter().all(|x| (-1.0..=1.0).contains(x)));
    }
}
