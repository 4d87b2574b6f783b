use std::sync::Arc;

use burn::{
    config::Config,
    data::{
        dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    tensor::{
        backend::{AutodiffBackend, Backend},
        Data, Shape, Tensor,
    },
};

pub mod folder;
pub mod synthetic;

/// RGB plus depth.
pub const CHANNELS: usize = 4;
pub const DEPTH_CHANNEL: usize = 3;

/// One image in CHW order, every value in [0, 1].
#[derive(Debug, Clone)]
pub struct RgbdItem {
    pub pixels: Vec<f32>,
    pub size: usize,
}

impl RgbdItem {
    pub fn new(pixels: Vec<f32>, size: usize) -> Self {
        debug_assert_eq!(pixels.len(), CHANNELS * size * size);
        Self { pixels, size }
    }

    pub fn channel(&self, c: usize) -> &[f32] {
        let plane = self.size * self.size;
        &self.pixels[c * plane..(c + 1) * plane]
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        let data = Data::new(self.pixels.clone(), Shape::new([CHANNELS, self.size, self.size]));
        Tensor::from_data(data.convert(), device)
    }
}

/// Maps [0, 1] pixels to the decoder's `tanh` range.
pub fn normalize<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.mul_scalar(2.0).sub_scalar(1.0)
}

/// Inverse of [`normalize`].
pub fn denormalize(value: f32) -> f32 {
    ((value + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct RgbdBatch<B: Backend> {
    pub img: Tensor<B, 4>,
}

pub struct RgbdBatcher<B: Backend> {
    device: B::Device,
    normalize: bool,
}

impl<B: Backend> RgbdBatcher<B> {
    pub fn new(device: B::Device, normalize: bool) -> Self {
        Self { device, normalize }
    }
}

impl<B: Backend> Batcher<RgbdItem, RgbdBatch<B>> for RgbdBatcher<B> {
    fn batch(&self, items: Vec<RgbdItem>) -> RgbdBatch<B> {
        let img = items
            .iter()
            .map(|item| item.to_tensor::<B>(&self.device))
            .map(|tensor| {
                if self.normalize {
                    normalize(tensor)
                } else {
                    tensor
                }
            })
            .collect();

        RgbdBatch {
            img: Tensor::stack(img, 0),
        }
    }
}

#[derive(Config, Debug)]
pub struct DataConfig {
    #[config(default = 50)]
    pub batch_size: usize,
    /// Scale pixels to [-1, 1].
    #[config(default = true)]
    pub normalize: bool,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 128)]
    pub image_size: usize,
    #[config(default = 0)]
    pub shuffle_seed: u64,
}

/// Train batches live on the autodiff backend, test batches on its inner
/// backend so evaluation never records a graph.
pub struct DataLoaders<B: AutodiffBackend> {
    pub train: Arc<dyn DataLoader<RgbdBatch<B>>>,
    pub test: Arc<dyn DataLoader<RgbdBatch<B::InnerBackend>>>,
}

pub fn setup_data_loaders<B, DTrain, DTest>(
    config: &DataConfig,
    dataset_train: DTrain,
    dataset_test: DTest,
    device: &B::Device,
) -> DataLoaders<B>
where
    B: AutodiffBackend,
    DTrain: Dataset<RgbdItem> + 'static,
    DTest: Dataset<RgbdItem> + 'static,
{
    log::info!(
        "creating loaders: {} train / {} test items, batch size {}",
        dataset_train.len(),
        dataset_test.len(),
        config.batch_size
    );

    let batcher_train = RgbdBatcher::<B>::new(device.clone(), config.normalize);
    let batcher_test = RgbdBatcher::<B::InnerBackend>::new(device.clone(), config.normalize);

    let train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.shuffle_seed)
        .num_workers(config.num_workers)
        .build(dataset_train);
    let test = DataLoaderBuilder::new(batcher_test)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(dataset_test);

    DataLoaders { train, test }
}
