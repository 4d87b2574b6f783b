use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{
    config::Config,
    data::dataset::Dataset,
    module::Module,
    optim::AdamConfig,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
};
use dotenv::dotenv;
use rgbd_vae::{
    data::{folder::RgbdFolderDataset, setup_data_loaders, synthetic::SyntheticRgbdDataset, RgbdItem},
    hooks::{CheckpointOnImprovement, LossGuard},
    metrics::ArtifactsSink,
    model::{
        weights::{RandomInit, RecordFile},
        Vae, VaeConfig,
    },
    training::{RunSummary, TrainingConfig, TrainingSession},
    utils::{get_env, get_env_opt},
};

#[cfg(feature = "tch")]
mod backend {
    use burn::backend::{libtorch::LibTorchDevice, Autodiff, LibTorch};

    pub type Backend = Autodiff<LibTorch<f32>>;

    /// `cpu` or `cuda:N`; anything else falls back to the CPU.
    pub fn device(name: Option<&str>) -> LibTorchDevice {
        match name.and_then(|s| s.strip_prefix("cuda:")) {
            Some(index) => match index.parse() {
                Ok(index) => LibTorchDevice::Cuda(index),
                Err(_) => {
                    log::warn!("unrecognized device `cuda:{index}`, using the cpu");
                    LibTorchDevice::Cpu
                }
            },
            None => LibTorchDevice::Cpu,
        }
    }
}

#[cfg(not(feature = "tch"))]
mod backend {
    use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};

    pub type Backend = Autodiff<NdArray<f32>>;

    pub fn device(name: Option<&str>) -> NdArrayDevice {
        if let Some(name) = name.filter(|s| *s != "cpu") {
            log::warn!("device `{name}` needs the `tch` feature, using the cpu");
        }
        NdArrayDevice::Cpu
    }
}

fn load_config() -> Result<TrainingConfig> {
    match get_env_opt("TRAINING_CONFIG") {
        Some(path) => TrainingConfig::load(&path).with_context(|| format!("loading config {path}")),
        None => Ok(TrainingConfig::new(VaeConfig::rgbd(400, 128), AdamConfig::new())),
    }
}

fn preview_items(dataset: &impl Dataset<RgbdItem>, config: &TrainingConfig) -> Vec<RgbdItem> {
    (0..config.preview_count)
        .filter_map(|i| dataset.get(i * config.preview_stride))
        .collect()
}

fn train<B, DTrain, DTest>(
    config: TrainingConfig,
    dataset_train: DTrain,
    dataset_test: DTest,
    artifacts_dir: &Path,
    device: B::Device,
) -> Result<RunSummary>
where
    B: AutodiffBackend,
    DTrain: Dataset<RgbdItem> + 'static,
    DTest: Dataset<RgbdItem> + 'static,
{
    B::seed(config.seed);

    let model: Vae<B> = match get_env_opt("BACKBONE_WEIGHTS") {
        Some(path) => config.model.init_with_weights(&RecordFile::new(path), &device)?,
        None => config.model.init_with_weights(&RandomInit, &device)?,
    };
    let optim = config.optimizer.init::<B, Vae<B>>();

    let preview = preview_items(&dataset_test, &config);
    let loaders = setup_data_loaders::<B, _, _>(&config.data(), dataset_train, dataset_test, &device);
    let sink = ArtifactsSink::new(artifacts_dir)?;

    let guard = if config.halt_on_unstable_loss {
        LossGuard::halting()
    } else {
        LossGuard::warn_only()
    };
    let checkpoint = config.checkpoint;

    let mut session = TrainingSession::new(config, model, optim, loaders, Box::new(sink), device)
        .with_preview(preview)
        .with_hook(guard);
    if checkpoint {
        session = session.with_hook(CheckpointOnImprovement::new(artifacts_dir.join("checkpoint")));
    }

    let summary = session.run()?;
    session
        .into_model()
        .save_file(artifacts_dir.join("model"), &CompactRecorder::new())
        .context("saving final model")?;
    Ok(summary)
}

fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = load_config()?;
    let artifacts_dir = PathBuf::from(get_env("ARTIFACTS_DIR")?);
    std::fs::create_dir_all(&artifacts_dir)
        .with_context(|| format!("creating {}", artifacts_dir.display()))?;
    config
        .save(artifacts_dir.join("config.json"))
        .context("saving config.json")?;

    let device = backend::device(get_env_opt("RGBD_VAE_DEVICE").as_deref());
    log::info!("training on {device:?}, artifacts in {}", artifacts_dir.display());

    let size = config.model.decoder.image_size;
    let summary = match get_env_opt("RGBD_DATA_DIR") {
        Some(root) => train::<backend::Backend, _, _>(
            config,
            RgbdFolderDataset::train(&root, size)?,
            RgbdFolderDataset::test(&root, size)?,
            &artifacts_dir,
            device,
        )?,
        None => {
            log::warn!("RGBD_DATA_DIR is not set, training on synthetic data");
            train::<backend::Backend, _, _>(
                config,
                SyntheticRgbdDataset::new(500, size, 0),
                SyntheticRgbdDataset::new(100, size, 1),
                &artifacts_dir,
                device,
            )?
        }
    };

    log::info!("{summary:?}");
    if let Some(hook) = summary.stopped_by {
        log::warn!("stopped early by {hook} after {} epochs", summary.epochs_completed);
    }
    Ok(())
}
