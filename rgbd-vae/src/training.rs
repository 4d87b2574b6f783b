use anyhow::Context;
use burn::{
    config::Config,
    data::dataloader::DataLoader,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};

use crate::{
    data::{normalize, DataConfig, DataLoaders, RgbdBatch, RgbdItem},
    error::TrainingError,
    hooks::{EvaluationHook, EvaluationReport, HookAction},
    loss::neg_elbo,
    metrics::MetricsSink,
    model::{Vae, VaeConfig},
    sampler::LatentSampler,
    utils::{reconstruction_figure, tensor_to_item},
};

#[derive(Config)]
pub struct TrainingConfig {
    pub model: VaeConfig,
    pub optimizer: AdamConfig,
    #[config(default = 500)]
    pub num_epochs: usize,
    /// Epochs between held-out evaluations; 0 disables them, and hooks then
    /// see every epoch's training loss.
    #[config(default = 5)]
    pub test_frequency: usize,
    #[config(default = 50)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 1.0e-4)]
    pub learning_rate: f64,
    #[config(default = true)]
    pub normalize: bool,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 10)]
    pub preview_count: usize,
    #[config(default = 10)]
    pub preview_stride: usize,
    #[config(default = false)]
    pub checkpoint: bool,
    #[config(default = false)]
    pub halt_on_unstable_loss: bool,
}

impl TrainingConfig {
    pub fn data(&self) -> DataConfig {
        DataConfig::new()
            .with_batch_size(self.batch_size)
            .with_normalize(self.normalize)
            .with_num_workers(self.num_workers)
            .with_image_size(self.model.decoder.image_size)
            .with_shuffle_seed(self.seed)
    }
}

/// One pass over `loader`, one optimizer step per batch. Returns the updated
/// model and the mean loss.
pub fn train_epoch<B, O>(
    mut model: Vae<B>,
    optim: &mut O,
    loader: &dyn DataLoader<RgbdBatch<B>>,
    sampler: &mut LatentSampler,
    learning_rate: f64,
) -> Result<(Vae<B>, f64), TrainingError>
where
    B: AutodiffBackend,
    O: Optimizer<Vae<B>, B>,
{
    let mut epoch_loss = 0.0;
    let mut num_batches = 0usize;

    for batch in loader.iter() {
        model.check_input(&batch.img)?;

        let output = model.forward(batch.img, sampler);
        let loss = neg_elbo(&output);
        epoch_loss += loss.clone().into_scalar().elem::<f64>();

        // gradients are created fresh by every backward pass
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(learning_rate, model, grads);
        num_batches += 1;
    }

    if num_batches == 0 {
        return Err(TrainingError::EmptyDataSource { split: "train" });
    }
    Ok((model, epoch_loss / num_batches as f64))
}

/// Mean per-batch MSE between inputs and their deterministic reconstructions.
///
/// Expects an inference model (see [`AutodiffModule::valid`]): no graph is
/// recorded and batch norms use their running statistics.
pub fn evaluate_mse<B: Backend>(
    model: &Vae<B>,
    loader: &dyn DataLoader<RgbdBatch<B>>,
) -> Result<f64, TrainingError> {
    let mut mse = 0.0;
    let mut num_batches = 0usize;

    for batch in loader.iter() {
        model.check_input(&batch.img)?;
        let diff = model.reconstruct(batch.img.clone()) - batch.img;
        mse += (diff.clone() * diff).mean().into_scalar().elem::<f64>();
        num_batches += 1;
    }

    if num_batches == 0 {
        return Err(TrainingError::EmptyDataSource { split: "test" });
    }
    Ok(mse / num_batches as f64)
}

/// Mean negative ELBO over `loader`, without gradient tracking.
pub fn evaluate_loss<B: Backend>(
    model: &Vae<B>,
    loader: &dyn DataLoader<RgbdBatch<B>>,
    sampler: &mut LatentSampler,
) -> Result<f64, TrainingError> {
    let mut total = 0.0;
    let mut num_batches = 0usize;

    for batch in loader.iter() {
        model.check_input(&batch.img)?;
        let output = model.forward(batch.img, sampler);
        total += neg_elbo(&output).into_scalar().elem::<f64>();
        num_batches += 1;
    }

    if num_batches == 0 {
        return Err(TrainingError::EmptyDataSource { split: "test" });
    }
    Ok(total / num_batches as f64)
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub epochs_completed: usize,
    pub last_train_loss: f64,
    pub last_mse: f64,
    pub last_test_loss: Option<f64>,
    /// Name of the hook that ended the run early, if any.
    pub stopped_by: Option<String>,
}

/// Owns everything one experiment mutates or writes to.
pub struct TrainingSession<B: AutodiffBackend, O: Optimizer<Vae<B>, B>> {
    config: TrainingConfig,
    model: Vae<B>,
    optim: O,
    loaders: DataLoaders<B>,
    sink: Box<dyn MetricsSink>,
    hooks: Vec<Box<dyn EvaluationHook<B, O>>>,
    preview: Vec<RgbdItem>,
    sampler: LatentSampler,
    device: B::Device,
}

impl<B: AutodiffBackend, O: Optimizer<Vae<B>, B>> TrainingSession<B, O> {
    pub fn new(
        config: TrainingConfig,
        model: Vae<B>,
        optim: O,
        loaders: DataLoaders<B>,
        sink: Box<dyn MetricsSink>,
        device: B::Device,
    ) -> Self {
        let sampler = LatentSampler::seeded(config.seed);
        Self {
            config,
            model,
            optim,
            loaders,
            sink,
            hooks: Vec::new(),
            preview: Vec::new(),
            sampler,
            device,
        }
    }

    pub fn with_hook(mut self, hook: impl EvaluationHook<B, O> + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Test items rendered as reconstruction figures at every evaluation.
    pub fn with_preview(mut self, items: Vec<RgbdItem>) -> Self {
        self.preview = items;
        self
    }

    pub fn model(&self) -> &Vae<B> {
        &self.model
    }

    pub fn into_model(self) -> Vae<B> {
        self.model
    }

    pub fn train_epoch(&mut self) -> Result<f64, TrainingError> {
        let (model, loss) = train_epoch(
            self.model.clone(),
            &mut self.optim,
            self.loaders.train.as_ref(),
            &mut self.sampler,
            self.config.learning_rate,
        )?;
        self.model = model;
        Ok(loss)
    }

    pub fn evaluate_mse(&self) -> Result<f64, TrainingError> {
        evaluate_mse(&self.model.valid(), self.loaders.test.as_ref())
    }

    /// Uses its own sampler seeded from the epoch so test losses are comparable.
    pub fn evaluate_loss(&self, epoch: usize) -> Result<f64, TrainingError> {
        let mut sampler = LatentSampler::seeded(self.config.seed.wrapping_add(epoch as u64));
        evaluate_loss(&self.model.valid(), self.loaders.test.as_ref(), &mut sampler)
    }

    pub fn log_previews(&mut self, epoch: usize) -> anyhow::Result<()> {
        let model = self.model.valid();
        for (idx, item) in self.preview.iter().enumerate() {
            let x = item.to_tensor::<B::InnerBackend>(&self.device);
            let x = if self.config.normalize { normalize(x) } else { x };
            let [channels, height, width] = x.shape().dims;

            let reconstruction = model
                .reconstruct(x.unsqueeze::<4>())
                .reshape([channels, height, width]);
            let reconstruction = tensor_to_item(reconstruction, self.config.normalize);

            let figure = reconstruction_figure(item, &reconstruction);
            let tag = format!("reconstruction{}", idx * self.config.preview_stride);
            self.sink.add_figure(&tag, &figure, epoch)?;
        }
        Ok(())
    }

    fn run_hooks(&mut self, report: &EvaluationReport) -> anyhow::Result<Option<String>> {
        let mut stopped_by = None;
        for hook in self.hooks.iter_mut() {
            let action = hook
                .on_evaluation(report, &self.model, &self.optim)
                .with_context(|| format!("running {} hook", hook.name()))?;
            if action == HookAction::Stop && stopped_by.is_none() {
                log::warn!("{} requested a stop at epoch {}", hook.name(), report.epoch);
                stopped_by = Some(hook.name().to_string());
            }
        }
        Ok(stopped_by)
    }

    /// The epoch loop. Any error ends the run; batches are never retried.
    pub fn run(&mut self) -> anyhow::Result<RunSummary> {
        let mut summary = RunSummary::default();

        for epoch in 1..=self.config.num_epochs {
            let train_loss = self.train_epoch()?;
            self.sink.add_scalar("Loss/train", -train_loss, epoch)?;

            let mse = self.evaluate_mse()?;
            self.sink.add_scalar("Loss/mse", mse, epoch)?;

            log::info!("[epoch {epoch}]  average training loss: {train_loss:.8}");

            summary.epochs_completed = epoch;
            summary.last_train_loss = train_loss;
            summary.last_mse = mse;

            let frequency = self.config.test_frequency;
            let evaluate = frequency > 0 && epoch % frequency == 0;
            if frequency > 0 && !evaluate {
                continue;
            }

            let test_loss = if evaluate {
                let test_loss = self.evaluate_loss(epoch)?;
                self.sink.add_scalar("Loss/test", -test_loss, epoch)?;
                log::info!("[epoch {epoch}] average test loss: {test_loss:.8}");
                summary.last_test_loss = Some(test_loss);
                Some(test_loss)
            } else {
                None
            };

            let report = EvaluationReport::new(epoch, train_loss, test_loss, mse);
            let stopped_by = self.run_hooks(&report)?;
            if evaluate {
                self.log_previews(epoch)?;
            }

            if stopped_by.is_some() {
                summary.stopped_by = stopped_by;
                break;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{setup_data_loaders, synthetic::SyntheticRgbdDataset},
        hooks::{EvaluationReport, LossGuard},
        metrics::MemorySink,
        model::testing,
    };
    use burn::data::dataset::Dataset;
    use std::sync::{Arc, Mutex};

    type B = burn::backend::Autodiff<burn::backend::NdArray>;

    fn config() -> TrainingConfig {
        TrainingConfig::new(testing::tiny_vae(4), AdamConfig::new())
            .with_batch_size(2)
            .with_num_workers(1)
            .with_num_epochs(2)
            .with_test_frequency(2)
            .with_preview_count(2)
            .with_preview_stride(1)
    }

    fn loaders(config: &TrainingConfig, train_len: usize, test_len: usize) -> DataLoaders<B> {
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        setup_data_loaders::<B, _, _>(
            &config.data(),
            SyntheticRgbdDataset::new(train_len, 32, 1),
            SyntheticRgbdDataset::new(test_len, 32, 2),
            &device,
        )
    }

    #[test]
    fn one_epoch_over_a_tiny_dataset() {
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        let config = config();
        let loaders = loaders(&config, 4, 2);
        let model = config.model.init::<B>(&device).unwrap();
        let mut optim = config.optimizer.init();

        let (model, loss) = train_epoch(
            model,
            &mut optim,
            loaders.train.as_ref(),
            &mut LatentSampler::seeded(0),
            config.learning_rate,
        )
        .unwrap();
        assert!(loss.is_finite() && loss > 0.0, "{loss}");

        let mse = evaluate_mse(&model.valid(), loaders.test.as_ref()).unwrap();
        assert!(mse.is_finite() && mse >= 0.0);
    }

    #[test]
    fn evaluation_leaves_parameters_untouched() {
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        let config = config();
        let loaders = loaders(&config, 2, 2);
        let model = config.model.init::<B>(&device).unwrap();

        let probe = SyntheticRgbdDataset::new(1, 32, 9).get(0).unwrap();
        let x = normalize(probe.to_tensor::<burn::backend::NdArray>(&device)).unsqueeze::<4>();
        let before = model.valid().reconstruct(x.clone()).into_data().value;

        evaluate_mse(&model.valid(), loaders.test.as_ref()).unwrap();
        evaluate_loss(&model.valid(), loaders.test.as_ref(), &mut LatentSampler::seeded(0)).unwrap();

        assert_eq!(before, model.valid().reconstruct(x).into_data().value);
    }

    #[test]
    fn empty_training_set_is_an_error() {
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        let config = config();
        let loaders = loaders(&config, 0, 2);
        let model = config.model.init::<B>(&device).unwrap();
        let mut optim = config.optimizer.init();

        let err = train_epoch(
            model,
            &mut optim,
            loaders.train.as_ref(),
            &mut LatentSampler::seeded(0),
            config.learning_rate,
        )
        .unwrap_err();
        assert!(matches!(err, TrainingError::EmptyDataSource { split: "train" }));
    }

    #[test]
    fn wrong_image_size_fails_before_the_forward_pass() {
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        let config = config();
        let loaders = setup_data_loaders::<B, _, _>(
            &config.data(),
            SyntheticRgbdDataset::new(2, 16, 1),
            SyntheticRgbdDataset::new(2, 16, 2),
            &device,
        );
        let model = config.model.init::<B>(&device).unwrap();
        let mut optim = config.optimizer.init();

        let err = train_epoch(
            model,
            &mut optim,
            loaders.train.as_ref(),
            &mut LatentSampler::seeded(0),
            config.learning_rate,
        )
        .unwrap_err();
        assert!(matches!(err, TrainingError::Model(_)));
    }

    #[test]
    fn session_logs_scalars_and_figures() {
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        let config = config();
        let loaders = loaders(&config, 4, 2);
        let preview = SyntheticRgbdDataset::new(2, 32, 2);
        let preview = (0..preview.len()).filter_map(|i| preview.get(i)).collect();
        let model = config.model.init::<B>(&device).unwrap();
        let optim = config.optimizer.init();

        let sink = Arc::new(Mutex::new(MemorySink::default()));

        let mut session = TrainingSession::new(
            config.clone(),
            model,
            optim,
            loaders,
            Box::new(sink.clone()),
            device,
        )
        .with_hook(LossGuard::halting())
        .with_preview(preview);

        let summary = session.run().unwrap();
        assert_eq!(summary.epochs_completed, 2);
        assert!(summary.last_test_loss.is_some());
        assert!(summary.stopped_by.is_none());

        let sink = sink.lock().unwrap();
        let train = sink.values("Loss/train");
        assert_eq!(train.len(), 2);
        assert!(train.iter().all(|v| v.is_finite() && *v < 0.0));
        assert_eq!(sink.values("Loss/mse").len(), 2);
        assert_eq!(sink.values("Loss/test").len(), 1);

        let tags: Vec<_> = sink.figures.iter().map(|(tag, step, _)| (tag.as_str(), *step)).collect();
        assert_eq!(tags, [("reconstruction0", 2), ("reconstruction1", 2)]);
        assert!(sink.figures.iter().all(|(_, _, dims)| *dims == (64, 64)));
    }

    /// Records every report it is handed.
    struct ReportLog(Arc<Mutex<Vec<EvaluationReport>>>);

    impl<B: AutodiffBackend, O: Optimizer<Vae<B>, B>> EvaluationHook<B, O> for ReportLog {
        fn name(&self) -> &str {
            "report log"
        }

        fn on_evaluation(&mut self, report: &EvaluationReport, _model: &Vae<B>, _optim: &O) -> anyhow::Result<HookAction> {
            self.0.lock().unwrap().push(*report);
            Ok(HookAction::Continue)
        }
    }

    #[test]
    fn hooks_see_every_epoch_without_evaluation() {
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        let config = config().with_test_frequency(0);
        let loaders = loaders(&config, 4, 2);
        let model = config.model.init::<B>(&device).unwrap();
        let optim = config.optimizer.init();
        let sink = Arc::new(Mutex::new(MemorySink::default()));
        let reports = Arc::new(Mutex::new(Vec::new()));

        let summary = TrainingSession::new(config, model, optim, loaders, Box::new(sink.clone()), device)
            .with_hook(ReportLog(reports.clone()))
            .run()
            .unwrap();
        assert_eq!(summary.epochs_completed, 2);
        assert!(summary.last_test_loss.is_none());

        let reports = reports.lock().unwrap();
        assert_eq!(reports.iter().map(|r| r.epoch).collect::<Vec<_>>(), [1, 2]);
        assert!(reports.iter().all(|r| r.test_loss.is_none() && r.train_loss.is_finite()));

        let sink = sink.lock().unwrap();
        assert!(sink.values("Loss/test").is_empty());
        assert!(sink.figures.is_empty());
    }

    #[test]
    fn optimizer_step_skips_frozen_stages() {
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        let config = config().with_learning_rate(1.0e-2);
        let loaders = loaders(&config, 2, 2);
        let model = config
            .model
            .init_with_weights::<B>(&testing::PretrainedStandIn, &device)
            .unwrap();
        let optim = config.optimizer.init();

        let conv_weights = |model: &Vae<B>| {
            let backbone = &model.encoder.backbone;
            [&backbone.layer1, &backbone.layer3]
                .map(|layer| layer[0].core.conv_1.weight.val().into_data().convert::<f32>().value)
        };

        let mut session = TrainingSession::new(
            config,
            model,
            optim,
            loaders,
            Box::new(MemorySink::default()),
            device,
        );
        let [layer1_before, layer3_before] = conv_weights(session.model());
        session.train_epoch().unwrap();
        let [layer1_after, layer3_after] = conv_weights(&session.into_model());

        assert_eq!(layer1_before, layer1_after);
        assert_ne!(layer3_before, layer3_after);
    }
}
