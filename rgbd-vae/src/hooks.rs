use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::{
    config::Config,
    module::Module,
    optim::Optimizer,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};

use derive_new::new;

use crate::model::Vae;

/// Losses observed at one evaluation interval.
#[derive(Debug, Clone, Copy, new)]
pub struct EvaluationReport {
    pub epoch: usize,
    /// Mean negative ELBO over the training batches of this epoch.
    pub train_loss: f64,
    /// Mean negative ELBO over the test batches; `None` when held-out
    /// evaluation is disabled.
    pub test_loss: Option<f64>,
    pub mse: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    Stop,
}

/// Invoked by the training session every `test_frequency` epochs, or every
/// epoch when `test_frequency` is 0.
pub trait EvaluationHook<B: AutodiffBackend, O: Optimizer<Vae<B>, B>> {
    fn name(&self) -> &str;

    fn on_evaluation(&mut self, report: &EvaluationReport, model: &Vae<B>, optim: &O) -> Result<HookAction>;
}

#[derive(Config, Debug)]
pub struct CheckpointMeta {
    pub epoch: usize,
    pub test_loss: f64,
}

/// Saves model, optimizer state and `{epoch, test_loss}` whenever the test
/// loss beats the best seen so far.
pub struct CheckpointOnImprovement {
    dir: PathBuf,
    best: f64,
}

impl CheckpointOnImprovement {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            best: f64::INFINITY,
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }
}

impl<B: AutodiffBackend, O: Optimizer<Vae<B>, B>> EvaluationHook<B, O> for CheckpointOnImprovement {
    fn name(&self) -> &str {
        "checkpoint"
    }

    fn on_evaluation(&mut self, report: &EvaluationReport, model: &Vae<B>, optim: &O) -> Result<HookAction> {
        let Some(test_loss) = report.test_loss else {
            return Ok(HookAction::Continue);
        };
        if !(test_loss < self.best) {
            return Ok(HookAction::Continue);
        }
        log::info!("saving checkpoint for epoch {} (test loss {test_loss:.8})", report.epoch);
        self.best = test_loss;

        std::fs::create_dir_all(&self.dir).with_context(|| format!("creating {}", self.dir.display()))?;
        model
            .clone()
            .save_file(self.dir.join("model"), &CompactRecorder::new())
            .context("saving model checkpoint")?;
        Recorder::<B>::record(&CompactRecorder::new(), optim.to_record(), self.dir.join("optimizer"))
            .context("saving optimizer checkpoint")?;
        CheckpointMeta::new(report.epoch, test_loss)
            .save(self.dir.join("checkpoint.json"))
            .context("saving checkpoint metadata")?;

        Ok(HookAction::Continue)
    }
}

/// Flags a negative or non-finite loss, which the Gaussian likelihood with a
/// fixed scale of 1 cannot produce without numerical trouble.
#[derive(Debug, Clone, Copy)]
pub struct LossGuard {
    halt: bool,
}

impl LossGuard {
    pub fn warn_only() -> Self {
        Self { halt: false }
    }

    pub fn halting() -> Self {
        Self { halt: true }
    }

    pub fn is_unstable(report: &EvaluationReport) -> bool {
        std::iter::once(report.train_loss)
            .chain(report.test_loss)
            .any(|loss| !loss.is_finite() || loss < 0.0)
    }
}

impl<B: AutodiffBackend, O: Optimizer<Vae<B>, B>> EvaluationHook<B, O> for LossGuard {
    fn name(&self) -> &str {
        "loss guard"
    }

    fn on_evaluation(&mut self, report: &EvaluationReport, _model: &Vae<B>, _optim: &O) -> Result<HookAction> {
        if !Self::is_unstable(report) {
            return Ok(HookAction::Continue);
        }
        log::warn!(
            "numerical instability at epoch {}: train loss {}, test loss {:?}",
            report.epoch,
            report.train_loss,
            report.test_loss
        );
        Ok(if self.halt {
            HookAction::Stop
        } else {
            HookAction::Continue
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing;
    use burn::optim::AdamConfig;

    type B = burn::backend::Autodiff<burn::backend::NdArray>;

    fn report(epoch: usize, train_loss: f64, test_loss: f64) -> EvaluationReport {
        EvaluationReport::new(epoch, train_loss, Some(test_loss), 0.1)
    }

    #[test]
    fn guard_flags_negative_and_non_finite_losses() {
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        let model = testing::tiny_vae(4).init::<B>(&device).unwrap();
        let optim = AdamConfig::new().init::<B, Vae<B>>();

        let mut warn = LossGuard::warn_only();
        let mut halt = LossGuard::halting();
        let cases = [
            (report(5, 100.0, 120.0), HookAction::Continue),
            (report(5, -1.0, 120.0), HookAction::Stop),
            (report(5, 100.0, f64::NAN), HookAction::Stop),
            (report(5, f64::INFINITY, 1.0), HookAction::Stop),
        ];
        let train_only = [
            (EvaluationReport::new(5, 100.0, None, 0.1), HookAction::Continue),
            (EvaluationReport::new(5, f64::NAN, None, 0.1), HookAction::Stop),
        ];
        for (report, expected) in cases.into_iter().chain(train_only) {
            assert_eq!(warn.on_evaluation(&report, &model, &optim).unwrap(), HookAction::Continue);
            assert_eq!(halt.on_evaluation(&report, &model, &optim).unwrap(), expected);
        }
    }

    #[test]
    fn checkpoint_only_on_improvement() {
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        let model = testing::tiny_vae(4).init::<B>(&device).unwrap();
        let optim = AdamConfig::new().init::<B, Vae<B>>();
        let dir = std::env::temp_dir().join(format!("rgbd-vae-ckpt-{}", std::process::id()));
        let meta = dir.join("checkpoint.json");

        let mut hook = CheckpointOnImprovement::new(&dir);
        hook.on_evaluation(&report(5, 10.0, 50.0), &model, &optim).unwrap();
        assert_eq!(CheckpointMeta::load(&meta).unwrap().epoch, 5);

        hook.on_evaluation(&report(10, 10.0, 70.0), &model, &optim).unwrap();
        assert_eq!(CheckpointMeta::load(&meta).unwrap().epoch, 5);

        hook.on_evaluation(&report(15, 10.0, 40.0), &model, &optim).unwrap();
        assert_eq!(CheckpointMeta::load(&meta).unwrap().epoch, 15);
        assert_eq!(hook.best(), 40.0);

        let untested = EvaluationReport::new(20, 1.0, None, 0.1);
        hook.on_evaluation(&untested, &model, &optim).unwrap();
        assert_eq!(CheckpointMeta::load(&meta).unwrap().epoch, 15);

        std::fs::remove_dir_all(&dir).ok();
    }
}
