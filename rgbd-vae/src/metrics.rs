use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

/// Write-only destination for scalars and figures, keyed by step (the epoch).
pub trait MetricsSink {
    fn add_scalar(&mut self, name: &str, value: f64, step: usize) -> Result<()>;

    fn add_figure(&mut self, tag: &str, figure: &RgbImage, step: usize) -> Result<()>;
}

/// Appends scalars to `scalars.csv` and writes figures under `figures/`.
pub struct ArtifactsSink {
    scalars: File,
    figures_dir: PathBuf,
}

impl ArtifactsSink {
    pub fn new(artifacts_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = artifacts_dir.as_ref();
        let figures_dir = dir.join("figures");
        std::fs::create_dir_all(&figures_dir)
            .with_context(|| format!("creating {}", figures_dir.display()))?;

        let scalars_path = dir.join("scalars.csv");
        let is_new = !scalars_path.exists();
        let mut scalars = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&scalars_path)
            .with_context(|| format!("opening {}", scalars_path.display()))?;
        if is_new {
            writeln!(scalars, "name,step,value")?;
        }

        Ok(Self {
            scalars,
            figures_dir,
        })
    }
}

impl MetricsSink for ArtifactsSink {
    fn add_scalar(&mut self, name: &str, value: f64, step: usize) -> Result<()> {
        writeln!(self.scalars, "{name},{step},{value}").context("writing scalar")?;
        self.scalars.flush().context("flushing scalars")
    }

    fn add_figure(&mut self, tag: &str, figure: &RgbImage, step: usize) -> Result<()> {
        let file_name = format!("{}_{step:05}.png", tag.replace('/', "_"));
        let path = self.figures_dir.join(file_name);
        figure
            .save(&path)
            .with_context(|| format!("saving figure {}", path.display()))
    }
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub scalars: Vec<(String, usize, f64)>,
    pub figures: Vec<(String, usize, (u32, u32))>,
}

impl MemorySink {
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.scalars
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, _, v)| *v)
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn add_scalar(&mut self, name: &str, value: f64, step: usize) -> Result<()> {
        self.scalars.push((name.to_string(), step, value));
        Ok(())
    }

    fn add_figure(&mut self, tag: &str, figure: &RgbImage, step: usize) -> Result<()> {
        self.figures.push((tag.to_string(), step, figure.dimensions()));
        Ok(())
    }
}

/// Lets the caller keep a handle on a sink owned by a training session.
impl<S: MetricsSink> MetricsSink for Arc<Mutex<S>> {
    fn add_scalar(&mut self, name: &str, value: f64, step: usize) -> Result<()> {
        self.lock()
            .map_err(|_| anyhow!("metrics sink lock poisoned"))?
            .add_scalar(name, value, step)
    }

    fn add_figure(&mut self, tag: &str, figure: &RgbImage, step: usize) -> Result<()> {
        self.lock()
            .map_err(|_| anyhow!("metrics sink lock poisoned"))?
            .add_figure(tag, figure, step)
    }
}
