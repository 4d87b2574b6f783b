use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::data::dataset::{
    transform::{Mapper, MapperDataset},
    Dataset, InMemDataset,
};
use derive_new::new;
use image::imageops::FilterType;

use super::{RgbdItem, CHANNELS, DEPTH_CHANNEL};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// An RGB image and the depth map with the same file stem.
#[derive(Debug, Clone, new)]
pub struct RgbdPaths {
    pub rgb: PathBuf,
    pub depth: PathBuf,
}

/// Decodes and resizes an [`RgbdPaths`] pair.
#[derive(Debug, Clone, Copy, new)]
struct LoadRgbd {
    size: u32,
}

impl Mapper<RgbdPaths, RgbdItem> for LoadRgbd {
    fn map(&self, item: &RgbdPaths) -> RgbdItem {
        // The loader has no error channel; a corrupt file ends the run.
        load_pair(item, self.size).unwrap_or_else(|err| panic!("{err:#}"))
    }
}

/// Reads both images, resizes them to `size`² and packs them CHW.
///
/// Depth is min-max scaled per image since raw depth encodings differ
/// between sources.
pub fn load_pair(paths: &RgbdPaths, size: u32) -> Result<RgbdItem> {
    let rgb = image::open(&paths.rgb)
        .with_context(|| format!("decoding {}", paths.rgb.display()))?
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb32f();
    let depth = image::open(&paths.depth)
        .with_context(|| format!("decoding {}", paths.depth.display()))?
        .resize_exact(size, size, FilterType::Nearest)
        .to_luma32f();

    let side = size as usize;
    let plane = side * side;
    let mut pixels = vec![0.0f32; CHANNELS * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * side + x as usize;
        for c in 0..3 {
            pixels[c * plane + idx] = pixel[c];
        }
    }

    let (min, max) = depth
        .pixels()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    let range = max - min;
    for (x, y, pixel) in depth.enumerate_pixels() {
        let idx = y as usize * side + x as usize;
        pixels[DEPTH_CHANNEL * plane + idx] = if range > 0.0 { (pixel[0] - min) / range } else { 0.0 };
    }

    Ok(RgbdItem::new(pixels, side))
}

/// `<root>/<split>/rgb/<name>.<ext>` paired with `<root>/<split>/depth/<name>.png`.
pub struct RgbdFolderDataset {
    dataset: MapperDataset<InMemDataset<RgbdPaths>, LoadRgbd, RgbdPaths>,
}

impl RgbdFolderDataset {
    pub fn train(root: impl AsRef<Path>, image_size: usize) -> Result<Self> {
        Self::new(root.as_ref(), "train", image_size)
    }

    pub fn test(root: impl AsRef<Path>, image_size: usize) -> Result<Self> {
        Self::new(root.as_ref(), "test", image_size)
    }

    fn new(root: &Path, split: &str, image_size: usize) -> Result<Self> {
        let pairs = index_split(&root.join(split))?;
        log::info!("indexed {} rgb-d pairs in {split}", pairs.len());

        Ok(Self {
            dataset: MapperDataset::new(InMemDataset::new(pairs), LoadRgbd::new(image_size as u32)),
        })
    }
}

/// Lists the pairs of one split, sorted by file name.
pub fn index_split(dir: &Path) -> Result<Vec<RgbdPaths>> {
    let rgb_dir = dir.join("rgb");
    let depth_dir = dir.join("depth");

    let mut rgb_files = std::fs::read_dir(&rgb_dir)
        .with_context(|| format!("listing {}", rgb_dir.display()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("listing {}", rgb_dir.display()))?;
    rgb_files.retain(|path| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    });
    rgb_files.sort();

    let mut pairs = Vec::with_capacity(rgb_files.len());
    for rgb in rgb_files {
        let Some(stem) = rgb.file_stem() else {
            continue;
        };
        let depth = depth_dir.join(format!("{}.png", stem.to_string_lossy()));
        if !depth.is_file() {
            bail!("{} has no depth map at {}", rgb.display(), depth.display());
        }
        pairs.push(RgbdPaths::new(rgb, depth));
    }
    Ok(pairs)
}

impl Dataset<RgbdItem> for RgbdFolderDataset {
    fn get(&self, index: usize) -> Option<RgbdItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}
