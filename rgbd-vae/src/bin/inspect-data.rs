use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::data::dataset::Dataset;
use dotenv::dotenv;
use rgbd_vae::{
    data::folder::RgbdFolderDataset,
    utils::{depth_image, get_env, get_env_opt, rgb_image, show_image_terminal_color, Stats},
};

fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let root = get_env("RGBD_DATA_DIR")?;
    let size = get_env_opt("IMAGE_SIZE")
        .map(|s| s.parse::<usize>())
        .transpose()
        .context("parsing IMAGE_SIZE")?
        .unwrap_or(128);
    let out_dir = PathBuf::from(get_env_opt("ARTIFACTS_DIR").unwrap_or_else(|| "./out".to_string()));

    let dataset = RgbdFolderDataset::train(&root, size)?;
    println!("num items: {}", dataset.len());

    let Some(item) = dataset.get(0) else {
        println!("dataset is empty");
        return Ok(());
    };
    show_image_terminal_color(&item);

    std::fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    rgb_image(&item).save(out_dir.join("example-rgb.png"))?;
    depth_image(&item).save(out_dir.join("example-depth.png"))?;

    let stats = Stats::from_iter(dataset.iter());
    println!("{:#?}", stats);

    Ok(())
}
