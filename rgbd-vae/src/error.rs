use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("latent dimension must be positive")]
    ZeroLatentDim,

    #[error("image size {size} is not 4·2^n for some n ≥ 1")]
    InvalidImageSize { size: usize },

    #[error("encoder emits z_dim={encoder} but decoder consumes z_dim={decoder}")]
    LatentMismatch { encoder: usize, decoder: usize },

    #[error("encoder reads {encoder} channels but decoder writes {decoder}")]
    ChannelMismatch { encoder: usize, decoder: usize },

    #[error("input batch has shape {found:?}, model expects [_, {channels}, {size}, {size}]")]
    ShapeMismatch {
        found: [usize; 4],
        channels: usize,
        size: usize,
    },

    #[error("loading backbone weights from {path}: {message}")]
    Weights { path: PathBuf, message: String },
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("the {split} data source yielded no batches")]
    EmptyDataSource { split: &'static str },

    #[error(transparent)]
    Model(#[from] ModelError),
}
