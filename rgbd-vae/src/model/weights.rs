use std::path::PathBuf;

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};

use super::resnet::ResNet;
use crate::error::ModelError;

/// Supplies the initial backbone parameters. Called once, before the stem and
/// head are replaced, so a source sees the backbone in its original
/// 3-channel / 1000-class shape.
pub trait WeightSource<B: Backend> {
    fn load_backbone(&self, backbone: ResNet<B>, device: &B::Device) -> Result<ResNet<B>, ModelError>;

    fn describe(&self) -> String;

    /// Whether the loaded parameters were trained elsewhere. The encoder only
    /// applies its freeze policy to pretrained backbones.
    fn is_pretrained(&self) -> bool;
}

/// Keeps the freshly initialized parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomInit;

impl<B: Backend> WeightSource<B> for RandomInit {
    fn load_backbone(&self, backbone: ResNet<B>, _device: &B::Device) -> Result<ResNet<B>, ModelError> {
        Ok(backbone)
    }

    fn describe(&self) -> String {
        "random initialization".to_string()
    }

    fn is_pretrained(&self) -> bool {
        false
    }
}

/// A full-precision named MessagePack record of the backbone.
#[derive(Debug, Clone)]
pub struct RecordFile {
    pub path: PathBuf,
}

impl RecordFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl<B: Backend> WeightSource<B> for RecordFile {
    fn load_backbone(&self, backbone: ResNet<B>, device: &B::Device) -> Result<ResNet<B>, ModelError> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        backbone
            .load_file(self.path.clone(), &recorder, device)
            .map_err(|err| ModelError::Weights {
                path: self.path.clone(),
                message: format!("{err:?}"),
            })
    }

    fn describe(&self) -> String {
        format!("record file {}", self.path.display())
    }

    fn is_pretrained(&self) -> bool {
        true
    }
}
