//! The emotion CNN, built with `burn` so the same definition serves
//! inference and training.
//!
//! Three (3×3 conv + ReLU, 2×2 max-pool) blocks with 32/64/128 filters,
//! then dense 128 + ReLU, dropout, and a dense layer with one output per
//! [`EmotionLabel`](crate::EmotionLabel). Input is NCHW `[batch, 1, 48, 48]`.

use crate::preprocess::FACE_SIZE;
use crate::types::EmotionLabel;
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, RecorderError};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::path::Path;

/// File extension of a persisted network record.
pub const RECORD_EXTENSION: &str = "mpk";

// 48 → conv 46 → pool 23 → conv 21 → pool 10 → conv 8 → pool 4
const FEATURE_SIDE: usize = 4;

#[derive(Config, Debug)]
pub struct EmotionNetConfig {
    #[config(default = 32)]
    pub filters1: usize,
    #[config(default = 64)]
    pub filters2: usize,
    #[config(default = 128)]
    pub filters3: usize,
    #[config(default = 128)]
    pub hidden: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
}

#[derive(Module, Debug)]
pub struct EmotionNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    pool: MaxPool2d,
    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,
}

impl EmotionNetConfig {
    /// Build a freshly initialised network on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> EmotionNet<B> {
        EmotionNet {
            conv1: Conv2dConfig::new([1, self.filters1], [3, 3]).init(device),
            conv2: Conv2dConfig::new([self.filters1, self.filters2], [3, 3]).init(device),
            conv3: Conv2dConfig::new([self.filters2, self.filters3], [3, 3]).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1: LinearConfig::new(self.filters3 * FEATURE_SIDE * FEATURE_SIDE, self.hidden)
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(self.hidden, EmotionLabel::COUNT).init(device),
        }
    }
}

impl<B: Backend> EmotionNet<B> {
    /// Raw class logits, `[batch, 7]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(relu(self.conv1.forward(input)));
        let x = self.pool.forward(relu(self.conv2.forward(x)));
        let x = self.pool.forward(relu(self.conv3.forward(x)));

        let [batch, channels, height, width] = x.dims();
        let x = x.reshape([batch, channels * height * width]);

        let x = relu(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Class probabilities, `[batch, 7]`.
    pub fn forward_softmax(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(input), 1)
    }

    /// Persist the weights as a named MessagePack record.
    pub fn save(self, path: &Path) -> Result<(), RecorderError> {
        self.save_file(path.to_path_buf(), &recorder())
    }

    /// Replace the weights with a record previously written by [`save`](Self::save).
    pub fn load(self, path: &Path, device: &B::Device) -> Result<Self, RecorderError> {
        self.load_file(path.to_path_buf(), &recorder(), device)
    }
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}
