//! emosense-core — Facial emotion detection engine.
//!
//! Locates faces with the SeetaFace cascade (`rustface`), normalizes the
//! largest one to a 48×48 tensor, and classifies it into seven emotions with
//! either an ONNX Runtime session or a `burn` network record.

pub mod advice;
pub mod classifier;
pub mod locator;
pub mod net;
pub mod pipeline;
pub mod preprocess;
pub mod types;

pub use advice::{advice_for, advice_for_name};
pub use classifier::{
    load_classifier, ClassifierError, EmotionClassifier, EmotionScores, NetClassifier,
    OnnxClassifier, TensorLayout,
};
pub use locator::{CascadeLocator, FaceLocator, LocatorConfig, LocatorError};
pub use net::{EmotionNet, EmotionNetConfig};
pub use pipeline::{ImageInput, InferencePipeline, PipelineError};
pub use preprocess::{FaceTensor, FACE_SIZE};
pub use types::{BoundingBox, DetectionResult, EmotionLabel, Outcome, NO_ADVICE};

use std::path::PathBuf;

/// File name of the cascade model inside the model directory.
pub const CASCADE_MODEL_FILE: &str = "seeta_fd_frontal_v1.0.bin";

/// File name of the artifact the trainer writes and the daemon serves.
pub const SERVING_MODEL_FILE: &str = "emotion_model_updated.mpk";

/// File name of the artifact the trainer fine-tunes from, when present.
pub const BASE_MODEL_FILE: &str = "emotion_model_30epochs.mpk";

/// Default model directory: `$XDG_DATA_HOME/emosense/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("emosense")
        .join("models")
}
