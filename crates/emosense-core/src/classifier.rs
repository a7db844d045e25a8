//! Emotion classifiers: ONNX Runtime for exported models, `burn` for
//! records produced by the trainer.
//!
//! Both map a [`FaceTensor`] to seven scores in [`EmotionLabel::ALL`] order.

use crate::net::{EmotionNet, EmotionNetConfig, RECORD_EXTENSION};
use crate::preprocess::{FaceTensor, FACE_SIZE};
use crate::types::EmotionLabel;
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::NdArray;
use burn::tensor::{Tensor, TensorData};
use ndarray::ArrayView4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCORE_SUM_TOLERANCE: f32 = 1e-3;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model artifact not found: {0}")]
    ArtifactMissing(String),
    #[error("unsupported model artifact {0} — expected .onnx or .{RECORD_EXTENSION}")]
    UnsupportedArtifact(String),
    #[error("failed to load model record: {0}")]
    Record(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Seven scores in label order, summing to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionScores([f32; EmotionLabel::COUNT]);

impl EmotionScores {
    /// Interpret raw model output.
    ///
    /// Output that already forms a distribution is kept as-is; anything else
    /// (negative values, or a sum away from 1) is treated as logits.
    pub fn from_raw(raw: &[f32]) -> Result<Self, ClassifierError> {
        let values: [f32; EmotionLabel::COUNT] = raw.try_into().map_err(|_| {
            ClassifierError::InferenceFailed(format!(
                "expected {} scores, got {}",
                EmotionLabel::COUNT,
                raw.len()
            ))
        })?;

        if values.iter().any(|v| !v.is_finite()) {
            return Err(ClassifierError::InferenceFailed(
                "model produced non-finite scores".into(),
            ));
        }

        let sum: f32 = values.iter().sum();
        let is_distribution =
            values.iter().all(|&v| v >= 0.0) && (sum - 1.0).abs() <= SCORE_SUM_TOLERANCE;

        Ok(Self(if is_distribution { values } else { softmax(values) }))
    }

    pub fn values(&self) -> &[f32; EmotionLabel::COUNT] {
        &self.0
    }

    pub fn get(&self, label: EmotionLabel) -> f32 {
        self.0[label.index()]
    }

    /// Arg-max label and its score. Ties resolve to the lower index.
    pub fn top(&self) -> (EmotionLabel, f32) {
        let mut best = 0;
        for i in 1..EmotionLabel::COUNT {
            if self.0[i] > self.0[best] {
                best = i;
            }
        }
        (EmotionLabel::ALL[best], self.0[best])
    }
}

fn softmax(logits: [f32; EmotionLabel::COUNT]) -> [f32; EmotionLabel::COUNT] {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.map(|x| (x - max).exp());
    let sum: f32 = exp.iter().sum();
    exp.map(|e| e / sum)
}

/// Maps a normalized face to emotion scores.
///
/// Implementations are loaded once and never mutate their weights; the
/// `&mut` receiver only reflects runtime session state.
pub trait EmotionClassifier: Send {
    fn predict(&mut self, face: &FaceTensor) -> Result<EmotionScores, ClassifierError>;
}

/// Memory layout an ONNX model expects for its single input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// (1, 48, 48, 1), channels-last. The default.
    Nhwc,
    /// (1, 1, 48, 48).
    Nchw,
}

impl TensorLayout {
    /// View `face` with this layout's shape. The samples are not moved.
    pub fn view<'a>(self, face: &'a FaceTensor) -> Result<ArrayView4<'a, f32>, ClassifierError> {
        let view = face.view();
        match self {
            TensorLayout::Nhwc => Ok(view),
            TensorLayout::Nchw => view
                .into_shape_with_order((1, 1, FACE_SIZE, FACE_SIZE))
                .map_err(|e| ClassifierError::InferenceFailed(format!("reshape to NCHW: {e}"))),
        }
    }
}

impl std::str::FromStr for TensorLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nhwc" => Ok(TensorLayout::Nhwc),
            "nchw" => Ok(TensorLayout::Nchw),
            other => Err(format!("unknown tensor layout: {other}")),
        }
    }
}

/// ONNX Runtime classifier.
pub struct OnnxClassifier {
    session: Session,
    layout: TensorLayout,
}

impl OnnxClassifier {
    /// Load an exported emotion model from the given path.
    pub fn load(model_path: &str, layout: TensorLayout) -> Result<Self, ClassifierError> {
        if !Path::new(model_path).exists() {
            return Err(ClassifierError::ArtifactMissing(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            ?layout,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ONNX emotion model"
        );

        Ok(Self { session, layout })
    }
}

impl EmotionClassifier for OnnxClassifier {
    fn predict(&mut self, face: &FaceTensor) -> Result<EmotionScores, ClassifierError> {
        let view = self.layout.view(face)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(view)?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("score extraction: {e}")))?;

        EmotionScores::from_raw(raw)
    }
}

/// `burn` classifier over a record written by the trainer.
pub struct NetClassifier {
    net: EmotionNet<NdArray>,
    device: NdArrayDevice,
}

impl NetClassifier {
    /// Load a trained network record from the given path.
    pub fn load(model_path: &str) -> Result<Self, ClassifierError> {
        let path = Path::new(model_path);
        if !path.exists() {
            return Err(ClassifierError::ArtifactMissing(model_path.to_string()));
        }

        let device = NdArrayDevice::Cpu;
        let net = EmotionNetConfig::new()
            .init::<NdArray>(&device)
            .load(path, &device)
            .map_err(|e| ClassifierError::Record(e.to_string()))?;

        tracing::info!(path = model_path, "loaded emotion network record");

        Ok(Self { net, device })
    }

    /// Wrap an in-memory network.
    pub fn from_net(net: EmotionNet<NdArray>) -> Self {
        Self { net, device: NdArrayDevice::Cpu }
    }
}

impl EmotionClassifier for NetClassifier {
    fn predict(&mut self, face: &FaceTensor) -> Result<EmotionScores, ClassifierError> {
        let data = TensorData::new(face.as_slice().to_vec(), [1, 1, FACE_SIZE, FACE_SIZE]);
        let input = Tensor::<NdArray, 4>::from_data(data, &self.device);

        let probs = self
            .net
            .forward_softmax(input)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("score extraction: {e:?}")))?;

        EmotionScores::from_raw(&probs)
    }
}

/// Load a classifier, choosing the backend from the artifact extension.
///
/// Fails fast when the artifact is missing; callers must not serve without one.
pub fn load_classifier(
    model_path: &str,
    layout: TensorLayout,
) -> Result<Box<dyn EmotionClassifier>, ClassifierError> {
    if !Path::new(model_path).exists() {
        return Err(ClassifierError::ArtifactMissing(model_path.to_string()));
    }

    let extension = Path::new(model_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("onnx") => Ok(Box::new(OnnxClassifier::load(model_path, layout)?)),
        Some(RECORD_EXTENSION) => Ok(Box::new(NetClassifier::load(model_path)?)),
        _ => Err(ClassifierError::UnsupportedArtifact(model_path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    fn black_face() -> FaceTensor {
        FaceTensor::from_gray48(&GrayImage::new(48, 48)).unwrap()
    }

    #[test]
    fn test_layout_views_share_samples() {
        let gray = GrayImage::from_fn(48, 48, |x, y| image::Luma([(x * 5 + y) as u8]));
        let face = FaceTensor::from_gray48(&gray).unwrap();

        let nhwc = TensorLayout::Nhwc.view(&face).unwrap();
        assert_eq!(nhwc.shape(), &[1, FACE_SIZE, FACE_SIZE, 1]);
        assert_eq!(nhwc[[0, 3, 7, 0]], face.as_slice()[3 * FACE_SIZE + 7]);

        let nchw = TensorLayout::Nchw.view(&face).unwrap();
        assert_eq!(nchw.shape(), &[1, 1, FACE_SIZE, FACE_SIZE]);
        assert_eq!(nchw[[0, 0, 3, 7]], face.as_slice()[3 * FACE_SIZE + 7]);
        assert_eq!(nchw.iter().copied().collect::<Vec<_>>(), face.as_slice());
    }

    fn fresh_classifier() -> NetClassifier {
        let net = EmotionNetConfig::new().init::<NdArray>(&NdArrayDevice::Cpu);
        NetClassifier::from_net(net)
    }

    #[test]
    fn test_scores_keep_distribution() {
        let raw = [0.1, 0.0, 0.0, 0.6, 0.1, 0.1, 0.1];
        let scores = EmotionScores::from_raw(&raw).unwrap();
        assert_eq!(scores.values(), &raw);
        let (label, conf) = scores.top();
        assert_eq!(label, EmotionLabel::Happy);
        assert!((conf - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_scores_softmax_on_logits() {
        let raw = [2.0, -1.0, 0.5, 3.0, 0.0, 1.0, -2.0];
        let scores = EmotionScores::from_raw(&raw).unwrap();
        let sum: f32 = scores.values().iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(scores.top().0, EmotionLabel::Happy);
        assert!(scores.get(EmotionLabel::Happy) > scores.get(EmotionLabel::Angry));
    }

    #[test]
    fn test_scores_wrong_length() {
        assert!(matches!(
            EmotionScores::from_raw(&[0.5, 0.5]),
            Err(ClassifierError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_scores_non_finite() {
        let raw = [f32::NAN, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert!(EmotionScores::from_raw(&raw).is_err());
    }

    #[test]
    fn test_top_tie_prefers_lower_index() {
        let raw = [1.0 / 7.0; 7];
        assert_eq!(EmotionScores::from_raw(&raw).unwrap().top().0, EmotionLabel::Angry);
    }

    #[test]
    fn test_net_black_face_scores() {
        let mut classifier = fresh_classifier();
        let scores = classifier.predict(&black_face()).unwrap();
        assert!(scores.values().iter().all(|v| v.is_finite() && *v >= 0.0));
        let sum: f32 = scores.values().iter().sum();
        assert!((sum - 1.0).abs() < 1e-3, "scores sum to {sum}");
    }

    #[test]
    fn test_net_predict_idempotent() {
        let mut classifier = fresh_classifier();
        let face = FaceTensor::from_gray48(&GrayImage::from_fn(48, 48, |x, y| {
            image::Luma([((x * 5 + y * 3) % 256) as u8])
        }))
        .unwrap();
        let a = classifier.predict(&face).unwrap();
        let b = classifier.predict(&face).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_net_record_roundtrip() {
        let dir = std::env::temp_dir().join(format!("emosense-net-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("emotion_model.mpk");

        let net = EmotionNetConfig::new().init::<NdArray>(&NdArrayDevice::Cpu);
        let mut original = NetClassifier::from_net(net.clone());
        net.save(&path).unwrap();

        let mut reloaded = load_classifier(path.to_str().unwrap(), TensorLayout::Nhwc).unwrap();
        let face = black_face();
        let a = original.predict(&face).unwrap();
        let b = reloaded.predict(&face).unwrap();
        for (x, y) in a.values().iter().zip(b.values()) {
            assert!((x - y).abs() < 1e-6);
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_artifact() {
        let result = load_classifier("/nonexistent/model.onnx", TensorLayout::Nhwc);
        assert!(matches!(result, Err(ClassifierError::ArtifactMissing(_))));
    }

    #[test]
    fn test_load_unsupported_extension() {
        let dir = std::env::temp_dir().join(format!("emosense-ext-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.h5");
        std::fs::write(&path, b"not a model").unwrap();

        let result = load_classifier(path.to_str().unwrap(), TensorLayout::Nhwc);
        assert!(matches!(result, Err(ClassifierError::UnsupportedArtifact(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_layout_parse() {
        assert_eq!("NHWC".parse::<TensorLayout>(), Ok(TensorLayout::Nhwc));
        assert_eq!("nchw".parse::<TensorLayout>(), Ok(TensorLayout::Nchw));
        assert!("chw".parse::<TensorLayout>().is_err());
    }
}
