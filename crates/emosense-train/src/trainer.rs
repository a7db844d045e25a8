//! Fit the emotion CNN on labeled folders.
//!
//! load data → build or resume the network → Adam + cross-entropy →
//! augmented, shuffled epochs with validation → final evaluation → save.

use crate::augment::{augment, AugmentConfig};
use crate::dataset::{load_split, DatasetError, LabeledSet};
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::RecorderError;
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor, TensorData};
use emosense_core::net::RECORD_EXTENSION;
use emosense_core::preprocess::normalize;
use emosense_core::{EmotionLabel, EmotionNet, EmotionNetConfig, FACE_SIZE};
use image::GrayImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use thiserror::Error;

type TrainBackend = Autodiff<NdArray>;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("output model {0} is the same file as the base model")]
    SamePath(PathBuf),
    #[error("no training samples found under {0}")]
    EmptyTrainingSet(PathBuf),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("model record: {0}")]
    Record(#[from] RecorderError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Directory holding `train/` and `test/` splits.
    pub data_dir: PathBuf,
    /// Weights to resume from, if the file exists.
    pub base_model: PathBuf,
    pub output_model: PathBuf,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub augment: AugmentConfig,
}

impl TrainConfig {
    pub fn new(data_dir: PathBuf, base_model: PathBuf, output_model: PathBuf) -> Self {
        Self {
            data_dir,
            base_model,
            output_model,
            epochs: 50,
            batch_size: 32,
            learning_rate: 1e-4,
            seed: 42,
            augment: AugmentConfig::default(),
        }
    }

    fn validate(&self) -> Result<(), TrainError> {
        if self.batch_size == 0 {
            return Err(TrainError::InvalidConfig("batch size must be positive".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(TrainError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if same_file(&record_path(&self.base_model), &record_path(&self.output_model)) {
            return Err(TrainError::SamePath(self.output_model.clone()));
        }
        Ok(())
    }
}

/// Loss and accuracy over one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub loss: f64,
    /// Fraction correct, 0–1.
    pub accuracy: f64,
}

#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: usize,
    pub train: Metrics,
    /// `None` when the test split is empty.
    pub test: Option<Metrics>,
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub epochs: Vec<EpochReport>,
    pub test: Option<Metrics>,
    pub resumed: bool,
    pub missing_train_labels: Vec<EmotionLabel>,
    pub missing_test_labels: Vec<EmotionLabel>,
    /// Where the weights were written.
    pub output_model: PathBuf,
}

/// Run a full training job.
pub fn train(config: &TrainConfig) -> Result<TrainReport, TrainError> {
    config.validate()?;

    let train_dir = config.data_dir.join("train");
    let test_dir = config.data_dir.join("test");
    let train_set = load_split(&train_dir)?;
    let test_set = load_split(&test_dir)?;

    if train_set.is_empty() {
        return Err(TrainError::EmptyTrainingSet(train_dir));
    }
    if test_set.is_empty() {
        tracing::warn!(dir = %test_dir.display(), "test split is empty; validation is skipped");
    }
    tracing::info!(
        train = train_set.len(),
        test = test_set.len(),
        counts = ?train_set.class_counts(),
        "data loaded"
    );

    let device = NdArrayDevice::Cpu;
    TrainBackend::seed(config.seed);

    let mut model = EmotionNetConfig::new().init::<TrainBackend>(&device);
    let base_model = record_path(&config.base_model);
    let resumed = base_model.is_file();
    if resumed {
        model = model.load(&base_model, &device)?;
        tracing::info!(path = %base_model.display(), "resuming from base model");
    } else {
        tracing::info!(path = %base_model.display(), "no base model, starting fresh");
    }

    let mut optim = AdamConfig::new().init::<TrainBackend, EmotionNet<TrainBackend>>();
    let loss_fn = CrossEntropyLossConfig::new().init::<TrainBackend>(&device);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut order: Vec<usize> = (0..train_set.len()).collect();
    let mut epochs = Vec::with_capacity(config.epochs);

    for epoch in 1..=config.epochs {
        order.shuffle(&mut rng);

        let mut loss_sum = 0.0;
        let mut correct = 0usize;

        for chunk in order.chunks(config.batch_size) {
            let images: Vec<GrayImage> = chunk
                .iter()
                .map(|&i| augment(&train_set.images[i], &config.augment, &mut rng))
                .collect();
            let labels: Vec<usize> = chunk.iter().map(|&i| train_set.labels[i]).collect();

            let input = image_batch::<TrainBackend>(&images, &device);
            let targets = label_batch::<TrainBackend>(&labels, &device);

            let logits = model.forward(input);
            let loss = loss_fn.forward(logits.clone(), targets.clone());

            loss_sum += loss.clone().into_scalar().elem::<f64>() * chunk.len() as f64;
            correct += count_correct(logits, targets);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(config.learning_rate, model, grads);
        }

        let train_metrics = Metrics {
            loss: loss_sum / train_set.len() as f64,
            accuracy: correct as f64 / train_set.len() as f64,
        };
        let test_metrics = evaluate(&model.valid(), &test_set, config.batch_size, &device);

        tracing::info!(
            epoch,
            of = config.epochs,
            loss = train_metrics.loss,
            accuracy = train_metrics.accuracy,
            val_loss = test_metrics.map(|m| m.loss),
            val_accuracy = test_metrics.map(|m| m.accuracy),
            "epoch finished"
        );
        epochs.push(EpochReport {
            epoch,
            train: train_metrics,
            test: test_metrics,
        });
    }

    let model = model.valid();
    let test = evaluate(&model, &test_set, config.batch_size, &device);
    match test {
        Some(m) => tracing::info!(
            loss = m.loss,
            "test accuracy: {:.2}%",
            m.accuracy * 100.0
        ),
        None => tracing::warn!("no test samples; final evaluation skipped"),
    }

    let output_model = record_path(&config.output_model);
    if let Some(parent) = output_model.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    model.save(&output_model)?;
    tracing::info!(path = %output_model.display(), "model saved");

    Ok(TrainReport {
        epochs,
        test,
        resumed,
        missing_train_labels: train_set.missing,
        missing_test_labels: test_set.missing,
        output_model,
    })
}

/// Un-augmented evaluation in fixed order.
fn evaluate<B: Backend>(
    model: &EmotionNet<B>,
    set: &LabeledSet,
    batch_size: usize,
    device: &B::Device,
) -> Option<Metrics> {
    if set.is_empty() {
        return None;
    }

    let loss_fn = CrossEntropyLossConfig::new().init::<B>(device);
    let mut loss_sum = 0.0;
    let mut correct = 0usize;

    for (images, labels) in set
        .images
        .chunks(batch_size)
        .zip(set.labels.chunks(batch_size))
    {
        let input = image_batch::<B>(images, device);
        let targets = label_batch::<B>(labels, device);
        let logits = model.forward(input);
        let loss = loss_fn.forward(logits.clone(), targets.clone());

        loss_sum += loss.into_scalar().elem::<f64>() * images.len() as f64;
        correct += count_correct(logits, targets);
    }

    Some(Metrics {
        loss: loss_sum / set.len() as f64,
        accuracy: correct as f64 / set.len() as f64,
    })
}

/// 48×48 grayscale images → NCHW `[n, 1, 48, 48]` in [0, 1].
fn image_batch<B: Backend>(images: &[GrayImage], device: &B::Device) -> Tensor<B, 4> {
    let mut values = Vec::with_capacity(images.len() * FACE_SIZE * FACE_SIZE);
    for img in images {
        values.extend(normalize(img.as_raw()));
    }
    let data = TensorData::new(values, [images.len(), 1, FACE_SIZE, FACE_SIZE]);
    Tensor::from_data(data, device)
}

fn label_batch<B: Backend>(labels: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
    Tensor::from_data(TensorData::new(values, [labels.len()]), device)
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predicted = logits.argmax(1).squeeze::<1>(1);
    predicted
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

/// The path the recorder will actually write.
fn record_path(path: &Path) -> PathBuf {
    path.with_extension(RECORD_EXTENSION)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emosense_core::{EmotionClassifier, FaceTensor, NetClassifier};
    use image::Luma;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("emosense-train-{}", uuid::Uuid::new_v4()))
    }

    fn populate(split: &Path, labels: &[EmotionLabel], per_label: usize) {
        for &label in labels {
            let dir = split.join(label.name());
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..per_label {
                let value = (label.index() * 30 + i * 3) as u8;
                GrayImage::from_pixel(48, 48, Luma([value]))
                    .save(dir.join(format!("{i}.png")))
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_same_path_rejected_before_loading() {
        let mut config = TrainConfig::new(
            PathBuf::from("/nonexistent/data"),
            PathBuf::from("/tmp/model.mpk"),
            PathBuf::from("/tmp/model.mpk"),
        );
        assert!(matches!(train(&config), Err(TrainError::SamePath(_))));

        // The recorder appends the extension, so this collides too.
        config.output_model = PathBuf::from("/tmp/model");
        assert!(matches!(train(&config), Err(TrainError::SamePath(_))));

        config.base_model = PathBuf::from("/tmp/model");
        config.output_model = PathBuf::from("/tmp/model.mpk");
        assert!(matches!(train(&config), Err(TrainError::SamePath(_))));
    }

    #[test]
    fn test_empty_training_set_is_fatal() {
        let root = temp_dir();
        std::fs::create_dir_all(root.join("train")).unwrap();
        let config = TrainConfig::new(root.clone(), root.join("base.mpk"), root.join("out.mpk"));
        assert!(matches!(train(&config), Err(TrainError::EmptyTrainingSet(_))));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = TrainConfig::new(
            PathBuf::from("/nonexistent"),
            PathBuf::from("a.mpk"),
            PathBuf::from("b.mpk"),
        );
        config.batch_size = 0;
        assert!(matches!(train(&config), Err(TrainError::InvalidConfig(_))));
    }

    #[test]
    fn test_train_saves_loadable_model() {
        let root = temp_dir();
        let present = [
            EmotionLabel::Angry,
            EmotionLabel::Happy,
            EmotionLabel::Sad,
            EmotionLabel::Surprise,
            EmotionLabel::Neutral,
        ];
        populate(&root.join("train"), &present, 3);
        populate(&root.join("test"), &present, 1);

        let mut config =
            TrainConfig::new(root.clone(), root.join("base.mpk"), root.join("out/model.mpk"));
        config.epochs = 2;
        config.batch_size = 4;

        let report = train(&config).unwrap();
        assert!(!report.resumed);
        assert_eq!(report.epochs.len(), 2);
        assert_eq!(
            report.missing_train_labels,
            vec![EmotionLabel::Disgust, EmotionLabel::Fear]
        );
        let test = report.test.unwrap();
        assert!(test.loss.is_finite());
        assert!((0.0..=1.0).contains(&test.accuracy));
        assert!(report.output_model.exists());

        // The serving classifier reads what the trainer writes.
        let mut classifier =
            NetClassifier::load(&report.output_model.to_string_lossy()).unwrap();
        let face = FaceTensor::from_gray48(&GrayImage::from_pixel(48, 48, Luma([90]))).unwrap();
        let scores = classifier.predict(&face).unwrap();
        let sum: f32 = scores.values().iter().sum();
        assert!((sum - 1.0).abs() < 1e-3);

        // Resuming from the trained weights.
        let mut resume = config.clone();
        resume.base_model = report.output_model.clone();
        resume.output_model = root.join("out/model_2.mpk");
        resume.epochs = 1;
        let report = train(&resume).unwrap();
        assert!(report.resumed);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_resume_from_stem_without_extension() {
        let root = temp_dir();
        let present = [EmotionLabel::Happy, EmotionLabel::Sad];
        populate(&root.join("train"), &present, 2);

        let mut config = TrainConfig::new(root.clone(), root.join("none"), root.join("first"));
        config.epochs = 1;
        config.batch_size = 4;
        config.augment = AugmentConfig::none();

        let first = train(&config).unwrap();
        assert_eq!(first.output_model, root.join("first.mpk"));
        assert!(!first.resumed);

        config.base_model = root.join("first");
        config.output_model = root.join("second");
        let second = train(&config).unwrap();
        assert!(second.resumed);
        assert_eq!(second.output_model, root.join("second.mpk"));

        std::fs::remove_dir_all(&root).ok();
    }
}
