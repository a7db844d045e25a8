//! Locate → preprocess → classify → advise.

use crate::advice::advice_for;
use crate::classifier::{ClassifierError, EmotionClassifier};
use crate::locator::FaceLocator;
use crate::preprocess;
use crate::types::{DetectionResult, Outcome};
use image::DynamicImage;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Where the image comes from. Resolved once, before any detection runs.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Image file on disk.
    Path(PathBuf),
    /// Encoded image bytes (JPEG, PNG, ...).
    Bytes(Vec<u8>),
    /// Already-decoded image, e.g. a camera frame.
    Image(DynamicImage),
}

impl ImageInput {
    /// Decode into an image, or the sentinel outcome describing why not.
    pub fn resolve(self) -> Result<DynamicImage, Outcome> {
        let image = match self {
            ImageInput::Path(path) => {
                if !path.exists() {
                    tracing::warn!(path = %path.display(), "image file not found");
                    return Err(Outcome::FileNotFound);
                }
                image::open(&path).map_err(|e| {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read image");
                    Outcome::InvalidImage
                })?
            }
            ImageInput::Bytes(bytes) => image::load_from_memory(&bytes).map_err(|e| {
                tracing::warn!(len = bytes.len(), error = %e, "failed to decode image bytes");
                Outcome::InvalidImage
            })?,
            ImageInput::Image(image) => image,
        };

        if image.width() == 0 || image.height() == 0 {
            tracing::warn!("empty image");
            return Err(Outcome::InvalidInput);
        }

        Ok(image)
    }
}

/// Face locator and classifier, owned together.
///
/// Built once at startup. Only classifier runtime failures are errors; bad
/// input and missing faces come back as sentinel results.
pub struct InferencePipeline {
    locator: Box<dyn FaceLocator>,
    classifier: Box<dyn EmotionClassifier>,
}

impl InferencePipeline {
    pub fn new(locator: Box<dyn FaceLocator>, classifier: Box<dyn EmotionClassifier>) -> Self {
        Self { locator, classifier }
    }

    /// Detect the emotion for any input.
    pub fn detect(&mut self, input: ImageInput) -> Result<DetectionResult, PipelineError> {
        match input.resolve() {
            Ok(image) => self.detect_image(&image),
            Err(outcome) => Ok(DetectionResult::sentinel(outcome)),
        }
    }

    /// Detect the emotion in a decoded image (colour or gray).
    pub fn detect_image(&mut self, image: &DynamicImage) -> Result<DetectionResult, PipelineError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(DetectionResult::sentinel(Outcome::InvalidInput));
        }

        let gray = image.to_luma8();
        let Some(bbox) = self.locator.locate(&gray) else {
            tracing::debug!("no face detected");
            return Ok(DetectionResult::sentinel(Outcome::NoFace));
        };

        let face = preprocess::extract(&gray, &bbox);
        let scores = self.classifier.predict(&face)?;
        let (label, confidence) = scores.top();

        tracing::info!(
            emotion = %label,
            confidence,
            x = bbox.x,
            y = bbox.y,
            width = bbox.width,
            height = bbox.height,
            "emotion detected"
        );

        Ok(DetectionResult {
            outcome: Outcome::Emotion(label),
            confidence,
            advice: advice_for(label),
        })
    }
}
