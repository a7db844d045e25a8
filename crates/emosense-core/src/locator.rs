//! Face location via the SeetaFace funnel-structured cascade (`rustface`).
//!
//! The cascade scans a multi-scale image pyramid with a sliding window and
//! merges overlapping windows internally. Only the largest face is kept.

use crate::types::BoundingBox;
use image::GrayImage;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

// --- Cascade parameters ---
const CASCADE_SCALE_FACTOR: f32 = 1.3;
const CASCADE_MIN_FACE_SIZE: u32 = 20;
const CASCADE_SCORE_THRESHOLD: f64 = 2.0;
const CASCADE_WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("cascade model not found: {0} — place seeta_fd_frontal_v1.0.bin in the model directory")]
    ModelNotFound(String),
    #[error("failed to read cascade model {path}: {reason}")]
    InvalidModel { path: String, reason: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Finds the most prominent face in a grayscale image.
///
/// Absence of a face is a normal outcome, so this never fails.
pub trait FaceLocator: Send {
    fn locate(&mut self, gray: &GrayImage) -> Option<BoundingBox>;
}

/// Tunables for the cascade scan.
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Size ratio between pyramid levels (1.3 = each level 1/1.3 of the previous).
    pub scale_factor: f32,
    pub min_face_size: u32,
    pub score_threshold: f64,
    pub window_step: u32,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            scale_factor: CASCADE_SCALE_FACTOR,
            min_face_size: CASCADE_MIN_FACE_SIZE,
            score_threshold: CASCADE_SCORE_THRESHOLD,
            window_step: CASCADE_WINDOW_STEP,
        }
    }
}

/// `rustface`-backed locator. The model is read once; a detector is built per call.
pub struct CascadeLocator {
    model: rustface::Model,
    config: LocatorConfig,
}

impl CascadeLocator {
    /// Load the SeetaFace cascade model from the given path.
    pub fn load(model_path: &str, config: LocatorConfig) -> Result<Self, LocatorError> {
        if !Path::new(model_path).exists() {
            return Err(LocatorError::ModelNotFound(model_path.to_string()));
        }

        let reader = BufReader::new(File::open(model_path)?);
        let model = rustface::read_model(reader).map_err(|e| LocatorError::InvalidModel {
            path: model_path.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(
            path = model_path,
            scale_factor = config.scale_factor,
            min_face_size = config.min_face_size,
            "loaded face cascade"
        );

        Ok(Self { model, config })
    }

    /// Run the cascade and return every candidate, clamped to the image.
    pub fn candidates(&self, gray: &GrayImage) -> Vec<BoundingBox> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.config.min_face_size);
        detector.set_score_thresh(self.config.score_threshold);
        detector.set_pyramid_scale_factor(pyramid_step(self.config.scale_factor));
        detector.set_slide_window_step(self.config.window_step, self.config.window_step);

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));

        faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                BoundingBox::clamped(
                    bbox.x(),
                    bbox.y(),
                    bbox.width() as i32,
                    bbox.height() as i32,
                    width,
                    height,
                )
            })
            .collect()
    }
}

impl FaceLocator for CascadeLocator {
    fn locate(&mut self, gray: &GrayImage) -> Option<BoundingBox> {
        let candidates = self.candidates(gray);
        tracing::debug!(count = candidates.len(), "cascade candidates");
        select_largest(&candidates)
    }
}

/// Convert a growth factor (> 1) into the pyramid shrink step `rustface` expects.
fn pyramid_step(scale_factor: f32) -> f32 {
    if scale_factor > 1.0 {
        (1.0 / scale_factor).clamp(0.01, 0.99)
    } else {
        0.8
    }
}

/// Pick the candidate with the largest area. Ties keep the earliest candidate.
pub fn select_largest(candidates: &[BoundingBox]) -> Option<BoundingBox> {
    let mut best: Option<BoundingBox> = None;
    for candidate in candidates {
        match best {
            Some(b) if candidate.area() <= b.area() => {}
            _ => best = Some(*candidate),
        }
    }
    best
}
