use serde::{Deserialize, Serialize};
use std::fmt;

/// Advice returned for sentinel outcomes and unmapped labels.
pub const NO_ADVICE: &str = "No health tip available";

/// Facial emotion classes, in model output order.
///
/// The classifier's output index maps positionally onto [`EmotionLabel::ALL`],
/// and the training loader derives folder names and label indices from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl EmotionLabel {
    pub const COUNT: usize = 7;

    pub const ALL: [EmotionLabel; Self::COUNT] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
        EmotionLabel::Neutral,
    ];

    /// Position of this label in the model output.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Lowercase name, also used as the dataset folder name.
    pub fn name(self) -> &'static str {
        match self {
            EmotionLabel::Angry => "angry",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Surprise => "surprise",
            EmotionLabel::Neutral => "neutral",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|label| label.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Integer face rectangle, always fully inside the image it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Build a box from detector coordinates, clamped to `img_width` × `img_height`.
    ///
    /// Returns `None` when nothing of the box remains inside the image.
    pub fn clamped(x: i32, y: i32, width: i32, height: i32, img_width: u32, img_height: u32) -> Option<Self> {
        let x0 = x.max(0) as i64;
        let y0 = y.max(0) as i64;
        let x1 = (x as i64 + width as i64).min(img_width as i64);
        let y1 = (y as i64 + height as i64).min(img_height as i64);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// What a detection call produced: an emotion, or one of the sentinel outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Emotion(EmotionLabel),
    NoFace,
    FileNotFound,
    InvalidImage,
    InvalidInput,
}

impl Outcome {
    /// Label text reported to callers.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Emotion(label) => label.name(),
            Outcome::NoFace => "No face detected",
            Outcome::FileNotFound => "File not found",
            Outcome::InvalidImage => "Invalid image",
            Outcome::InvalidInput => "Invalid input",
        }
    }

    pub fn emotion(&self) -> Option<EmotionLabel> {
        match self {
            Outcome::Emotion(label) => Some(*label),
            _ => None,
        }
    }
}

/// Label, confidence and health tip for one detection call.
///
/// Confidence is the raw softmax probability of the chosen label (no
/// calibration, no minimum gate). Sentinel outcomes carry 0.0.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub outcome: Outcome,
    pub confidence: f32,
    pub advice: &'static str,
}

impl DetectionResult {
    pub fn sentinel(outcome: Outcome) -> Self {
        Self {
            outcome,
            confidence: 0.0,
            advice: NO_ADVICE,
        }
    }

    pub fn label(&self) -> &'static str {
        self.outcome.label()
    }

    /// Confidence as a percentage (0–100), the form callers display.
    pub fn confidence_percent(&self) -> f32 {
        self.confidence * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_order_matches_index() {
        for (i, label) in EmotionLabel::ALL.iter().enumerate() {
            assert_eq!(label.index(), i);
            assert_eq!(EmotionLabel::from_index(i), Some(*label));
        }
        assert_eq!(EmotionLabel::from_index(EmotionLabel::COUNT), None);
        assert_eq!(EmotionLabel::ALL[3], EmotionLabel::Happy);
    }

    #[test]
    fn test_label_from_name_case_insensitive() {
        assert_eq!(EmotionLabel::from_name("Happy"), Some(EmotionLabel::Happy));
        assert_eq!(EmotionLabel::from_name("SURPRISE"), Some(EmotionLabel::Surprise));
        assert_eq!(EmotionLabel::from_name(" neutral "), Some(EmotionLabel::Neutral));
        assert_eq!(EmotionLabel::from_name("contempt"), None);
    }

    #[test]
    fn test_bbox_clamped_inside() {
        let b = BoundingBox::clamped(10, 20, 30, 40, 100, 100).unwrap();
        assert_eq!(b, BoundingBox { x: 10, y: 20, width: 30, height: 40 });
        assert_eq!(b.area(), 1200);
    }

    #[test]
    fn test_bbox_clamped_overhang() {
        let b = BoundingBox::clamped(-5, 90, 20, 20, 100, 100).unwrap();
        assert_eq!(b, BoundingBox { x: 0, y: 90, width: 15, height: 10 });
    }

    #[test]
    fn test_bbox_clamped_outside() {
        assert!(BoundingBox::clamped(120, 0, 10, 10, 100, 100).is_none());
        assert!(BoundingBox::clamped(0, 0, 0, 10, 100, 100).is_none());
        assert!(BoundingBox::clamped(-20, -20, 10, 10, 100, 100).is_none());
    }

    #[test]
    fn test_sentinel_result() {
        let r = DetectionResult::sentinel(Outcome::NoFace);
        assert_eq!(r.label(), "No face detected");
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.advice, NO_ADVICE);
        assert_eq!(r.outcome.emotion(), None);
    }
}
