//! Static health tips, keyed by emotion.

use crate::types::{EmotionLabel, NO_ADVICE};

/// Health tip for a classified emotion. Every label has an entry.
pub fn advice_for(label: EmotionLabel) -> &'static str {
    match label {
        EmotionLabel::Happy => "Keep smiling! Laughter is the best medicine.",
        EmotionLabel::Sad => "Engage in activities you enjoy or talk to someone.",
        EmotionLabel::Angry => "Take a deep breath. Try a relaxation technique.",
        EmotionLabel::Fear => "Practice deep breathing to calm your mind.",
        EmotionLabel::Surprise => "Enjoy the moment! Surprise can be positive too.",
        EmotionLabel::Neutral => "Stay relaxed and keep maintaining a balanced mood.",
        EmotionLabel::Disgust => "Take a walk or distract yourself with something positive.",
    }
}

/// Health tip for a free-text label, as supplied by external callers.
///
/// Falls back to [`NO_ADVICE`] for anything that is not an emotion name.
pub fn advice_for_name(name: &str) -> &'static str {
    EmotionLabel::from_name(name).map_or(NO_ADVICE, advice_for)
}
