//! The three classifiers the pipeline runs on every page

use serde::{Deserialize, Serialize};

/// Model kinds in registry load order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Symbol OCR: 24x24 grayscale crop, 71 symbol classes
    Ocr,
    /// Key signature type: 30x15 crop, classes None/Sharps/Flats
    KeySigType,
    /// Key signature accidental count: 30x27 crop, 0-10 accidentals
    KeySigDigitCount,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Ocr, ModelKind::KeySigType, ModelKind::KeySigDigitCount];

    /// Per-sample input shape `[height, width, channels]`
    pub fn input_shape(self) -> [usize; 3] {
        match self {
            ModelKind::Ocr => [24, 24, 1],
            ModelKind::KeySigType => [30, 15, 1],
            ModelKind::KeySigDigitCount => [30, 27, 1],
        }
    }

    pub fn class_count(self) -> usize {
        match self {
            ModelKind::Ocr => 71,
            ModelKind::KeySigType => KEY_SIGNATURE_TYPES.len(),
            ModelKind::KeySigDigitCount => 11,
        }
    }

    /// Artifact file name used when none is configured
    pub fn default_artifact_file(self) -> &'static str {
        match self {
            ModelKind::Ocr => "ocr_model.json",
            ModelKind::KeySigType => "keySignatures_c_model.json",
            ModelKind::KeySigDigitCount => "keySignatures_digit_model.json",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Ocr => write!(f, "OCR"),
            ModelKind::KeySigType => write!(f, "KeySigType"),
            ModelKind::KeySigDigitCount => write!(f, "KeySigDigitCount"),
        }
    }
}

pub const KEY_SIGNATURE_TYPES: [&str; 3] = ["None", "Sharps", "Flats"];

/// Label for a key-signature type class index
pub fn key_signature_type_name(class_index: usize) -> &'static str {
    KEY_SIGNATURE_TYPES.get(class_index).copied().unwrap_or("Unknown")
}
