//! Page records of a validation batch

use crate::models::inference::PredictionResult;
use crate::models::kind::key_signature_type_name;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Results of the three classifiers for one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagePredictions {
    pub ocr: PredictionResult,
    pub key_sig_type: PredictionResult,
    pub key_sig_digit_count: PredictionResult,
}

impl PagePredictions {
    /// "None", "Sharps" or "Flats"
    pub fn key_signature_name(&self) -> &'static str {
        key_signature_type_name(self.key_sig_type.class_index)
    }

    /// Number of accidentals in the key signature
    pub fn accidental_count(&self) -> usize {
        self.key_sig_digit_count.class_index
    }
}

/// One page of a validation batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    /// `<set id>-<index>`
    pub id: String,
    pub index: usize,
    /// Scanned sheet image
    pub background: PathBuf,
    /// Annotation overlay image
    pub overlay: PathBuf,
    pub predictions: Option<PagePredictions>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

impl PageRecord {
    pub fn new(set_id: &str, index: usize, background: PathBuf, overlay: PathBuf) -> Self {
        Self {
            id: format!("{}-{}", set_id, index),
            index,
            background,
            overlay,
            predictions: None,
            processed: false,
            processed_at: None,
        }
    }

    /// Store predictions and mark the page processed
    pub fn complete(&mut self, predictions: PagePredictions) {
        self.predictions = Some(predictions);
        self.processed = true;
        self.processed_at = Some(Utc::now());
    }

    pub fn is_processed(&self) -> bool {
        self.processed || self.predictions.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::inference::ClassScore;

    fn prediction(class_index: usize, confidence: f64) -> PredictionResult {
        PredictionResult {
            class_index,
            confidence,
            top_k: vec![ClassScore {
                class_index,
                confidence,
            }],
        }
    }

    #[test]
    fn test_complete_marks_processed() {
        let mut page = PageRecord::new("turkish_march", 1, "bg.jpeg".into(), "ov.png".into());
        assert_eq!(page.id, "turkish_march-1");
        assert!(!page.is_processed());

        page.complete(PagePredictions {
            ocr: prediction(12, 91.5),
            key_sig_type: prediction(1, 80.0),
            key_sig_digit_count: prediction(3, 70.0),
        });

        assert!(page.processed);
        assert!(page.processed_at.is_some());
        let predictions = page.predictions.as_ref().unwrap();
        assert_eq!(predictions.key_signature_name(), "Sharps");
        assert_eq!(predictions.accidental_count(), 3);
    }

    #[test]
    fn test_page_record_serialization() {
        let page = PageRecord::new("pages_36", 0, "a.jpeg".into(), "b.png".into());
        let json = serde_json::to_string(&page).unwrap();
        let deserialized: PageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(page, deserialized);
    }
}
