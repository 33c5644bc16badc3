//! Confidence statistics over a batch of pages

use crate::models::inference::round1;
use crate::types::page::{PagePredictions, PageRecord};
use serde::Serialize;

/// Summary of a batch, always derived from the current page records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub processed_count: usize,
    pub avg_ocr_confidence: f64,
    pub avg_key_sig_type_confidence: f64,
    pub avg_digit_confidence: f64,
}

/// Computes batch statistics
pub struct StatsAggregator;

impl StatsAggregator {
    /// Recompute statistics from scratch. An empty batch has no stats.
    ///
    /// Averages cover processed pages only and are rounded to one decimal;
    /// with nothing processed they are zero.
    pub fn compute(pages: &[PageRecord]) -> Option<BatchStats> {
        if pages.is_empty() {
            return None;
        }

        let processed: Vec<&PagePredictions> = pages
            .iter()
            .filter_map(|page| page.predictions.as_ref())
            .collect();

        let mean = |select: fn(&PagePredictions) -> f64| -> f64 {
            if processed.is_empty() {
                return 0.0;
            }
            round1(processed.iter().map(|p| select(p)).sum::<f64>() / processed.len() as f64)
        };

        Some(BatchStats {
            total: pages.len(),
            processed_count: processed.len(),
            avg_ocr_confidence: mean(|p| p.ocr.confidence),
            avg_key_sig_type_confidence: mean(|p| p.key_sig_type.confidence),
            avg_digit_confidence: mean(|p| p.key_sig_digit_count.confidence),
        })
    }
}
