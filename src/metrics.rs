//! Latency tracking for validation runs.

use crate::models::ModelKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for a validation session
pub struct ValidationMetrics {
    /// Pages that finished all three inferences
    pub pages_processed: AtomicU64,
    /// Pages that failed in any stage
    pub pages_failed: AtomicU64,
    /// Pages skipped because they were already processed
    pub pages_skipped: AtomicU64,
    /// Page processing times (in microseconds)
    page_times: RwLock<Vec<u64>>,
    /// Model inference times (in microseconds)
    model_times: RwLock<HashMap<ModelKind, Vec<u64>>>,
    start_time: Instant,
}

impl ValidationMetrics {
    pub fn new() -> Self {
        Self {
            pages_processed: AtomicU64::new(0),
            pages_failed: AtomicU64::new(0),
            pages_skipped: AtomicU64::new(0),
            page_times: RwLock::new(Vec::new()),
            model_times: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn record_page(&self, processing_time: Duration) {
        self.pages_processed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut times) = self.page_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only last 10000 for memory efficiency
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }
    }

    pub fn record_failure(&self) {
        self.pages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.pages_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record model inference time
    pub fn record_model_time(&self, model: ModelKind, duration: Duration) {
        if let Ok(mut times) = self.model_times.write() {
            let model_times = times.entry(model).or_insert_with(Vec::new);
            model_times.push(duration.as_micros() as u64);
            // Keep only last 1000 per model
            if model_times.len() > 1000 {
                model_times.drain(0..500);
            }
        }
    }

    /// Page latency statistics
    pub fn get_page_stats(&self) -> LatencyStats {
        self.page_times
            .read()
            .map(|times| LatencyStats::from_samples(&times))
            .unwrap_or_default()
    }

    /// Inference latency per model
    pub fn get_model_stats(&self) -> HashMap<ModelKind, LatencyStats> {
        let Ok(times) = self.model_times.read() else {
            return HashMap::new();
        };
        times
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(model, samples)| (*model, LatencyStats::from_samples(samples)))
            .collect()
    }

    /// Pages per second since the collector was created
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.pages_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let processed = self.pages_processed.load(Ordering::Relaxed);
        let failed = self.pages_failed.load(Ordering::Relaxed);
        let skipped = self.pages_skipped.load(Ordering::Relaxed);
        let pages = self.get_page_stats();

        info!(
            processed,
            failed,
            skipped,
            throughput = format!("{:.2} pages/s", self.get_throughput()),
            mean_us = pages.mean_us,
            p50_us = pages.p50_us,
            max_us = pages.max_us,
            "Validation metrics"
        );

        for model in ModelKind::ALL {
            if let Some(stats) = self.get_model_stats().get(&model) {
                info!(
                    model = %model,
                    calls = stats.count,
                    mean_us = stats.mean_us,
                    p50_us = stats.p50_us,
                    p99_us = stats.p99_us,
                    "Model inference time"
                );
            }
        }
    }
}

impl Default for ValidationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics in microseconds
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl LatencyStats {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let count = sorted.len();

        Self {
            count: count as u64,
            mean_us: sorted.iter().sum::<u64>() / count as u64,
            p50_us: sorted[count / 2],
            p99_us: sorted[((count as f64 * 0.99) as usize).min(count - 1)],
            max_us: sorted[count - 1],
        }
    }
}
