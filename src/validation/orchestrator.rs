//! Page and batch sequencing of preprocessing and inference

use crate::error::{NoteScanError, PageStage, Result};
use crate::metrics::ValidationMetrics;
use crate::models::inference::{InferenceEngine, ModelSource, PredictionResult};
use crate::models::ModelKind;
use crate::preprocess::Preprocessor;
use crate::types::page::{PagePredictions, PageRecord};
use crate::validation::stats::{BatchStats, StatsAggregator};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Behaviour when a page fails inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop the batch and return the first error
    #[default]
    Abort,
    /// Log the failure and continue with the next page
    Skip,
}

/// Where and how a batch run starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Index of the first page to consider
    pub start: usize,
    /// Leave pages that already have predictions alone
    pub resume: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            start: 0,
            resume: true,
        }
    }
}

/// A page that failed under [`ErrorPolicy::Skip`]
#[derive(Debug)]
pub struct PageFailure {
    pub page_id: String,
    pub error: NoteScanError,
}

/// Result of a batch run
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Statistics over the whole page set, `None` for an empty set
    pub stats: Option<BatchStats>,
    pub processed: usize,
    pub skipped: usize,
    pub failures: Vec<PageFailure>,
}

/// Runs the three classifiers over pages, one page at a time
pub struct ValidationOrchestrator<'a, S, P> {
    models: &'a S,
    preprocessor: &'a P,
    engine: InferenceEngine,
    page_timeout: Option<Duration>,
    on_error: ErrorPolicy,
    metrics: Option<Arc<ValidationMetrics>>,
}

impl<'a, S: ModelSource, P: Preprocessor> ValidationOrchestrator<'a, S, P> {
    pub fn new(models: &'a S, preprocessor: &'a P, engine: InferenceEngine) -> Self {
        Self {
            models,
            preprocessor,
            engine,
            page_timeout: None,
            on_error: ErrorPolicy::Abort,
            metrics: None,
        }
    }

    /// Deadline for one page; zero disables it
    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn with_error_policy(mut self, on_error: ErrorPolicy) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ValidationMetrics>) -> Self {
        self.engine = self.engine.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    /// Run preprocessing and all three models on one page and store the
    /// predictions on it. The page is left unchanged on failure.
    ///
    /// With a page timeout set, awaits are cut off at the deadline and the
    /// elapsed time is checked again after every forward pass, so a page that
    /// overruns is a `Timeout` even when no await was pending.
    pub async fn process_page<'p>(&self, page: &'p mut PageRecord) -> Result<&'p PageRecord> {
        let start = Instant::now();

        let predictions = match self.page_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.predict_page(page, Some(start)))
                .await
                .map_err(|_| self.timeout_error(page, timeout))??,
            None => self.predict_page(page, None).await?,
        };

        info!(
            page = %page.id,
            symbol = predictions.ocr.class_index,
            symbol_confidence = predictions.ocr.confidence,
            key_signature = predictions.key_signature_name(),
            accidentals = predictions.accidental_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Page processed"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_page(start.elapsed());
        }

        page.complete(predictions);
        Ok(&*page)
    }

    async fn predict_page(&self, page: &PageRecord, started: Option<Instant>) -> Result<PagePredictions> {
        let ocr = self.classify(page, ModelKind::Ocr).await?;
        self.check_deadline(page, started)?;
        let key_sig_type = self.classify(page, ModelKind::KeySigType).await?;
        self.check_deadline(page, started)?;
        let key_sig_digit_count = self.classify(page, ModelKind::KeySigDigitCount).await?;
        self.check_deadline(page, started)?;

        Ok(PagePredictions {
            ocr,
            key_sig_type,
            key_sig_digit_count,
        })
    }

    /// Forward passes run inline, so the timer cannot fire during one
    fn check_deadline(&self, page: &PageRecord, started: Option<Instant>) -> Result<()> {
        match (self.page_timeout, started) {
            (Some(timeout), Some(started)) if started.elapsed() > timeout => {
                warn!(page = %page.id, elapsed_ms = started.elapsed().as_millis() as u64, "Page deadline exceeded");
                Err(self.timeout_error(page, timeout))
            }
            _ => Ok(()),
        }
    }

    fn timeout_error(&self, page: &PageRecord, timeout: Duration) -> NoteScanError {
        NoteScanError::Timeout {
            page_id: page.id.clone(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    async fn classify(&self, page: &PageRecord, kind: ModelKind) -> Result<PredictionResult> {
        let input = self
            .preprocessor
            .preprocess(&page.background, kind)
            .await
            .map_err(|e| e.at_page(&page.id, PageStage::Preprocess))?;

        let result = self
            .engine
            .infer_with(self.models, kind, &input)
            .map_err(|e| e.at_page(&page.id, PageStage::Infer));
        drop(input);
        result
    }

    /// Process pages in index order from `options.start`.
    ///
    /// After every processed page the statistics over the full page set are
    /// recomputed and handed to `on_progress`. Under [`ErrorPolicy::Abort`]
    /// the first failing page ends the batch with its error.
    pub async fn process_batch<F>(
        &self,
        pages: &mut [PageRecord],
        options: BatchOptions,
        mut on_progress: F,
    ) -> Result<BatchSummary>
    where
        F: FnMut(&PageRecord, &BatchStats),
    {
        let mut summary = BatchSummary::default();
        let total = pages.len();

        info!(
            pages = total,
            start = options.start,
            resume = options.resume,
            policy = ?self.on_error,
            "Starting batch"
        );

        for index in options.start..total {
            if options.resume && pages[index].is_processed() {
                debug!(page = %pages[index].id, "Already processed, skipping");
                summary.skipped += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.record_skip();
                }
                continue;
            }

            let outcome = self.process_page(&mut pages[index]).await.map(|_| ());
            if let Err(e) = outcome {
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure();
                }
                match self.on_error {
                    ErrorPolicy::Abort => {
                        error!(page = %pages[index].id, index, error = %e, "Page failed, aborting batch");
                        return Err(e);
                    }
                    ErrorPolicy::Skip => {
                        warn!(page = %pages[index].id, index, error = %e, "Page failed, continuing");
                        summary.failures.push(PageFailure {
                            page_id: pages[index].id.clone(),
                            error: e,
                        });
                        continue;
                    }
                }
            }

            summary.processed += 1;
            if let Some(stats) = StatsAggregator::compute(pages) {
                info!(
                    processed = stats.processed_count,
                    total = stats.total,
                    avg_ocr = stats.avg_ocr_confidence,
                    avg_key_sig = stats.avg_key_sig_type_confidence,
                    avg_digit = stats.avg_digit_confidence,
                    "Progress statistics"
                );
                on_progress(&pages[index], &stats);
            }
        }

        summary.stats = StatsAggregator::compute(pages);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::graph::{ForwardError, Tensor};
    use crate::models::inference::Classifier;
    use ndarray::IxDyn;
    use std::cell::Cell;
    use std::path::Path;

    struct StubModel {
        kind: ModelKind,
        output: Vec<f32>,
        delay: Duration,
        calls: Cell<usize>,
    }

    impl Classifier for StubModel {
        fn kind(&self) -> ModelKind {
            self.kind
        }

        fn forward(&self, _input: &Tensor) -> std::result::Result<Vec<f32>, ForwardError> {
            self.calls.set(self.calls.get() + 1);
            std::thread::sleep(self.delay);
            Ok(self.output.clone())
        }
    }

    struct StubModels {
        models: Vec<StubModel>,
    }

    impl StubModels {
        fn new() -> Self {
            let outputs = [vec![0.1, 0.9], vec![0.2, 0.8, 0.0], vec![0.3, 0.7]];
            Self {
                models: ModelKind::ALL
                    .iter()
                    .zip(outputs)
                    .map(|(kind, output)| StubModel {
                        kind: *kind,
                        output,
                        delay: Duration::ZERO,
                        calls: Cell::new(0),
                    })
                    .collect(),
            }
        }

        /// Every forward pass blocks the thread for `delay`
        fn slow(delay: Duration) -> Self {
            let mut models = Self::new();
            for model in &mut models.models {
                model.delay = delay;
            }
            models
        }

        fn calls(&self) -> usize {
            self.models.iter().map(|m| m.calls.get()).sum()
        }
    }

    impl ModelSource for StubModels {
        type Model = StubModel;

        fn model(&self, kind: ModelKind) -> Result<&StubModel> {
            self.models
                .iter()
                .find(|m| m.kind == kind)
                .ok_or(NoteScanError::ModelNotInitialized(kind))
        }
    }

    /// Fails for backgrounds named `broken.png`
    struct StubPreprocessor;

    impl Preprocessor for StubPreprocessor {
        async fn preprocess(&self, image: &Path, kind: ModelKind) -> Result<Tensor> {
            if image.ends_with("broken.png") {
                return Err(NoteScanError::AssetLoad {
                    path: image.to_path_buf(),
                    message: "unreadable".to_string(),
                });
            }
            let [h, w, c] = kind.input_shape();
            Ok(Tensor::zeros(IxDyn(&[1, h, w, c])))
        }
    }

    fn pages(backgrounds: &[&str]) -> Vec<PageRecord> {
        backgrounds
            .iter()
            .enumerate()
            .map(|(i, bg)| PageRecord::new("set", i, bg.into(), "overlay.png".into()))
            .collect()
    }

    #[tokio::test]
    async fn test_process_page_fills_predictions() {
        let models = StubModels::new();
        let orchestrator = ValidationOrchestrator::new(&models, &StubPreprocessor, InferenceEngine::new(2));
        let mut page = pages(&["a.png"]).remove(0);

        let page = orchestrator.process_page(&mut page).await.unwrap();
        assert!(page.processed);
        let predictions = page.predictions.as_ref().unwrap();
        assert_eq!(predictions.ocr.class_index, 1);
        assert_eq!(predictions.ocr.confidence, 90.0);
        assert_eq!(predictions.key_signature_name(), "Sharps");
        assert_eq!(predictions.accidental_count(), 1);
        assert_eq!(models.calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_page_reports_stage() {
        let models = StubModels::new();
        let orchestrator = ValidationOrchestrator::new(&models, &StubPreprocessor, InferenceEngine::default());
        let mut page = pages(&["broken.png"]).remove(0);

        let err = orchestrator.process_page(&mut page).await.unwrap_err();
        assert!(matches!(
            err,
            NoteScanError::PageFailed { ref page_id, stage: PageStage::Preprocess, .. } if page_id == "set-0"
        ));
        assert!(!page.processed);
        assert_eq!(models.calls(), 0);
    }

    #[tokio::test]
    async fn test_resume_does_not_rerun_processed_pages() {
        let models = StubModels::new();
        let orchestrator = ValidationOrchestrator::new(&models, &StubPreprocessor, InferenceEngine::default());
        let mut batch = pages(&["a.png", "b.png", "c.png"]);

        let first = orchestrator
            .process_batch(&mut batch, BatchOptions::default(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(first.processed, 3);
        assert_eq!(models.calls(), 9);

        let second = orchestrator
            .process_batch(&mut batch, BatchOptions::default(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(models.calls(), 9);

        let rerun = BatchOptions {
            start: 0,
            resume: false,
        };
        orchestrator.process_batch(&mut batch, rerun, |_, _| {}).await.unwrap();
        assert_eq!(models.calls(), 18);
    }

    #[tokio::test]
    async fn test_stats_snapshot_after_each_page() {
        let models = StubModels::new();
        let orchestrator = ValidationOrchestrator::new(&models, &StubPreprocessor, InferenceEngine::default());
        let mut batch = pages(&["a.png", "b.png", "c.png"]);

        let mut snapshots = Vec::new();
        let options = BatchOptions { start: 1, resume: true };
        let summary = orchestrator
            .process_batch(&mut batch, options, |page, stats| {
                snapshots.push((page.index, stats.processed_count, stats.total))
            })
            .await
            .unwrap();

        assert_eq!(snapshots, vec![(1, 1, 3), (2, 2, 3)]);
        assert!(!batch[0].processed);
        let stats = summary.stats.unwrap();
        assert_eq!(stats.avg_ocr_confidence, 90.0);
        assert_eq!(stats.avg_key_sig_type_confidence, 80.0);
        assert_eq!(stats.avg_digit_confidence, 70.0);
    }

    #[tokio::test]
    async fn test_abort_stops_at_first_failure() {
        let models = StubModels::new();
        let orchestrator = ValidationOrchestrator::new(&models, &StubPreprocessor, InferenceEngine::default());
        let mut batch = pages(&["a.png", "broken.png", "c.png"]);

        let err = orchestrator
            .process_batch(&mut batch, BatchOptions::default(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, NoteScanError::PageFailed { .. }));
        assert!(batch[0].processed);
        assert!(!batch[2].processed);
    }

    #[tokio::test]
    async fn test_skip_policy_continues_past_failure() {
        let models = StubModels::new();
        let orchestrator = ValidationOrchestrator::new(&models, &StubPreprocessor, InferenceEngine::default())
            .with_error_policy(ErrorPolicy::Skip);
        let mut batch = pages(&["a.png", "broken.png", "c.png"]);

        let summary = orchestrator
            .process_batch(&mut batch, BatchOptions::default(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].page_id, "set-1");
        assert_eq!(summary.stats.unwrap().processed_count, 2);
    }

    #[tokio::test]
    async fn test_empty_batch_has_no_stats() {
        let models = StubModels::new();
        let orchestrator = ValidationOrchestrator::new(&models, &StubPreprocessor, InferenceEngine::default());
        let summary = orchestrator
            .process_batch(&mut [], BatchOptions::default(), |_, _| {})
            .await
            .unwrap();
        assert!(summary.stats.is_none());
    }

    #[tokio::test]
    async fn test_slow_forward_pass_exceeds_page_deadline() {
        let models = StubModels::slow(Duration::from_millis(30));
        let orchestrator = ValidationOrchestrator::new(&models, &StubPreprocessor, InferenceEngine::default())
            .with_page_timeout(Duration::from_millis(10));
        let mut page = pages(&["a.png"]).remove(0);

        let err = orchestrator.process_page(&mut page).await.unwrap_err();
        assert!(matches!(err, NoteScanError::Timeout { ref page_id, timeout_ms: 10 } if page_id == "set-0"));
        assert!(!page.processed);
        assert!(page.predictions.is_none());
        assert_eq!(models.calls(), 1);
    }

    #[tokio::test]
    async fn test_page_within_deadline_completes() {
        let models = StubModels::slow(Duration::from_millis(1));
        let orchestrator = ValidationOrchestrator::new(&models, &StubPreprocessor, InferenceEngine::default())
            .with_page_timeout(Duration::from_secs(5));
        let mut page = pages(&["a.png"]).remove(0);

        assert!(orchestrator.process_page(&mut page).await.unwrap().processed);
        assert_eq!(models.calls(), 3);
    }
}
