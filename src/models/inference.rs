//! Single-model inference and output decoding

use crate::error::{NoteScanError, Result};
use crate::metrics::ValidationMetrics;
use crate::models::graph::{ForwardError, Tensor};
use crate::models::kind::ModelKind;
use crate::models::loader::LoadedModel;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Anything that can turn an input tensor into a probability vector
pub trait Classifier {
    fn kind(&self) -> ModelKind;

    /// Run one forward pass, returning the flattened output
    fn forward(&self, input: &Tensor) -> std::result::Result<Vec<f32>, ForwardError>;
}

impl Classifier for LoadedModel {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn forward(&self, input: &Tensor) -> std::result::Result<Vec<f32>, ForwardError> {
        let output = self.graph.forward(input)?;
        // The output tensor is dropped here; only the flat values leave
        Ok(output.iter().copied().collect())
    }
}

/// Source of the three page classifiers
pub trait ModelSource {
    type Model: Classifier;

    fn model(&self, kind: ModelKind) -> Result<&Self::Model>;
}

/// One class with its confidence in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub class_index: usize,
    pub confidence: f64,
}

/// Decoded output of one forward pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Index of the highest probability (first on ties)
    pub class_index: usize,
    /// Highest probability in percent, one decimal
    pub confidence: f64,
    /// Highest classes, descending by confidence
    pub top_k: Vec<ClassScore>,
}

impl PredictionResult {
    /// Decode a probability vector. Empty vectors yield `None`.
    pub fn from_probabilities(probabilities: &[f32], top_k: usize) -> Option<Self> {
        let (class_index, max) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, b)) if p <= b => best,
                _ => Some((i, p)),
            })?;

        Some(Self {
            class_index,
            confidence: to_percent(max),
            top_k: top_classes(probabilities, top_k),
        })
    }
}

/// Probability to percent rounded to one decimal place
pub fn to_percent(probability: f32) -> f64 {
    round1(probability as f64 * 100.0)
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Stable descending sort of class indices by probability, first `n` kept
pub fn top_classes(probabilities: &[f32], n: usize) -> Vec<ClassScore> {
    let mut indexed: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed
        .into_iter()
        .take(n)
        .map(|(class_index, p)| ClassScore {
            class_index,
            confidence: to_percent(p),
        })
        .collect()
}

/// Runs forward passes and decodes their output
#[derive(Clone)]
pub struct InferenceEngine {
    top_k: usize,
    metrics: Option<Arc<ValidationMetrics>>,
}

impl InferenceEngine {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            metrics: None,
        }
    }

    /// Record per-model latency into the given metrics
    pub fn with_metrics(mut self, metrics: Arc<ValidationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Run one forward pass. The input stays owned by the caller.
    pub fn infer<C: Classifier + ?Sized>(
        &self,
        model: Option<&C>,
        kind: ModelKind,
        input: &Tensor,
    ) -> Result<PredictionResult> {
        let model = model.ok_or(NoteScanError::ModelNotInitialized(kind))?;

        let start = Instant::now();
        let probabilities = model.forward(input).map_err(|e| NoteScanError::Inference {
            model: kind,
            message: e.to_string(),
        })?;
        if let Some(metrics) = &self.metrics {
            metrics.record_model_time(kind, start.elapsed());
        }

        let prediction = PredictionResult::from_probabilities(&probabilities, self.top_k)
            .ok_or_else(|| NoteScanError::Inference {
                model: kind,
                message: "model produced an empty output".to_string(),
            })?;

        debug!(
            model = %kind,
            class_index = prediction.class_index,
            confidence = prediction.confidence,
            "Inference complete"
        );
        Ok(prediction)
    }

    /// Look the model up in `source` and run it
    pub fn infer_with<S: ModelSource>(
        &self,
        source: &S,
        kind: ModelKind,
        input: &Tensor,
    ) -> Result<PredictionResult> {
        let model = source.model(kind)?;
        if model.kind() != kind {
            return Err(NoteScanError::Inference {
                model: kind,
                message: format!("source returned the {} model", model.kind()),
            });
        }
        self.infer(Some(model), kind, input)
    }
}

impl Default for InferenceEngine {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::decoder::WeightEncoder;
    use crate::models::loader::{LayerWeights, ModelArtifact, ModelLoader};
    use ndarray::IxDyn;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn dense_model() -> LoadedModel {
        let mut params = BTreeMap::new();
        params.insert(
            "dense".to_string(),
            LayerWeights {
                weights: WeightEncoder::encode(&[1.0, 0.0, 0.0, 0.0, 2.0, 0.0], 4),
                bias: WeightEncoder::encode(&[0.0, 0.0, 0.5], 3),
            },
        );
        let artifact = ModelArtifact {
            architecture: json!({
                "class_name": "Sequential",
                "config": {"layers": [
                    {"class_name": "Dense", "config": {
                        "name": "dense", "units": 3, "activation": "softmax",
                        "batch_input_shape": [null, 2]
                    }}
                ]}
            }),
            trainable_params: params,
        };
        ModelLoader::new().load(ModelKind::KeySigType, &artifact).unwrap()
    }

    #[test]
    fn test_first_maximum_wins_ties() {
        let result = PredictionResult::from_probabilities(&[0.5, 0.5, 0.0], 3).unwrap();
        assert_eq!(result.class_index, 0);
        assert_eq!(result.confidence, 50.0);
        assert_eq!(result.top_k[0].class_index, 0);
        assert_eq!(result.top_k[1].class_index, 1);
    }

    #[test]
    fn test_top_k_sorted_and_rounded() {
        let top = top_classes(&[0.1, 0.62345, 0.27655], 2);
        assert_eq!(
            top,
            vec![
                ClassScore { class_index: 1, confidence: 62.3 },
                ClassScore { class_index: 2, confidence: 27.7 },
            ]
        );
    }

    #[test]
    fn test_empty_output_has_no_prediction() {
        assert!(PredictionResult::from_probabilities(&[], 3).is_none());
    }

    #[test]
    fn test_missing_model_is_not_initialized() {
        let engine = InferenceEngine::default();
        let input = Tensor::zeros(IxDyn(&[1, 2]));
        let err = engine
            .infer::<LoadedModel>(None, ModelKind::Ocr, &input)
            .unwrap_err();
        assert!(matches!(err, NoteScanError::ModelNotInitialized(ModelKind::Ocr)));
    }

    #[test]
    fn test_inference_is_deterministic() {
        let model = dense_model();
        let engine = InferenceEngine::default();
        let input = Tensor::from_shape_vec(IxDyn(&[1, 2]), vec![1.0, 1.0]).unwrap();

        let first = engine.infer(Some(&model), ModelKind::KeySigType, &input).unwrap();
        let second = engine.infer(Some(&model), ModelKind::KeySigType, &input).unwrap();
        assert_eq!(first, second);
        // logits [1, 2, 0.5]
        assert_eq!(first.class_index, 1);
        assert_eq!(first.top_k.len(), 3);
    }

    #[test]
    fn test_wrong_input_shape_is_inference_error() {
        let model = dense_model();
        let engine = InferenceEngine::default();
        let input = Tensor::zeros(IxDyn(&[1, 3]));
        let err = engine.infer(Some(&model), ModelKind::KeySigType, &input).unwrap_err();
        assert!(matches!(err, NoteScanError::Inference { .. }));
    }

    struct SingleModel(LoadedModel);

    impl ModelSource for SingleModel {
        type Model = LoadedModel;

        fn model(&self, _kind: ModelKind) -> Result<&LoadedModel> {
            Ok(&self.0)
        }
    }

    #[test]
    fn test_source_must_return_requested_kind() {
        let source = SingleModel(dense_model());
        let engine = InferenceEngine::default();
        let input = Tensor::from_shape_vec(IxDyn(&[1, 2]), vec![1.0, 1.0]).unwrap();

        assert!(engine.infer_with(&source, ModelKind::KeySigType, &input).is_ok());
        let err = engine.infer_with(&source, ModelKind::Ocr, &input).unwrap_err();
        assert!(matches!(err, NoteScanError::Inference { model: ModelKind::Ocr, .. }));
    }
}
