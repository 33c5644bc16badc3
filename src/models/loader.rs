//! Embedded-weight model loader

use crate::error::{NoteScanError, Result};
use crate::models::decoder::WeightDecoder;
use crate::models::graph::{Sequential, Tensor};
use crate::models::kind::ModelKind;
use ndarray::IxDyn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Base64 chunks for one layer's kernel and bias
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerWeights {
    #[serde(default)]
    pub weights: Vec<String>,
    #[serde(default)]
    pub bias: Vec<String>,
}

/// Self-contained model description: topology plus chunked weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub architecture: Value,
    #[serde(default)]
    pub trainable_params: BTreeMap<String, LayerWeights>,
}

impl ModelArtifact {
    pub fn from_json_str(kind: ModelKind, json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| NoteScanError::Artifact {
            model: kind,
            message: e.to_string(),
        })
    }

    /// Read an artifact file
    pub async fn from_path<P: AsRef<Path>>(kind: ModelKind, path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NoteScanError::AssetLoad {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Self::from_json_str(kind, &json)
    }

    /// The Sequential description, unwrapping a `model_config` envelope
    fn topology(&self) -> &Value {
        self.architecture
            .get("model_config")
            .unwrap_or(&self.architecture)
    }
}

/// Why a layer entry was or was not applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LoadOutcome {
    Applied,
    /// Artifact names a layer the graph does not have
    UnknownLayer,
    /// Layer has no learnable tensors
    NoWeights,
    /// Layer exposes more tensors than the artifact can supply
    CountMismatch { expected: usize, actual: usize },
    /// Decoded element count does not fill the live tensor shape
    ShapeMismatch {
        index: usize,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
}

/// Per-layer result of weight injection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerLoadReport {
    pub layer_name: String,
    pub applied: bool,
    #[serde(flatten)]
    pub outcome: LoadOutcome,
}

impl LayerLoadReport {
    fn new(layer_name: &str, outcome: LoadOutcome) -> Self {
        Self {
            layer_name: layer_name.to_string(),
            applied: outcome == LoadOutcome::Applied,
            outcome,
        }
    }

    /// True when the artifact carried data for a trainable layer but it was not used
    pub fn is_partial(&self) -> bool {
        matches!(
            self.outcome,
            LoadOutcome::UnknownLayer
                | LoadOutcome::CountMismatch { .. }
                | LoadOutcome::ShapeMismatch { .. }
        )
    }
}

/// Runnable model with the report of how its weights were applied
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub kind: ModelKind,
    pub graph: Sequential,
    pub report: Vec<LayerLoadReport>,
}

impl LoadedModel {
    pub fn applied_layers(&self) -> usize {
        self.report.iter().filter(|r| r.applied).count()
    }
}

/// Build a tensor from flat data, using the target shape as authority
pub fn decoded_tensor(target: &str, data: Vec<f32>, shape: &[usize]) -> Result<Tensor> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
        return Err(NoteScanError::ShapeMismatch {
            target: target.to_string(),
            shape: shape.to_vec(),
            expected,
            actual: data.len(),
        });
    }
    Tensor::from_shape_vec(IxDyn(shape), data).map_err(|e| NoteScanError::ShapeMismatch {
        target: format!("{}: {}", target, e),
        shape: shape.to_vec(),
        expected,
        actual: expected,
    })
}

/// Loader for embedded-weight artifacts
#[derive(Debug, Clone, Default)]
pub struct ModelLoader {
    /// Fail the load when any layer's weights could not be applied
    require_complete: bool,
}

impl ModelLoader {
    /// Create a loader that reports, but tolerates, skipped layers
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader that rejects partial loads
    pub fn strict() -> Self {
        Self {
            require_complete: true,
        }
    }

    pub fn with_require_complete(require_complete: bool) -> Self {
        Self { require_complete }
    }

    /// Build the graph from the artifact topology and inject decoded weights
    pub fn load(&self, kind: ModelKind, artifact: &ModelArtifact) -> Result<LoadedModel> {
        let mut graph = Sequential::from_topology(artifact.topology())?;

        info!(
            model = %kind,
            layers = graph.layers().len(),
            input = ?graph.input_shape(),
            output = ?graph.output_shape(),
            "Graph built from topology"
        );

        let mut report = Vec::with_capacity(artifact.trainable_params.len());
        for (layer_name, params) in &artifact.trainable_params {
            let outcome = Self::apply_layer(&mut graph, layer_name, params)?;
            match &outcome {
                LoadOutcome::Applied => debug!(model = %kind, layer = %layer_name, "Weights applied"),
                LoadOutcome::NoWeights => {
                    debug!(model = %kind, layer = %layer_name, "Layer has no weights, skipping")
                }
                other => warn!(
                    model = %kind,
                    layer = %layer_name,
                    outcome = ?other,
                    "Weights not applied, keeping initial values"
                ),
            }
            report.push(LayerLoadReport::new(layer_name, outcome));
        }

        let skipped: Vec<&str> = report
            .iter()
            .filter(|r| r.is_partial())
            .map(|r| r.layer_name.as_str())
            .collect();
        if self.require_complete && !skipped.is_empty() {
            return Err(NoteScanError::Artifact {
                model: kind,
                message: format!("weights not applied for layers {:?}", skipped),
            });
        }

        let skipped_count = skipped.len();
        let model = LoadedModel { kind, graph, report };
        info!(
            model = %kind,
            applied = model.applied_layers(),
            skipped = skipped_count,
            "Model loaded successfully"
        );
        Ok(model)
    }

    fn apply_layer(
        graph: &mut Sequential,
        layer_name: &str,
        params: &LayerWeights,
    ) -> Result<LoadOutcome> {
        let Some(layer) = graph.layer_mut(layer_name) else {
            return Ok(LoadOutcome::UnknownLayer);
        };

        let shapes = layer.weight_shapes();
        if shapes.is_empty() {
            return Ok(LoadOutcome::NoWeights);
        }

        let sources = [
            WeightDecoder::decode(&params.weights)?,
            WeightDecoder::decode(&params.bias)?,
        ];

        let mut tensors = Vec::with_capacity(shapes.len());
        for (index, (data, shape)) in sources.into_iter().zip(&shapes).enumerate() {
            match decoded_tensor(layer_name, data, shape) {
                Ok(tensor) => tensors.push(tensor),
                Err(NoteScanError::ShapeMismatch {
                    shape,
                    expected,
                    actual,
                    ..
                }) => {
                    return Ok(LoadOutcome::ShapeMismatch {
                        index,
                        shape,
                        expected,
                        actual,
                    })
                }
                Err(e) => return Err(e),
            }
        }

        if tensors.len() != shapes.len() {
            return Ok(LoadOutcome::CountMismatch {
                expected: shapes.len(),
                actual: tensors.len(),
            });
        }

        layer.set_weights(tensors)?;
        Ok(LoadOutcome::Applied)
    }
}
