//! Embedded-weight model components

pub mod decoder;
pub mod graph;
pub mod inference;
pub mod kind;
pub mod loader;
pub mod registry;

pub use decoder::{WeightDecoder, WeightEncoder};
pub use graph::{Sequential, Tensor};
pub use inference::{Classifier, InferenceEngine, ModelSource, PredictionResult};
pub use kind::ModelKind;
pub use loader::{LayerLoadReport, LoadedModel, ModelArtifact, ModelLoader};
pub use registry::ModelRegistry;
