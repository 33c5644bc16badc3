//! Artifact Generator
//!
//! Writes randomly initialised model artifacts for the three classifiers so
//! the pipeline can be smoke-tested without trained weights.

use anyhow::{Context, Result};
use clap::Parser;
use notescan_pipeline::models::loader::LayerWeights;
use notescan_pipeline::models::{ModelArtifact, ModelKind, Sequential, WeightEncoder};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "make_artifact", about = "Generate random-weight model artifacts")]
struct Args {
    /// Output directory
    #[arg(long, default_value = "assets/models")]
    out: PathBuf,
    /// Floats per base64 chunk
    #[arg(long, default_value_t = 16_384)]
    chunk_floats: usize,
}

/// Two conv/pool blocks followed by a dense classifier head
fn topology(kind: ModelKind) -> Value {
    let [h, w, c] = kind.input_shape();
    json!({
        "class_name": "Sequential",
        "config": {
            "name": format!("{}_classifier", kind).to_lowercase(),
            "layers": [
                {"class_name": "Conv2D", "config": {
                    "name": "conv2d", "filters": 16, "kernel_size": [3, 3], "activation": "relu",
                    "padding": "valid", "batch_input_shape": [null, h, w, c]
                }},
                {"class_name": "MaxPooling2D", "config": {"name": "max_pooling2d", "pool_size": [2, 2]}},
                {"class_name": "Conv2D", "config": {
                    "name": "conv2d_1", "filters": 32, "kernel_size": [3, 3], "activation": "relu"
                }},
                {"class_name": "MaxPooling2D", "config": {"name": "max_pooling2d_1", "pool_size": [2, 2]}},
                {"class_name": "Flatten", "config": {"name": "flatten"}},
                {"class_name": "Dropout", "config": {"name": "dropout", "rate": 0.5}},
                {"class_name": "Dense", "config": {"name": "dense", "units": 64, "activation": "relu"}},
                {"class_name": "Dense", "config": {
                    "name": "dense_1", "units": kind.class_count(), "activation": "softmax"
                }}
            ]
        }
    })
}

/// Glorot-uniform style values for a tensor of the given shape
fn random_values(rng: &mut impl Rng, shape: &[usize]) -> Vec<f32> {
    let count: usize = shape.iter().product();
    let fan = shape.iter().rev().take(2).sum::<usize>().max(1) as f32;
    let limit = (6.0 / fan).sqrt();
    (0..count).map(|_| rng.gen_range(-limit..limit)).collect()
}

fn build_artifact(kind: ModelKind, chunk_floats: usize) -> Result<ModelArtifact> {
    let architecture = topology(kind);
    let graph = Sequential::from_topology(&architecture)?;
    let mut rng = rand::thread_rng();

    let mut trainable_params = BTreeMap::new();
    for layer in graph.layers() {
        let shapes = layer.weight_shapes();
        let mut encoded = shapes
            .iter()
            .map(|shape| WeightEncoder::encode(&random_values(&mut rng, shape), chunk_floats));

        trainable_params.insert(
            layer.name().to_string(),
            LayerWeights {
                weights: encoded.next().unwrap_or_default(),
                bias: encoded.next().unwrap_or_default(),
            },
        );
    }

    Ok(ModelArtifact {
        architecture,
        trainable_params,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("make_artifact=info".parse()?),
        )
        .init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("Failed to create {}", args.out.display()))?;

    for kind in ModelKind::ALL {
        let artifact = build_artifact(kind, args.chunk_floats)?;
        let path = args.out.join(kind.default_artifact_file());
        std::fs::write(&path, serde_json::to_vec(&artifact)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(model = %kind, path = %path.display(), layers = artifact.trainable_params.len(), "Artifact written");
    }

    Ok(())
}
