//! NoteScan Pipeline - Main Entry Point
//!
//! Loads the three notation classifiers from their embedded-weight artifacts
//! and runs them over a configured validation set.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use notescan_pipeline::{
    config::AppConfig,
    metrics::ValidationMetrics,
    models::{InferenceEngine, ModelKind, ModelLoader, ModelRegistry},
    preprocess::ImagePreprocessor,
    validation::{BatchOptions, ValidationCatalog, ValidationOrchestrator},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "notescan", about = "Music-notation classifier validation")]
struct Cli {
    /// Configuration file
    #[arg(long, env = "NOTESCAN_CONFIG", default_value = "config/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured validation sets
    ListSets,
    /// Load the models and print how each layer's weights were applied
    Inspect,
    /// Run all three classifiers over a validation set
    Validate {
        /// Validation set id
        #[arg(long)]
        set: String,
        /// Index of the first page to process
        #[arg(long, default_value_t = 0)]
        from: usize,
        /// Reprocess pages that already have predictions
        #[arg(long)]
        no_resume: bool,
    },
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("notescan_pipeline={}", config.logging.level).parse()?);

    if config.logging.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn build_registry(config: &AppConfig) -> ModelRegistry {
    let loader = ModelLoader::with_require_complete(config.models.require_complete_load);
    ModelKind::ALL.iter().fold(
        ModelRegistry::new(&config.models.models_dir, loader),
        |registry, kind| registry.with_artifact_file(*kind, config.models.artifact_file(*kind)),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        AppConfig::load_from_path(&cli.config)?
    } else {
        AppConfig::default()
    };
    init_logging(&config)?;

    if !cli.config.exists() {
        warn!(path = %cli.config.display(), "Configuration file not found, using defaults");
    }

    let catalog = ValidationCatalog::new(config.validation.sets.clone());

    match cli.command {
        Command::ListSets => {
            for set in catalog.list_available_sets() {
                println!("{:<20} {:<30} {:>4} pages", set.id, set.name, set.count);
            }
        }
        Command::Inspect => {
            let mut registry = build_registry(&config);
            registry.initialize().await.context("Failed to initialize models")?;

            for kind in ModelKind::ALL {
                let model = registry.get(kind)?;
                println!(
                    "{} input={:?} output={:?}",
                    kind,
                    model.graph.input_shape(),
                    model.graph.output_shape()
                );
                for layer in model.graph.layers() {
                    println!("  {:<20} {:?} -> {:?}", layer.name(), layer.kind(), layer.output_shape());
                }
                for entry in &model.report {
                    println!("  {}", serde_json::to_string(entry)?);
                }
            }
            registry.dispose();
        }
        Command::Validate { set, from, no_resume } => {
            let run_id = uuid::Uuid::new_v4();
            info!(%run_id, set = %set, "Starting validation run");

            let mut registry = build_registry(&config);
            registry.initialize().await.context("Failed to initialize models")?;

            let mut pages = catalog.load_set(&set).await?;
            let metrics = Arc::new(ValidationMetrics::new());
            let preprocessor = ImagePreprocessor;

            let orchestrator = ValidationOrchestrator::new(
                &registry,
                &preprocessor,
                InferenceEngine::new(config.models.top_k),
            )
            .with_page_timeout(Duration::from_millis(config.pipeline.page_timeout_ms))
            .with_error_policy(config.pipeline.on_error)
            .with_metrics(metrics.clone());

            let options = BatchOptions {
                start: from,
                resume: config.pipeline.resume && !no_resume,
            };
            let summary = orchestrator
                .process_batch(&mut pages, options, |page, stats| {
                    println!(
                        "[{}/{}] {}  ocr={:.1}%  key={:.1}%  digit={:.1}%",
                        stats.processed_count,
                        stats.total,
                        page.id,
                        stats.avg_ocr_confidence,
                        stats.avg_key_sig_type_confidence,
                        stats.avg_digit_confidence
                    );
                })
                .await
                .with_context(|| format!("Validation run {} failed", run_id))?;

            drop(orchestrator);

            for failure in &summary.failures {
                warn!(page = %failure.page_id, error = %failure.error, "Page failed");
            }
            if let Some(stats) = &summary.stats {
                println!("{}", serde_json::to_string_pretty(stats)?);
            }

            metrics.print_summary();
            registry.dispose();
            info!(
                %run_id,
                processed = summary.processed,
                skipped = summary.skipped,
                failed = summary.failures.len(),
                "Validation run complete"
            );
        }
    }

    Ok(())
}
