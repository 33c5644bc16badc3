//! Configuration management for the notation validation pipeline

use crate::models::ModelKind;
use crate::validation::orchestrator::ErrorPolicy;
use crate::validation::sets::SetDefinition;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Model artifact configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Directory containing the JSON model artifacts
    #[serde(default = "default_models_dir")]
    pub models_dir: String,
    #[serde(default = "default_ocr_file")]
    pub ocr_file: String,
    #[serde(default = "default_key_sig_type_file")]
    pub key_sig_type_file: String,
    #[serde(default = "default_key_sig_digit_file")]
    pub key_sig_digit_file: String,
    /// Number of ranked classes kept per prediction
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Fail loading when any layer's weights are skipped
    #[serde(default)]
    pub require_complete_load: bool,
}

impl ModelsConfig {
    pub fn artifact_file(&self, kind: ModelKind) -> &str {
        match kind {
            ModelKind::Ocr => &self.ocr_file,
            ModelKind::KeySigType => &self.key_sig_type_file,
            ModelKind::KeySigDigitCount => &self.key_sig_digit_file,
        }
    }
}

fn default_models_dir() -> String {
    "assets/models".to_string()
}

fn default_ocr_file() -> String {
    ModelKind::Ocr.default_artifact_file().to_string()
}

fn default_key_sig_type_file() -> String {
    ModelKind::KeySigType.default_artifact_file().to_string()
}

fn default_key_sig_digit_file() -> String {
    ModelKind::KeySigDigitCount.default_artifact_file().to_string()
}

fn default_top_k() -> usize {
    3
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            ocr_file: default_ocr_file(),
            key_sig_type_file: default_key_sig_type_file(),
            key_sig_digit_file: default_key_sig_digit_file(),
            top_k: default_top_k(),
            require_complete_load: false,
        }
    }
}

/// Reference page sets available for validation
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ValidationConfig {
    #[serde(default)]
    pub sets: Vec<SetDefinition>,
}

/// Batch processing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Per-page deadline in milliseconds (0 disables)
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,
    /// What to do when a page fails: abort (default) or skip
    #[serde(default)]
    pub on_error: ErrorPolicy,
    /// Skip pages that already carry predictions
    #[serde(default = "default_resume")]
    pub resume: bool,
}

fn default_page_timeout_ms() -> u64 {
    30_000
}

fn default_resume() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_timeout_ms: default_page_timeout_ms(),
            on_error: ErrorPolicy::default(),
            resume: default_resume(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
