//! Error types for the notation recognition pipeline

use crate::models::ModelKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, NoteScanError>;

/// Stage of page processing in which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStage {
    Preprocess,
    Infer,
}

impl std::fmt::Display for PageStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageStage::Preprocess => write!(f, "preprocess"),
            PageStage::Infer => write!(f, "infer"),
        }
    }
}

/// Errors raised while loading models or validating pages
#[derive(Error, Debug)]
pub enum NoteScanError {
    /// Malformed base64 chunk or a byte length that is not a multiple of 4
    #[error("Decode error in chunk {chunk}: {message}")]
    Decode { chunk: usize, message: String },

    /// Decoded element count does not match the target tensor shape
    #[error("Shape mismatch for '{target}': shape {shape:?} needs {expected} values, got {actual}")]
    ShapeMismatch {
        target: String,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    /// Prediction requested before the registry finished loading
    #[error("{0} model not initialized")]
    ModelNotInitialized(ModelKind),

    #[error("Unknown validation set: {0}")]
    UnknownValidationSet(String),

    /// Page image or artifact file could not be read
    #[error("Failed to load asset {path}: {message}")]
    AssetLoad { path: PathBuf, message: String },

    /// Forward pass failed
    #[error("Inference failed for {model}: {message}")]
    Inference { model: ModelKind, message: String },

    /// Artifact file unreadable or not a valid artifact document
    #[error("Invalid model artifact for {model}: {message}")]
    Artifact { model: ModelKind, message: String },

    /// Graph description is unsupported or inconsistent
    #[error("Topology error: {0}")]
    Topology(String),

    /// Page-level failure with the context needed to reproduce it
    #[error("Page '{page_id}' failed during {stage}: {source}")]
    PageFailed {
        page_id: String,
        stage: PageStage,
        #[source]
        source: Box<NoteScanError>,
    },

    #[error("Page '{page_id}' exceeded deadline of {timeout_ms} ms")]
    Timeout { page_id: String, timeout_ms: u64 },
}

impl NoteScanError {
    pub(crate) fn topology(message: impl Into<String>) -> Self {
        NoteScanError::Topology(message.into())
    }

    /// Wrap an error with page id and stage
    pub fn at_page(self, page_id: &str, stage: PageStage) -> Self {
        NoteScanError::PageFailed {
            page_id: page_id.to_string(),
            stage,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_failure_message_carries_context() {
        let err = NoteScanError::ModelNotInitialized(ModelKind::Ocr).at_page("turkish_march-1", PageStage::Infer);
        let message = err.to_string();
        assert!(message.contains("turkish_march-1"));
        assert!(message.contains("infer"));
        assert!(message.contains("OCR"));
    }
}
