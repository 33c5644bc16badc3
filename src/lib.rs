//! NoteScan Pipeline Library
//!
//! Recognition of handwritten music-notation symbols on scanned sheet-music
//! pages. Three classifiers (symbol OCR, key-signature type, accidental
//! count) are rebuilt from self-contained JSON artifacts and run over
//! batches of reference pages to collect confidence statistics.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod preprocess;
pub mod types;
pub mod validation;

pub use config::AppConfig;
pub use error::{NoteScanError, Result};
pub use models::{InferenceEngine, ModelKind, ModelLoader, ModelRegistry};
pub use preprocess::{ImagePreprocessor, Preprocessor};
pub use types::{PagePredictions, PageRecord};
pub use validation::{BatchStats, StatsAggregator, ValidationCatalog, ValidationOrchestrator};
