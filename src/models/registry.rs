//! Holder of the three page classifiers
//!
//! The registry is a plain value created once at startup and passed by
//! reference to whoever needs predictions. Loading is all-or-nothing.

use crate::error::{NoteScanError, Result};
use crate::models::graph::Tensor;
use crate::models::inference::{Classifier, ModelSource};
use crate::models::kind::ModelKind;
use crate::models::loader::{LoadedModel, ModelArtifact, ModelLoader};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info};

/// The three loaded models, present only together
#[derive(Debug)]
struct LoadedSet {
    ocr: LoadedModel,
    key_sig_type: LoadedModel,
    key_sig_digit_count: LoadedModel,
}

impl LoadedSet {
    fn get(&self, kind: ModelKind) -> &LoadedModel {
        match kind {
            ModelKind::Ocr => &self.ocr,
            ModelKind::KeySigType => &self.key_sig_type,
            ModelKind::KeySigDigitCount => &self.key_sig_digit_count,
        }
    }
}

/// Registry of the OCR, key-signature type and accidental-count models
pub struct ModelRegistry {
    models_dir: PathBuf,
    files: HashMap<ModelKind, String>,
    loader: ModelLoader,
    loaded: Option<LoadedSet>,
}

impl ModelRegistry {
    /// Registry reading artifacts from `models_dir` with default file names
    pub fn new<P: Into<PathBuf>>(models_dir: P, loader: ModelLoader) -> Self {
        let files = ModelKind::ALL
            .iter()
            .map(|kind| (*kind, kind.default_artifact_file().to_string()))
            .collect();
        Self {
            models_dir: models_dir.into(),
            files,
            loader,
            loaded: None,
        }
    }

    /// Override the artifact file name of one model
    pub fn with_artifact_file(mut self, kind: ModelKind, file: impl Into<String>) -> Self {
        self.files.insert(kind, file.into());
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn artifact_path(&self, kind: ModelKind) -> PathBuf {
        let file = self
            .files
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_artifact_file());
        self.models_dir.join(file)
    }

    /// Load all three models from disk. No-op when already initialized.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.is_initialized() {
            info!("Models already initialized");
            return Ok(());
        }

        let mut artifacts = HashMap::with_capacity(ModelKind::ALL.len());
        for kind in ModelKind::ALL {
            let path = self.artifact_path(kind);
            info!(model = %kind, path = %path.display(), "Reading model artifact");
            match ModelArtifact::from_path(kind, &path).await {
                Ok(artifact) => {
                    artifacts.insert(kind, artifact);
                }
                Err(e) => {
                    error!(model = %kind, error = %e, "Model initialization failed");
                    return Err(e);
                }
            }
        }

        self.initialize_from(|kind| {
            artifacts
                .remove(&kind)
                .ok_or(NoteScanError::ModelNotInitialized(kind))
        })
    }

    /// Load all three models from artifacts supplied by `source`, in
    /// registry order. No-op when already initialized.
    pub fn initialize_from<F>(&mut self, mut source: F) -> Result<()>
    where
        F: FnMut(ModelKind) -> Result<ModelArtifact>,
    {
        if self.is_initialized() {
            return Ok(());
        }

        let mut load = |kind: ModelKind| -> Result<LoadedModel> {
            let artifact = source(kind)?;
            let model = self.loader.load(kind, &artifact)?;
            info!(
                model = %kind,
                input = ?model.graph.input_shape(),
                output = ?model.graph.output_shape(),
                "Model ready"
            );
            Ok(model)
        };

        let loaded = (|| -> Result<LoadedSet> {
            Ok(LoadedSet {
                ocr: load(ModelKind::Ocr)?,
                key_sig_type: load(ModelKind::KeySigType)?,
                key_sig_digit_count: load(ModelKind::KeySigDigitCount)?,
            })
        })();

        match loaded {
            Ok(set) => {
                self.loaded = Some(set);
                info!("All models initialized successfully");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Model initialization failed");
                Err(e)
            }
        }
    }

    pub fn get(&self, kind: ModelKind) -> Result<&LoadedModel> {
        self.loaded
            .as_ref()
            .map(|set| set.get(kind))
            .ok_or(NoteScanError::ModelNotInitialized(kind))
    }

    /// Raw output of the symbol OCR model (71 classes)
    pub fn predict_symbol(&self, input: &Tensor) -> Result<Vec<f32>> {
        self.predict(ModelKind::Ocr, input)
    }

    /// Raw output of the key-signature type model (None, Sharps, Flats)
    pub fn predict_key_signature_type(&self, input: &Tensor) -> Result<Vec<f32>> {
        self.predict(ModelKind::KeySigType, input)
    }

    /// Raw output of the accidental-count model (0-10)
    pub fn predict_key_signature_digit_count(&self, input: &Tensor) -> Result<Vec<f32>> {
        self.predict(ModelKind::KeySigDigitCount, input)
    }

    fn predict(&self, kind: ModelKind, input: &Tensor) -> Result<Vec<f32>> {
        self.get(kind)?
            .forward(input)
            .map_err(|e| NoteScanError::Inference {
                model: kind,
                message: e.to_string(),
            })
    }

    /// Release all models. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.loaded.take().is_some() {
            info!("Models disposed");
        }
    }
}

impl ModelSource for ModelRegistry {
    type Model = LoadedModel;

    fn model(&self, kind: ModelKind) -> Result<&LoadedModel> {
        self.get(kind)
    }
}
