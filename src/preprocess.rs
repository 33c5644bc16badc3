//! Page image to model input tensors.

use crate::error::{NoteScanError, Result};
use crate::models::{ModelKind, Tensor};
use image::imageops::FilterType;
use ndarray::IxDyn;
use std::future::Future;
use std::path::Path;

/// Converts a page image into the normalized input tensor of one model
pub trait Preprocessor {
    /// Produce a `[1, height, width, 1]` tensor for `kind`
    fn preprocess(&self, image: &Path, kind: ModelKind) -> impl Future<Output = Result<Tensor>> + Send;
}

/// Grayscale resize-and-scale preprocessor backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Decode, convert to 8-bit grayscale, resize and scale to `[0, 1]`
    pub fn tensor_from_bytes(bytes: &[u8], kind: ModelKind) -> std::result::Result<Tensor, String> {
        let [height, width, _] = kind.input_shape();
        let gray = image::load_from_memory(bytes)
            .map_err(|e| e.to_string())?
            .to_luma8();
        let resized = image::imageops::resize(&gray, width as u32, height as u32, FilterType::Triangle);

        let data: Vec<f32> = resized.pixels().map(|p| p.0[0] as f32 / 255.0).collect();
        Tensor::from_shape_vec(IxDyn(&[1, height, width, 1]), data).map_err(|e| e.to_string())
    }
}

impl Preprocessor for ImagePreprocessor {
    async fn preprocess(&self, image: &Path, kind: ModelKind) -> Result<Tensor> {
        let asset_error = |message: String| NoteScanError::AssetLoad {
            path: image.to_path_buf(),
            message,
        };

        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| asset_error(e.to_string()))?;

        tokio::task::spawn_blocking(move || Self::tensor_from_bytes(&bytes, kind))
            .await
            .map_err(|e| asset_error(e.to_string()))?
            .map_err(asset_error)
    }
}
