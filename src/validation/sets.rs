//! Catalog of reference page sets

use crate::error::{NoteScanError, Result};
use crate::types::page::PageRecord;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Background image and overlay of one reference page
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetPage {
    pub background: PathBuf,
    pub overlay: PathBuf,
}

/// A configured validation set; page paths are relative to `dir`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub dir: PathBuf,
    #[serde(default)]
    pub pages: Vec<SetPage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetSummary {
    pub id: String,
    pub name: String,
    pub count: usize,
}

/// Known validation sets, in configuration order
#[derive(Debug, Clone, Default)]
pub struct ValidationCatalog {
    sets: Vec<SetDefinition>,
}

impl ValidationCatalog {
    pub fn new(sets: Vec<SetDefinition>) -> Self {
        Self { sets }
    }

    pub fn list_available_sets(&self) -> Vec<SetSummary> {
        self.sets
            .iter()
            .map(|set| SetSummary {
                id: set.id.clone(),
                name: set.name.clone(),
                count: set.pages.len(),
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Result<&SetDefinition> {
        self.sets
            .iter()
            .find(|set| set.id == id)
            .ok_or_else(|| NoteScanError::UnknownValidationSet(id.to_string()))
    }

    /// Resolve a set into fresh page records.
    ///
    /// Pages whose images cannot be found are logged and left out.
    pub async fn load_set(&self, id: &str) -> Result<Vec<PageRecord>> {
        let set = self.get(id)?;

        let mut pages = Vec::with_capacity(set.pages.len());
        for (index, page) in set.pages.iter().enumerate() {
            let background = set.dir.join(&page.background);
            let overlay = set.dir.join(&page.overlay);

            match check_assets(&[background.as_path(), overlay.as_path()]).await {
                Ok(()) => pages.push(PageRecord::new(&set.id, index, background, overlay)),
                Err(e) => warn!(set = %set.id, page = index, error = %e, "Failed to load page, skipping"),
            }
        }

        info!(set = %set.name, loaded = pages.len(), configured = set.pages.len(), "Loaded validation set");
        Ok(pages)
    }
}

async fn check_assets(paths: &[&Path]) -> Result<()> {
    for path in paths {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| NoteScanError::AssetLoad {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        if !metadata.is_file() {
            return Err(NoteScanError::AssetLoad {
                path: path.to_path_buf(),
                message: "not a file".to_string(),
            });
        }
    }
    Ok(())
}
