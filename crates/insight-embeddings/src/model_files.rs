//! Local model files.
//!
//! Fetches the sentence-transformer weights from HuggingFace Hub once and
//! keeps them under the user cache directory.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::EmbeddingError;

/// Default model repository on HuggingFace
pub const DEFAULT_MODEL_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";

/// Where a model's files live on disk.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub cache_dir: PathBuf,
    pub repo_id: String,
}

impl Default for ModelFiles {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("vault-insight")
            .join("models");
        Self {
            cache_dir,
            repo_id: DEFAULT_MODEL_REPO.to_string(),
        }
    }
}

impl ModelFiles {
    pub fn new(cache_dir: impl Into<PathBuf>, repo_id: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            repo_id: repo_id.into(),
        }
    }

    pub fn model_dir(&self) -> PathBuf {
        self.cache_dir.join(self.repo_id.replace('/', "_"))
    }

    fn paths(&self) -> ModelPaths {
        let dir = self.model_dir();
        ModelPaths {
            config: dir.join(CONFIG_FILE),
            tokenizer: dir.join(TOKENIZER_FILE),
            weights: dir.join(WEIGHTS_FILE),
        }
    }

    pub fn is_present(&self) -> bool {
        self.paths().all().iter().all(|p| p.exists())
    }
}

/// Paths to model files
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelPaths {
    fn all(&self) -> [&PathBuf; 3] {
        [&self.config, &self.tokenizer, &self.weights]
    }
}

/// Return local paths, downloading the files first if any is missing.
pub fn get_or_download_model(files: &ModelFiles) -> Result<ModelPaths, EmbeddingError> {
    if files.is_present() {
        debug!(path = ?files.model_dir(), "Using cached model");
    } else {
        info!(repo = %files.repo_id, "Downloading model files...");
        download(files)?;
    }
    Ok(files.paths())
}

fn download(files: &ModelFiles) -> Result<(), EmbeddingError> {
    use hf_hub::api::sync::Api;

    let api = Api::new().map_err(|e| EmbeddingError::Download(e.to_string()))?;
    let repo = api.model(files.repo_id.clone());
    std::fs::create_dir_all(files.model_dir())?;

    for name in [CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE] {
        let fetched = repo
            .get(name)
            .map_err(|e| EmbeddingError::Download(format!("{}: {}", name, e)))?;
        let dest = files.model_dir().join(name);
        std::fs::copy(&fetched, &dest)?;
        debug!(file = name, dest = ?dest, "Model file stored");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_location() {
        let files = ModelFiles::default();
        assert!(files.cache_dir.to_string_lossy().contains("vault-insight"));
        assert_eq!(files.repo_id, DEFAULT_MODEL_REPO);
    }

    #[test]
    fn test_missing_files_not_present() {
        let temp = TempDir::new().unwrap();
        let files = ModelFiles::new(temp.path(), "org/model");
        assert!(!files.is_present());
        assert!(files.model_dir().ends_with("org_model"));
    }

    #[test]
    fn test_present_when_all_files_exist() {
        let temp = TempDir::new().unwrap();
        let files = ModelFiles::new(temp.path(), "org/model");
        std::fs::create_dir_all(files.model_dir()).unwrap();
        for p in files.paths().all() {
            std::fs::write(p, b"{}").unwrap();
        }
        assert!(files.is_present());
    }
}
