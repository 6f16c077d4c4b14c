//! On-disk cache for downloaded segmentation models
//!
//! Every model lives in its own directory below the cache root:
//!
//! ```text
//! <cache>/models/<model_id>/model.onnx
//! <cache>/models/<model_id>/model.json   (optional preprocessing overrides)
//! ```

use crate::error::{BgRemovalError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "BGREMOVE_SERVER_CACHE_DIR";

/// General-purpose U²-Net salient object model
pub const DEFAULT_MODEL_URL: &str =
    "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net.onnx";

/// File name of the ONNX graph inside a model directory
pub const MODEL_FILE_NAME: &str = "model.onnx";

/// File name of the optional preprocessing sidecar inside a model directory
pub const SIDECAR_FILE_NAME: &str = "model.json";

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    pub model_id: String,
    pub path: PathBuf,
    /// Whether a `model.json` sidecar is present
    pub has_sidecar: bool,
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the default cache, creating it if missing.
    ///
    /// Location: `$BGREMOVE_SERVER_CACHE_DIR/models` when set, otherwise
    /// `<user cache dir>/bgremove-server/models`.
    pub fn new() -> Result<Self> {
        let cache_dir = Self::get_cache_dir()?;
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Open a cache rooted at `cache_dir/models`
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");
        Self::ensure_dir(&models_dir)?;
        Ok(Self {
            cache_dir: models_dir,
        })
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| BgRemovalError::file_io_error("create cache directory", dir, &e))?;
        }
        Ok(())
    }

    fn get_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {} environment variable.",
                    CACHE_DIR_ENV
                ))
            })?
            .join("bgremove-server")
            .join("models"))
    }

    /// Derive a filesystem-safe model id from a download URL.
    ///
    /// The id is the file stem of the last path segment followed by the first
    /// eight hex digits of the URL's SHA-256, so two URLs serving `u2net.onnx`
    /// never collide.
    ///
    /// ```
    /// use bgremove_server::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://example.com/models/u2net.onnx");
    /// assert!(id.starts_with("u2net-"));
    /// assert_eq!(id.len(), "u2net-".len() + 8);
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        use sha2::{Digest, Sha256};

        let last_segment = url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        let stem = Path::new(last_segment)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let stem: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        let short = digest.get(..8).unwrap_or(&digest);

        if stem.is_empty() {
            format!("model-{}", short)
        } else {
            format!("{}-{}", stem, short)
        }
    }

    /// `true` if the model directory contains a model file
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        !model_id.is_empty() && Self::validate_model_directory(&self.get_model_path(model_id))
    }

    /// Path to a cached model directory (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    /// Path to the ONNX file of a cached model (may not exist)
    #[must_use]
    pub fn get_model_file(&self, model_id: &str) -> PathBuf {
        self.get_model_path(model_id).join(MODEL_FILE_NAME)
    }

    fn validate_model_directory(model_path: &Path) -> bool {
        model_path.join(MODEL_FILE_NAME).is_file()
    }

    /// List every valid cached model, sorted by id
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                BgRemovalError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;

            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if !Self::validate_model_directory(&path) {
                log::debug!("Skipping invalid model directory: {}", path.display());
                continue;
            }
            let Some(model_id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            models.push(CachedModelInfo {
                model_id: model_id.to_string(),
                has_sidecar: path.join(SIDECAR_FILE_NAME).is_file(),
                size_bytes: Self::calculate_directory_size(&path).unwrap_or(0),
                path,
            });
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    fn calculate_directory_size(dir_path: &Path) -> Result<u64> {
        let mut total_size = 0;
        for entry in fs::read_dir(dir_path)
            .map_err(|e| BgRemovalError::file_io_error("calculate directory size", dir_path, &e))?
            .flatten()
        {
            if let Ok(metadata) = entry.metadata() {
                if metadata.is_file() {
                    total_size += metadata.len();
                }
            }
        }
        Ok(total_size)
    }

    /// Id of the default model
    #[must_use]
    pub fn get_default_model_id() -> String {
        Self::url_to_model_id(DEFAULT_MODEL_URL)
    }

    /// Remove every cached model, returning the removed ids
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed_models = Vec::new();
        for model in self.scan_cached_models()? {
            log::info!("Removing cached model: {}", model.model_id);
            fs::remove_dir_all(&model.path).map_err(|e| {
                BgRemovalError::file_io_error("remove cached model directory", &model.path, &e)
            })?;
            removed_models.push(model.model_id);
        }
        Ok(removed_models)
    }

    /// Remove one cached model; `false` if it was not cached
    pub fn clear_specific_model(&self, model_id: &str) -> Result<bool> {
        let model_path = self.get_model_path(model_id);

        if model_id.is_empty() || !model_path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {}", model_id);
        fs::remove_dir_all(&model_path).map_err(|e| {
            BgRemovalError::file_io_error("remove specific cached model", &model_path, &e)
        })?;

        Ok(true)
    }

    #[must_use]
    pub fn get_current_cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS.get(unit_index).unwrap_or(&"B"))
    } else {
        format!("{:.1} {}", size, UNITS.get(unit_index).unwrap_or(&"B"))
    }
}
