//! Model sources, metadata and loading

use crate::cache::{ModelCache, MODEL_FILE_NAME, SIDECAR_FILE_NAME};
use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the segmentation model comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelSource {
    /// `.onnx` file, or a directory containing `model.onnx`
    External(PathBuf),
    /// Model id inside the [`ModelCache`]
    Downloaded(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Downloaded(model_id) => {
                format!("cached:{}", model_id)
            },
        }
    }
}

/// Complete model specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Downloaded(ModelCache::get_default_model_id()),
        }
    }
}

impl ModelSpec {
    #[must_use]
    pub fn external<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            source: ModelSource::External(path.into()),
        }
    }

    #[must_use]
    pub fn downloaded<S: Into<String>>(model_id: S) -> Self {
        Self {
            source: ModelSource::Downloaded(model_id.into()),
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
    pub output_shape: (usize, usize, usize, usize),
}

/// How images are turned into model input tensors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// `[height, width]` of the model input
    pub target_size: [u32; 2],
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    /// U²-Net: 320x320 input with `ImageNet` statistics
    fn default() -> Self {
        Self {
            target_size: [320, 320],
            normalization_mean: [0.485, 0.456, 0.406],
            normalization_std: [0.229, 0.224, 0.225],
        }
    }
}

impl PreprocessingConfig {
    pub fn validate(&self) -> Result<()> {
        let [height, width] = self.target_size;
        if height == 0 || width == 0 || height > 4096 || width > 4096 {
            return Err(BgRemovalError::invalid_config(format!(
                "Invalid model input size {}x{} (valid range: 1-4096)",
                width, height
            )));
        }
        if self
            .normalization_std
            .iter()
            .any(|s| !s.is_finite() || *s <= 0.0)
        {
            return Err(BgRemovalError::invalid_config(format!(
                "Normalization std must be positive, got {:?}",
                self.normalization_std
            )));
        }
        if self.normalization_mean.iter().any(|m| !m.is_finite()) {
            return Err(BgRemovalError::invalid_config(format!(
                "Normalization mean must be finite, got {:?}",
                self.normalization_mean
            )));
        }
        Ok(())
    }
}

/// Optional `model.json` next to a model file
#[derive(Debug, Clone, Default, Deserialize)]
struct ModelSidecar {
    name: Option<String>,
    precision: Option<String>,
    /// `[height, width]`
    target_size: Option<[u32; 2]>,
    mean: Option<[f32; 3]>,
    std: Option<[f32; 3]>,
}

impl ModelSidecar {
    fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .map_err(|e| BgRemovalError::file_io_error("read model sidecar", path, &e))?;
        serde_json::from_str(&content).map(Some).map_err(|e| {
            BgRemovalError::invalid_config(format!(
                "Failed to parse model sidecar '{}': {}",
                path.display(),
                e
            ))
        })
    }

    fn preprocessing(&self) -> PreprocessingConfig {
        let defaults = PreprocessingConfig::default();
        PreprocessingConfig {
            target_size: self.target_size.unwrap_or(defaults.target_size),
            normalization_mean: self.mean.unwrap_or(defaults.normalization_mean),
            normalization_std: self.std.unwrap_or(defaults.normalization_std),
        }
    }
}

/// Model provider trait for loading models
pub trait ModelProvider: std::fmt::Debug + Send + Sync {
    /// Load model data as bytes
    fn load_model_data(&self) -> Result<Vec<u8>>;

    fn get_model_info(&self) -> Result<ModelInfo>;

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Path of the model file, if it lives on disk
    fn get_model_path(&self) -> Option<PathBuf>;
}

/// Single `.onnx` file on disk with an optional `model.json` / `<stem>.json` sidecar
#[derive(Debug)]
pub struct OnnxFileProvider {
    model_path: PathBuf,
    name: String,
    precision: String,
    preprocessing: PreprocessingConfig,
}

impl OnnxFileProvider {
    /// Open a model file, or a model directory containing `model.onnx`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BgRemovalError::invalid_config(format!(
                "Model path does not exist: {}",
                path.display()
            )));
        }

        let (model_path, sidecar_path) = if path.is_dir() {
            (path.join(MODEL_FILE_NAME), path.join(SIDECAR_FILE_NAME))
        } else {
            (path.to_path_buf(), path.with_extension("json"))
        };

        if !model_path.is_file() {
            return Err(BgRemovalError::invalid_config(format!(
                "Model directory '{}' does not contain {}",
                path.display(),
                MODEL_FILE_NAME
            )));
        }

        let sidecar = ModelSidecar::load(&sidecar_path)?.unwrap_or_default();
        let preprocessing = sidecar.preprocessing();
        preprocessing.validate()?;

        let name = sidecar.name.clone().unwrap_or_else(|| {
            let stem_source = if path.is_dir() { path } else { model_path.as_path() };
            stem_source
                .file_stem()
                .map_or_else(|| "model".to_string(), |s| s.to_string_lossy().into_owned())
        });

        Ok(Self {
            model_path,
            name,
            precision: sidecar.precision.unwrap_or_else(|| "fp32".to_string()),
            preprocessing,
        })
    }
}

impl ModelProvider for OnnxFileProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        fs::read(&self.model_path)
            .map_err(|e| BgRemovalError::file_io_error("read model file", &self.model_path, &e))
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        let size_bytes = fs::metadata(&self.model_path)
            .map_err(|e| BgRemovalError::file_io_error("stat model file", &self.model_path, &e))?
            .len() as usize;
        let [height, width] = self.preprocessing.target_size;
        let (height, width) = (height as usize, width as usize);

        Ok(ModelInfo {
            name: self.name.clone(),
            precision: self.precision.clone(),
            size_bytes,
            input_shape: (1, 3, height, width),
            output_shape: (1, 1, height, width),
        })
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.preprocessing.clone())
    }

    fn get_model_path(&self) -> Option<PathBuf> {
        Some(self.model_path.clone())
    }
}

/// Model without bytes, used by backends that do not execute a graph
#[derive(Debug, Clone)]
pub struct InMemoryModelProvider {
    name: String,
    data: Vec<u8>,
    preprocessing: PreprocessingConfig,
}

impl InMemoryModelProvider {
    #[must_use]
    pub fn new<S: Into<String>>(name: S, data: Vec<u8>, preprocessing: PreprocessingConfig) -> Self {
        Self {
            name: name.into(),
            data,
            preprocessing,
        }
    }
}

impl ModelProvider for InMemoryModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        Ok(self.data.clone())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        let [height, width] = self.preprocessing.target_size;
        let (height, width) = (height as usize, width as usize);
        Ok(ModelInfo {
            name: self.name.clone(),
            precision: "fp32".to_string(),
            size_bytes: self.data.len(),
            input_shape: (1, 3, height, width),
            output_shape: (1, 1, height, width),
        })
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.preprocessing.clone())
    }

    fn get_model_path(&self) -> Option<PathBuf> {
        None
    }
}

/// Model manager for handling different model sources
#[derive(Debug)]
pub struct ModelManager {
    provider: Box<dyn ModelProvider>,
}

impl ModelManager {
    /// Resolve a spec against the default cache
    pub fn from_spec(spec: &ModelSpec) -> Result<Self> {
        match &spec.source {
            ModelSource::External(path) => Self::with_external_model(path),
            ModelSource::Downloaded(model_id) => {
                Self::with_downloaded_model(&ModelCache::new()?, model_id)
            },
        }
    }

    pub fn with_external_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            provider: Box::new(OnnxFileProvider::new(path)?),
        })
    }

    /// Load a model from `cache` by id
    pub fn with_downloaded_model(cache: &ModelCache, model_id: &str) -> Result<Self> {
        if !cache.is_model_cached(model_id) {
            let available: Vec<String> = cache
                .scan_cached_models()?
                .into_iter()
                .map(|m| m.model_id)
                .collect();
            return Err(BgRemovalError::model(format!(
                "Model '{}' not found in cache. Available models: {:?}",
                model_id, available
            )));
        }

        Ok(Self {
            provider: Box::new(OnnxFileProvider::new(cache.get_model_path(model_id))?),
        })
    }

    #[must_use]
    pub fn with_provider(provider: Box<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    pub fn load_model(&self) -> Result<Vec<u8>> {
        self.provider.load_model_data()
    }

    pub fn get_info(&self) -> Result<ModelInfo> {
        self.provider.get_model_info()
    }

    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.provider.get_preprocessing_config()
    }

    #[must_use]
    pub fn get_model_path(&self) -> Option<PathBuf> {
        self.provider.get_model_path()
    }
}
