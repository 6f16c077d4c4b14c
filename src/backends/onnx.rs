//! ONNX Runtime backend
//!
//! Runs the segmentation graph through ONNX Runtime with optional CUDA or
//! `CoreML` acceleration. Execution providers that are requested but not
//! available fall back to CPU with a warning.

use crate::config::{ExecutionProvider, RemovalConfig};
use crate::error::{BgRemovalError, Result};
use crate::inference::{reshape_mask_output, InferenceBackend};
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::{self, value::Value};
use std::time::{Duration, Instant};

/// ONNX Runtime backend for running background removal models
#[derive(Debug)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_manager: ModelManager,
    model_info: Option<ModelInfo>,
    initialized: bool,
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers as `(name, available, description)`
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        log::debug!(
            "Provider check on {}/{}: cuda={}, coreml={}",
            std::env::consts::OS,
            std::env::consts::ARCH,
            cuda_available,
            coreml_available
        );

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon acceleration (macOS only)".to_string(),
            ),
        ]
    }

    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            session: None,
            model_manager,
            model_info: None,
            initialized: false,
        }
    }

    fn cuda() -> Option<ExecutionProviderDispatch> {
        let provider = CUDAExecutionProvider::default();
        if OrtExecutionProvider::is_available(&provider).unwrap_or(false) {
            Some(provider.build())
        } else {
            None
        }
    }

    fn coreml() -> Option<ExecutionProviderDispatch> {
        let provider = CoreMLExecutionProvider::default();
        if OrtExecutionProvider::is_available(&provider).unwrap_or(false) {
            Some(provider.with_subgraphs(true).build())
        } else {
            None
        }
    }

    /// Execution providers to register for `requested`, in priority order
    fn resolve_providers(requested: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        match requested {
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Vec::new()
            },
            ExecutionProvider::Auto => {
                let providers: Vec<_> = [Self::cuda(), Self::coreml()].into_iter().flatten().collect();
                if providers.is_empty() {
                    log::info!("No hardware acceleration available, using CPU");
                } else {
                    log::info!(
                        "Hardware acceleration enabled with {} provider(s)",
                        providers.len()
                    );
                }
                providers
            },
            ExecutionProvider::Cuda => Self::cuda().map_or_else(
                || {
                    log::warn!("CUDA execution provider requested but not available, falling back to CPU");
                    Vec::new()
                },
                |p| vec![p],
            ),
            ExecutionProvider::CoreMl => Self::coreml().map_or_else(
                || {
                    log::warn!("CoreML execution provider requested but not available, falling back to CPU");
                    Vec::new()
                },
                |p| vec![p],
            ),
        }
    }

    fn load_model(&mut self, config: &RemovalConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = self.model_manager.load_model()?;
        let model_info = self.model_manager.get_info()?;

        let mut session_builder = Session::builder()
            .map_err(|e| BgRemovalError::inference(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to set optimization level: {e}"))
            })?;

        let providers = Self::resolve_providers(config.execution_provider);
        if !providers.is_empty() {
            session_builder = session_builder
                .with_execution_providers(providers)
                .map_err(|e| {
                    BgRemovalError::inference(format!("Failed to set execution providers: {e}"))
                })?;
        }

        let cores = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter_threads = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };

        let session = session_builder
            .with_parallel_execution(true)
            .map_err(|e| BgRemovalError::inference(format!("Failed to enable parallel execution: {e}")))?
            .with_intra_threads(intra_threads)
            .map_err(|e| BgRemovalError::inference(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| BgRemovalError::inference(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                BgRemovalError::model(format!("Failed to create session from model data: {e}"))
            })?;

        log::debug!(
            "ONNX session ready: provider={}, {} intra / {} inter threads, model {} ({:.2} MB)",
            config.execution_provider,
            intra_threads,
            inter_threads,
            model_info.name,
            model_info.size_bytes as f64 / (1024.0 * 1024.0)
        );

        self.session = Some(session);
        self.model_info = Some(model_info);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Model loading complete: {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let output_shape = self.output_shape();
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| BgRemovalError::inference("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert input tensor: {e}"))
        })?;

        // Positional inputs: segmentation graphs name their input differently
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| BgRemovalError::inference(format!("ONNX inference failed: {e}")))?;

        let data: Vec<f32> = {
            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| BgRemovalError::inference("No output tensors found"))?;
            outputs
                .get(first_key)
                .ok_or_else(|| BgRemovalError::inference("First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    BgRemovalError::inference(format!("Failed to extract output tensor: {e}"))
                })?
                .iter()
                .copied()
                .collect()
        };

        log::debug!(
            "Inference complete: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        reshape_mask_output(data, output_shape)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info
            .as_ref()
            .map(|info| info.input_shape)
            .or_else(|| self.model_manager.get_info().ok().map(|info| info.input_shape))
            .unwrap_or((1, 3, 320, 320))
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info
            .as_ref()
            .map(|info| info.output_shape)
            .or_else(|| self.model_manager.get_info().ok().map(|info| info.output_shape))
            .unwrap_or((1, 1, 320, 320))
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.model_manager.get_preprocessing_config()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        match &self.model_info {
            Some(info) => Ok(info.clone()),
            None => self.model_manager.get_info(),
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_providers_always_has_cpu() {
        let providers = OnnxBackend::list_providers();
        assert_eq!(providers.len(), 3);
        let (name, available, _) = &providers[0];
        assert_eq!(name, "CPU");
        assert!(available);
    }

    #[test]
    fn test_initialize_rejects_garbage_model() {
        let temp_dir = TempDir::new().unwrap();
        let model = temp_dir.path().join("garbage.onnx");
        std::fs::write(&model, b"definitely not protobuf").unwrap();

        let manager = ModelManager::with_external_model(&model).unwrap();
        let mut backend = OnnxBackend::with_model_manager(manager);
        let config = RemovalConfig::builder()
            .execution_provider(ExecutionProvider::Cpu)
            .build()
            .unwrap();

        assert!(backend.initialize(&config).is_err());
        assert!(!backend.is_initialized());
        assert_eq!(backend.input_shape(), (1, 3, 320, 320));
    }

    #[test]
    fn test_infer_before_initialize_fails() {
        let temp_dir = TempDir::new().unwrap();
        let model = temp_dir.path().join("u2net.onnx");
        std::fs::write(&model, b"onnx").unwrap();

        let manager = ModelManager::with_external_model(&model).unwrap();
        let mut backend = OnnxBackend::with_model_manager(manager);
        let input = Array4::<f32>::zeros((1, 3, 320, 320));
        let err = backend.infer(&input).unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference(_)));
    }
}
