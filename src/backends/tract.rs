//! Tract backend implementation
//!
//! Pure Rust inference through Tract. Slower than ONNX Runtime but needs no
//! native libraries, so it works in minimal containers.

use crate::config::RemovalConfig;
use crate::error::{BgRemovalError, Result};
use crate::inference::{reshape_mask_output, InferenceBackend};
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Tract backend for running background removal models using pure Rust inference
#[derive(Debug)]
pub struct TractBackend {
    model: Option<TractModel>,
    model_manager: ModelManager,
    initialized: bool,
}

impl TractBackend {
    /// Tract only ever runs on the CPU
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            model: None,
            model_manager,
            initialized: false,
        }
    }

    fn load_model(&mut self, _config: &RemovalConfig) -> Result<Duration> {
        let model_load_start = Instant::now();

        let model_data = self.model_manager.load_model()?;
        let model_info = self.model_manager.get_info()?;
        let (batch, channels, height, width) = model_info.input_shape;

        log::info!(
            "Initializing Tract backend with model {} ({}, {:.2} MB)",
            model_info.name,
            model_info.precision,
            model_info.size_bytes as f64 / (1024.0 * 1024.0)
        );

        // Pin the input shape so graphs with symbolic dimensions can be optimized
        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| BgRemovalError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([batch, channels, height, width]).into())
            .map_err(|e| BgRemovalError::model(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| BgRemovalError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| BgRemovalError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| BgRemovalError::inference("Tract model not initialized"))?;

        log::debug!("Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgRemovalError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensor found"))?
            .into_arc_tensor();

        let data: Vec<f32> = output_tensor
            .to_array_view::<f32>()
            .map_err(|e| BgRemovalError::inference(format!("Failed to convert output tensor: {e}")))?
            .iter()
            .copied()
            .collect();

        log::debug!(
            "Tract inference completed in {}ms",
            inference_start.elapsed().as_millis()
        );

        reshape_mask_output(data, self.output_shape())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_manager
            .get_info()
            .map_or((1, 3, 320, 320), |info| info.input_shape)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.model_manager
            .get_info()
            .map_or((1, 1, 320, 320), |info| info.output_shape)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.model_manager.get_preprocessing_config()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.model_manager.get_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend_for(bytes: &[u8], sidecar: Option<&str>) -> (TempDir, TractBackend) {
        let temp_dir = TempDir::new().unwrap();
        let model = temp_dir.path().join("u2netp.onnx");
        std::fs::write(&model, bytes).unwrap();
        if let Some(json) = sidecar {
            std::fs::write(temp_dir.path().join("u2netp.json"), json).unwrap();
        }
        let manager = ModelManager::with_external_model(&model).unwrap();
        (temp_dir, TractBackend::with_model_manager(manager))
    }

    #[test]
    fn test_tract_list_providers() {
        let providers = TractBackend::list_providers();
        assert_eq!(providers.len(), 1);
        assert!(providers[0].1);
    }

    #[test]
    fn test_tract_shapes_follow_model_config() {
        let (_dir, backend) = backend_for(b"onnx", Some(r#"{"target_size": [160, 240]}"#));
        assert_eq!(backend.input_shape(), (1, 3, 160, 240));
        assert_eq!(backend.output_shape(), (1, 1, 160, 240));
        assert_eq!(
            backend.get_preprocessing_config().unwrap().target_size,
            [160, 240]
        );
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_tract_uninitialized_inference_fails() {
        let (_dir, mut backend) = backend_for(b"onnx", None);
        let input = Array4::<f32>::zeros((1, 3, 320, 320));
        let err = backend.infer(&input).unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference(_)));
    }

    #[test]
    fn test_tract_rejects_invalid_model() {
        let (_dir, mut backend) = backend_for(b"not an onnx graph", None);
        let err = backend.initialize(&RemovalConfig::default()).unwrap_err();
        assert!(matches!(err, BgRemovalError::Model(_)));
        assert!(!backend.is_initialized());
    }
}
