//! Deterministic mock backend
//!
//! Produces a soft-edged ellipse covering the centre of the model input
//! instead of running a network. Used by tests and for `--backend mock`
//! smoke runs where no model file is available.

use crate::{
    config::RemovalConfig,
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, PreprocessingConfig},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// Shared record of calls made on a [`MockBackend`]
pub type CallHistory = Arc<Mutex<Vec<String>>>;

/// Mock segmentation backend
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    model_info: ModelInfo,
    preprocessing_config: PreprocessingConfig,
    call_history: CallHistory,
    should_fail_init: bool,
    should_fail_inference: bool,
}

impl MockBackend {
    /// Mock with a 320x320 input, matching U²-Net
    #[must_use]
    pub fn new() -> Self {
        Self::with_input_size(320, 320)
    }

    #[must_use]
    pub fn with_input_size(height: usize, width: usize) -> Self {
        Self {
            initialized: false,
            model_info: ModelInfo {
                name: "mock".to_string(),
                precision: "fp32".to_string(),
                size_bytes: 0,
                input_shape: (1, 3, height, width),
                output_shape: (1, 1, height, width),
            },
            preprocessing_config: PreprocessingConfig {
                target_size: [height as u32, width as u32],
                ..PreprocessingConfig::default()
            },
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
        }
    }

    /// Mock that fails in `initialize`
    #[must_use]
    pub fn new_failing_init() -> Self {
        let mut backend = Self::new();
        backend.should_fail_init = true;
        backend
    }

    /// Mock that fails in `infer`
    #[must_use]
    pub fn new_failing_inference() -> Self {
        let mut backend = Self::new();
        backend.should_fail_inference = true;
        backend
    }

    /// Handle to the call history that stays valid after the backend is moved
    #[must_use]
    pub fn call_history(&self) -> CallHistory {
        Arc::clone(&self.call_history)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    fn generate_mask(&self, batch_size: usize) -> Array4<f32> {
        let (_, _, height, width) = self.model_info.output_shape;
        let center_x = width as f32 / 2.0;
        let center_y = height as f32 / 2.0;
        let radius_x = (width as f32 * 0.35).max(1.0);
        let radius_y = (height as f32 * 0.35).max(1.0);

        Array4::from_shape_fn((batch_size, 1, height, width), |(_, _, y, x)| {
            let dx = (x as f32 + 0.5 - center_x) / radius_x;
            let dy = (y as f32 + 0.5 - center_y) / radius_y;
            let distance = (dx * dx + dy * dy).sqrt();
            // Solid core, linear falloff over the outer fifth
            ((1.0 - distance) * 5.0).clamp(0.0, 1.0)
        })
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &RemovalConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(BgRemovalError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }

        self.initialized = true;
        Ok(Some(Duration::from_millis(0)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(BgRemovalError::inference("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(BgRemovalError::inference("Mock backend inference failed"));
        }

        let (batch, channels, height, width) = input.dim();
        let (_, expected_channels, expected_height, expected_width) = self.model_info.input_shape;
        if (channels, height, width) != (expected_channels, expected_height, expected_width) {
            return Err(BgRemovalError::inference(format!(
                "Mock backend expected input {}x{}x{}, got {}x{}x{}",
                expected_channels, expected_height, expected_width, channels, height, width
            )));
        }

        Ok(self.generate_mask(batch))
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.input_shape
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.output_shape
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.preprocessing_config.clone())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(self.model_info.clone())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_lifecycle() {
        let mut backend = MockBackend::new();
        let history = backend.call_history();
        let input = Array4::<f32>::zeros((1, 3, 320, 320));

        assert!(backend.infer(&input).is_err());
        assert!(backend.initialize(&RemovalConfig::default()).unwrap().is_some());
        assert!(backend.initialize(&RemovalConfig::default()).unwrap().is_none());
        assert!(backend.is_initialized());

        let mask = backend.infer(&input).unwrap();
        assert_eq!(mask.shape(), &[1, 1, 320, 320]);
        assert_eq!(
            *history.lock().unwrap(),
            vec!["infer", "initialize", "initialize", "infer"]
        );
    }

    #[test]
    fn test_mock_mask_shape_and_values() {
        let mut backend = MockBackend::with_input_size(64, 96);
        backend.initialize(&RemovalConfig::default()).unwrap();
        let mask = backend.infer(&Array4::zeros((1, 3, 64, 96))).unwrap();

        assert_eq!(mask[[0, 0, 32, 48]], 1.0);
        assert_eq!(mask[[0, 0, 0, 0]], 0.0);
        assert!(mask.iter().all(|v| (0.0..=1.0).contains(v)));
        // Some soft edge exists
        assert!(mask.iter().any(|v| *v > 0.0 && *v < 1.0));
    }

    #[test]
    fn test_mock_failure_modes() {
        let mut backend = MockBackend::new_failing_init();
        assert!(matches!(
            backend.initialize(&RemovalConfig::default()),
            Err(BgRemovalError::Model(_))
        ));

        let mut backend = MockBackend::new_failing_inference();
        backend.initialize(&RemovalConfig::default()).unwrap();
        let err = backend.infer(&Array4::zeros((1, 3, 320, 320))).unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference(_)));

        let mut backend = MockBackend::new();
        backend.initialize(&RemovalConfig::default()).unwrap();
        assert!(backend.infer(&Array4::zeros((1, 3, 10, 10))).is_err());
    }
}
