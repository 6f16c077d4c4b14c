//! Inference backend abstraction

use crate::{config::RemovalConfig, error::Result};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Segmentation model runtime.
///
/// Takes an NCHW float tensor of the model's input shape and returns an
/// `N x 1 x H x W` saliency map. Implementations are moved between threads
/// but never called concurrently.
pub trait InferenceBackend: Send {
    /// Load the model; returns how long loading took when it did any work
    ///
    /// # Errors
    /// - Model loading or validation errors
    /// - Execution provider setup failures
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Output tensor has an unexpected shape
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Get the expected input shape for this backend
    fn input_shape(&self) -> (usize, usize, usize, usize);

    /// Get the expected output shape for this backend
    fn output_shape(&self) -> (usize, usize, usize, usize);

    fn get_preprocessing_config(&self) -> Result<crate::models::PreprocessingConfig>;

    fn get_model_info(&self) -> Result<crate::models::ModelInfo>;

    fn is_initialized(&self) -> bool;
}

/// Reshape a flat output buffer into `1 x 1 x H x W`
///
/// Segmentation graphs disagree on whether the channel axis is kept
/// (`[1, 1, H, W]`, `[1, H, W]`, `[H, W]`), so only the element count matters.
pub(crate) fn reshape_mask_output(
    data: Vec<f32>,
    output_shape: (usize, usize, usize, usize),
) -> Result<Array4<f32>> {
    let (_, _, height, width) = output_shape;
    let expected = height * width;
    if data.len() < expected {
        return Err(crate::error::BgRemovalError::processing_stage_error(
            "inference",
            &format!(
                "model produced {} values, expected at least {} for a {}x{} mask",
                data.len(),
                expected,
                width,
                height
            ),
            None,
        ));
    }

    // Multi-output graphs such as U²-Net stack side outputs; the first map is the fused one
    let mut data = data;
    data.truncate(expected);
    Array4::from_shape_vec((1, 1, height, width), data).map_err(|e| {
        crate::error::BgRemovalError::processing(format!("Failed to reshape model output: {e}"))
    })
}
