//! Background removal processor
//!
//! [`BackgroundRemovalProcessor`] owns one inference backend and turns a
//! decoded image into an RGBA cut-out of the same size: letterbox the image
//! into the model input, run the model, map the predicted mask back onto the
//! original pixels and scale the alpha channel by it.

use crate::{
    config::{ExecutionProvider, RemovalConfig},
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::ModelSpec,
    types::{ProcessingTimings, RemovalResult, SegmentationMask},
    utils::{ImagePreprocessor, LetterboxTransform},
};
use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use instant::Instant;
use ndarray::{s, Array4};
use tracing::{debug, info, instrument, span, Level};

/// Backend type enumeration for runtime selection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
    /// Deterministic mask, no model file
    Mock,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            "mock" => Ok(Self::Mock),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown backend '{}'. Expected one of: onnx, tract, mock",
                other
            ))),
        }
    }
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create a backend of `backend_type` serving the model described by `model_spec`
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_spec: &ModelSpec,
    ) -> Result<Box<dyn InferenceBackend>>;

    /// List backend types compiled into this build
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Creates the backends enabled by cargo features
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_spec: &ModelSpec,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => {
                let model_manager = crate::models::ModelManager::from_spec(model_spec)?;
                Ok(Box::new(crate::backends::OnnxBackend::with_model_manager(
                    model_manager,
                )))
            },
            #[cfg(feature = "tract")]
            BackendType::Tract => {
                let model_manager = crate::models::ModelManager::from_spec(model_spec)?;
                Ok(Box::new(crate::backends::TractBackend::with_model_manager(
                    model_manager,
                )))
            },
            BackendType::Mock => Ok(Box::new(crate::backends::MockBackend::new())),
            #[allow(unreachable_patterns)]
            other => Err(BgRemovalError::invalid_config(format!(
                "Backend '{}' is not enabled in this build (model {})",
                other,
                model_spec.source.display_name()
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends.push(BackendType::Mock);
        backends
    }
}

/// Configuration for the background removal processor
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Model specification (cached download or external file)
    pub model_spec: ModelSpec,
    /// Backend type to use for inference
    pub backend_type: BackendType,
    /// Execution provider for the backend
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads (0 = auto)
    pub intra_threads: usize,
    /// Number of inter-op threads (0 = auto)
    pub inter_threads: usize,
    /// Disable the on-disk model cache
    pub disable_cache: bool,
}

impl ProcessorConfig {
    #[must_use]
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder::new()
    }

    /// Runtime settings handed to the backend on initialization
    #[must_use]
    pub fn to_removal_config(&self) -> RemovalConfig {
        RemovalConfig {
            execution_provider: self.execution_provider,
            intra_threads: self.intra_threads,
            inter_threads: self.inter_threads,
            disable_cache: self.disable_cache,
            model_spec: self.model_spec.clone(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            model_spec: ModelSpec::default(),
            backend_type: BackendType::Onnx,
            execution_provider: ExecutionProvider::Auto,
            intra_threads: 0,
            inter_threads: 0,
            disable_cache: false,
        }
    }
}

/// Builder for `ProcessorConfig`
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl ProcessorConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ProcessorConfig::default(),
        }
    }

    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    #[must_use]
    pub fn disable_cache(mut self, disable: bool) -> Self {
        self.config.disable_cache = disable;
        self
    }

    /// Build the processor configuration
    ///
    /// # Errors
    ///
    /// Returns `BgRemovalError::InvalidConfig` for out-of-range thread counts
    pub fn build(self) -> Result<ProcessorConfig> {
        self.config.to_removal_config().validate()?;
        Ok(self.config)
    }
}

impl Default for ProcessorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs segmentation and alpha compositing for one image at a time
pub struct BackgroundRemovalProcessor {
    config: ProcessorConfig,
    backend_factory: Box<dyn BackendFactory>,
    backend: Option<Box<dyn InferenceBackend>>,
    initialized: bool,
    model_load_ms: Option<u64>,
}

impl BackgroundRemovalProcessor {
    /// Create a processor with the default backend factory
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        Self::with_factory(config, Box::new(DefaultBackendFactory))
    }

    pub fn with_factory(
        config: ProcessorConfig,
        backend_factory: Box<dyn BackendFactory>,
    ) -> Result<Self> {
        config.to_removal_config().validate()?;
        Ok(Self {
            config,
            backend_factory,
            backend: None,
            initialized: false,
            model_load_ms: None,
        })
    }

    /// Create a processor around an already constructed backend
    pub fn with_backend(config: ProcessorConfig, backend: Box<dyn InferenceBackend>) -> Result<Self> {
        let mut processor = Self::new(config)?;
        processor.backend = Some(backend);
        Ok(processor)
    }

    /// Load the model. Calling it again after success is a no-op; after a
    /// failure the next call retries.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        info!(
            backend = %self.config.backend_type,
            model = %self.config.model_spec.source.display_name(),
            provider = %self.config.execution_provider,
            "Initializing background removal processor"
        );

        if self.backend.is_none() {
            self.backend = Some(
                self.backend_factory
                    .create_backend(self.config.backend_type, &self.config.model_spec)?,
            );
        }
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| BgRemovalError::internal("Backend missing after creation"))?;

        let removal_config = self.config.to_removal_config();
        if let Some(load_time) = backend.initialize(&removal_config)? {
            self.model_load_ms = Some(load_time.as_millis() as u64);
        }
        self.initialized = true;

        info!("Background removal processor initialized successfully");
        Ok(())
    }

    /// Remove the background from `image`, returning an RGBA image of the same size
    #[instrument(
        skip(self, image),
        fields(
            backend = %self.config.backend_type,
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    pub fn process_image(&mut self, image: &DynamicImage) -> Result<RemovalResult> {
        self.initialize()?;

        let total_start = Instant::now();
        let mut timings = ProcessingTimings {
            model_load_ms: self.model_load_ms.take().unwrap_or(0),
            ..ProcessingTimings::default()
        };

        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| BgRemovalError::processing("Backend not initialized"))?;

        let (transform, input_tensor) = {
            let _span = span!(Level::DEBUG, "preprocessing").entered();
            let start = Instant::now();
            let preprocessing_config = backend.get_preprocessing_config()?;
            let prepared = ImagePreprocessor::preprocess_for_inference(image, &preprocessing_config)?;
            timings.preprocessing_ms = start.elapsed().as_millis() as u64;
            prepared
        };

        let output_tensor = {
            let _span = span!(Level::DEBUG, "inference").entered();
            let start = Instant::now();
            let output = backend.infer(&input_tensor)?;
            timings.inference_ms = start.elapsed().as_millis() as u64;
            output
        };

        let (mask, cutout) = {
            let _span = span!(Level::DEBUG, "postprocessing").entered();
            let start = Instant::now();
            let mask = Self::tensor_to_mask(&output_tensor, &transform)?;
            let cutout = Self::apply_background_removal(image, &mask)?;
            timings.postprocessing_ms = start.elapsed().as_millis() as u64;
            (mask, cutout)
        };

        timings.total_ms = total_start.elapsed().as_millis() as u64;
        debug!(
            preprocessing_ms = timings.preprocessing_ms,
            inference_ms = timings.inference_ms,
            postprocessing_ms = timings.postprocessing_ms,
            foreground_ratio = mask.foreground_ratio(),
            "Segmentation finished"
        );

        Ok(RemovalResult::new(cutout, mask, timings))
    }

    #[must_use]
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[must_use]
    pub fn available_backends(&self) -> Vec<BackendType> {
        self.backend_factory.available_backends()
    }

    /// Map a `[1, 1, H, W]` model output back onto the original image
    fn tensor_to_mask(tensor: &Array4<f32>, transform: &LetterboxTransform) -> Result<SegmentationMask> {
        let (batch, channels, height, width) = tensor.dim();
        if batch != 1 || channels != 1 {
            return Err(BgRemovalError::processing(format!(
                "Invalid output tensor shape {:?}, expected [1, 1, H, W]",
                tensor.shape()
            )));
        }

        let right = (transform.offset_x + transform.scaled_width) as usize;
        let bottom = (transform.offset_y + transform.scaled_height) as usize;
        if right > width || bottom > height {
            return Err(BgRemovalError::processing(format!(
                "Output tensor {}x{} is smaller than the model input region {}x{}",
                width, height, right, bottom
            )));
        }
        if tensor.iter().any(|v| !v.is_finite()) {
            return Err(BgRemovalError::processing(
                "Model produced non-finite mask values",
            ));
        }

        let region = tensor.slice(s![
            0,
            0,
            transform.offset_y as usize..bottom,
            transform.offset_x as usize..right
        ]);

        // Stretch the saliency map to 0..1 over the image region; a flat map is only clamped
        let (min, max) = region
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let rescale = |value: f32| {
            if max > min {
                (value - min) / (max - min)
            } else {
                value.clamp(0.0, 1.0)
            }
        };

        let crop = GrayImage::from_fn(transform.scaled_width, transform.scaled_height, |x, y| {
            let value = region[[y as usize, x as usize]];
            Luma([(rescale(value) * 255.0).round() as u8])
        });

        SegmentationMask::from_image(&crop)
            .resize(transform.original_width, transform.original_height)
    }

    /// Scale the input alpha by the mask; fully transparent pixels are zeroed
    fn apply_background_removal(image: &DynamicImage, mask: &SegmentationMask) -> Result<RgbaImage> {
        let rgba_image = image.to_rgba8();
        if rgba_image.dimensions() != mask.dimensions {
            return Err(BgRemovalError::processing(
                "Image and mask dimensions do not match",
            ));
        }

        let mut result = rgba_image;
        for (pixel, &mask_value) in result.pixels_mut().zip(mask.data.iter()) {
            let alpha = ((u16::from(pixel[3]) * u16::from(mask_value) + 127) / 255) as u8;
            *pixel = if alpha > 0 {
                Rgba([pixel[0], pixel[1], pixel[2], alpha])
            } else {
                Rgba([0, 0, 0, 0])
            };
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;
    use image::{ImageBuffer, Rgb};

    fn mock_config() -> ProcessorConfig {
        ProcessorConfig::builder()
            .backend_type(BackendType::Mock)
            .build()
            .unwrap()
    }

    fn solid_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([10, 200, 30])))
    }

    #[test]
    fn test_backend_type_parsing() {
        assert_eq!("ONNX".parse::<BackendType>().unwrap(), BackendType::Onnx);
        assert_eq!("mock".parse::<BackendType>().unwrap(), BackendType::Mock);
        assert!("gpu".parse::<BackendType>().is_err());
        assert_eq!(BackendType::Tract.to_string(), "tract");
    }

    #[test]
    fn test_default_factory_lists_mock() {
        let backends = DefaultBackendFactory.available_backends();
        assert!(backends.contains(&BackendType::Mock));
    }

    #[test]
    fn test_processor_config_builder_chain() {
        let config = ProcessorConfig::builder()
            .backend_type(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cpu)
            .intra_threads(4)
            .inter_threads(2)
            .disable_cache(true)
            .build()
            .unwrap();

        let removal_config = config.to_removal_config();
        assert_eq!(removal_config.intra_threads, 4);
        assert_eq!(removal_config.inter_threads, 2);
        assert!(removal_config.disable_cache);
        assert_eq!(removal_config.execution_provider, ExecutionProvider::Cpu);

        assert!(ProcessorConfig::builder().intra_threads(5000).build().is_err());
    }

    #[test]
    fn test_process_image_preserves_dimensions() {
        let mut processor = BackgroundRemovalProcessor::new(mock_config()).unwrap();
        assert!(!processor.is_initialized());

        let result = processor.process_image(&solid_image(300, 120)).unwrap();
        assert!(processor.is_initialized());
        assert_eq!(result.dimensions(), (300, 120));
        assert_eq!(result.mask.dimensions, (300, 120));

        // Centre is foreground, corners are cleared
        let centre = result.image.get_pixel(150, 60);
        assert_eq!(centre[3], 255);
        assert_eq!(&centre.0[..3], &[10, 200, 30]);
        assert_eq!(result.image.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let backend = MockBackend::new();
        let history = backend.call_history();
        let mut processor =
            BackgroundRemovalProcessor::with_backend(mock_config(), Box::new(backend)).unwrap();

        processor.initialize().unwrap();
        processor.initialize().unwrap();
        processor.process_image(&solid_image(8, 8)).unwrap();

        assert_eq!(*history.lock().unwrap(), vec!["initialize", "infer"]);
    }

    #[test]
    fn test_failed_initialize_is_retried() {
        let backend = MockBackend::new_failing_init();
        let history = backend.call_history();
        let mut processor =
            BackgroundRemovalProcessor::with_backend(mock_config(), Box::new(backend)).unwrap();

        assert!(processor.process_image(&solid_image(8, 8)).is_err());
        assert!(processor.process_image(&solid_image(8, 8)).is_err());
        assert!(!processor.is_initialized());
        assert_eq!(history.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_inference_failure_propagates() {
        let mut processor = BackgroundRemovalProcessor::with_backend(
            mock_config(),
            Box::new(MockBackend::new_failing_inference()),
        )
        .unwrap();
        let err = processor.process_image(&solid_image(16, 16)).unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference(_)));
    }

    #[test]
    fn test_tensor_to_mask_inverts_letterbox() {
        // 4x2 image letterboxed into 4x4: rows 1..3 hold the image
        let transform = LetterboxTransform::fit(4, 2, 4, 4).unwrap();
        assert_eq!(transform.offset_y, 1);

        // Padding rows carry values outside the image range and must be ignored
        let mut tensor = Array4::<f32>::from_elem((1, 1, 4, 4), 5.0);
        for x in 0..4 {
            tensor[[0, 0, 1, x]] = 0.0;
            tensor[[0, 0, 2, x]] = 0.6;
        }
        let mask = BackgroundRemovalProcessor::tensor_to_mask(&tensor, &transform).unwrap();
        assert_eq!(mask.dimensions, (4, 2));
        assert_eq!(&mask.data[..4], &[0, 0, 0, 0]);
        assert_eq!(&mask.data[4..], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_weak_prediction_is_stretched_to_opaque() {
        let transform = LetterboxTransform::fit(4, 4, 4, 4).unwrap();
        let mut tensor = Array4::<f32>::zeros((1, 1, 4, 4));
        tensor[[0, 0, 1, 1]] = 0.6;
        tensor[[0, 0, 2, 2]] = 0.15;

        let mask = BackgroundRemovalProcessor::tensor_to_mask(&tensor, &transform).unwrap();
        assert_eq!(mask.data[4 + 1], 255);
        assert_eq!(mask.data[2 * 4 + 2], 64);
        assert_eq!(mask.data[0], 0);
    }

    #[test]
    fn test_flat_prediction_is_clamped() {
        let transform = LetterboxTransform::fit(2, 2, 2, 2).unwrap();

        let flat = Array4::<f32>::from_elem((1, 1, 2, 2), 0.5);
        let mask = BackgroundRemovalProcessor::tensor_to_mask(&flat, &transform).unwrap();
        assert!(mask.data.iter().all(|&v| v == 128));

        let saturated = Array4::<f32>::from_elem((1, 1, 2, 2), 3.0);
        let mask = BackgroundRemovalProcessor::tensor_to_mask(&saturated, &transform).unwrap();
        assert!(mask.data.iter().all(|&v| v == 255));
    }

    #[test]
    fn test_tensor_to_mask_rejects_bad_output() {
        let transform = LetterboxTransform::fit(4, 4, 4, 4).unwrap();

        let wrong_channels = Array4::<f32>::zeros((1, 2, 4, 4));
        assert!(matches!(
            BackgroundRemovalProcessor::tensor_to_mask(&wrong_channels, &transform),
            Err(BgRemovalError::Processing(_))
        ));

        let too_small = Array4::<f32>::zeros((1, 1, 2, 2));
        assert!(BackgroundRemovalProcessor::tensor_to_mask(&too_small, &transform).is_err());

        let mut nan = Array4::<f32>::zeros((1, 1, 4, 4));
        nan[[0, 0, 0, 0]] = f32::NAN;
        assert!(BackgroundRemovalProcessor::tensor_to_mask(&nan, &transform).is_err());
    }

    #[test]
    fn test_apply_background_removal_zeroes_transparent_pixels() {
        let image = solid_image(2, 1);
        let mask = SegmentationMask::new(vec![0, 128], (2, 1));
        let result = BackgroundRemovalProcessor::apply_background_removal(&image, &mask).unwrap();
        assert_eq!(result.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(result.get_pixel(1, 0).0, [10, 200, 30, 128]);

        let wrong = SegmentationMask::new(vec![0; 4], (2, 2));
        assert!(BackgroundRemovalProcessor::apply_background_removal(&image, &wrong).is_err());
    }

    #[test]
    fn test_input_transparency_is_kept() {
        let pixels = vec![9, 9, 9, 0, 50, 60, 70, 128, 1, 2, 3, 255];
        let image = DynamicImage::ImageRgba8(RgbaImage::from_vec(3, 1, pixels).unwrap());
        let mask = SegmentationMask::new(vec![255, 255, 128], (3, 1));
        let result = BackgroundRemovalProcessor::apply_background_removal(&image, &mask).unwrap();

        // Transparent input stays transparent under a foreground mask
        assert_eq!(result.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(result.get_pixel(1, 0).0, [50, 60, 70, 128]);
        assert_eq!(result.get_pixel(2, 0).0, [1, 2, 3, 128]);
    }

    #[test]
    fn test_transparent_input_stays_transparent_end_to_end() {
        let mut processor = BackgroundRemovalProcessor::new(mock_config()).unwrap();
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(100, 100, Rgba([9, 9, 9, 0])));

        let result = processor.process_image(&image).unwrap();
        assert_eq!(result.image.get_pixel(50, 50).0, [0, 0, 0, 0]);
        assert!(result.image.pixels().all(|p| p[3] == 0));
    }
}
