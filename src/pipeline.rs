//! Request pipeline: validate, decode, normalize, remove background, encode
//!
//! A [`RemovalPipeline`] is built once at startup and shared by every
//! request. The processor sits behind a mutex so model calls are serialized,
//! and all CPU-bound work runs on tokio's blocking pool.

use crate::{
    config::ServerConfig,
    error::{BgRemovalError, Result},
    processor::{BackgroundRemovalProcessor, ProcessorConfig},
    services::{ImageDecoder, PayloadValidator, ResponseEncoder, SizeNormalizer},
};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument};

/// Shared handle to the model plus the per-request stages
#[derive(Clone)]
pub struct RemovalPipeline {
    processor: Arc<Mutex<BackgroundRemovalProcessor>>,
    normalizer: SizeNormalizer,
}

impl RemovalPipeline {
    #[must_use]
    pub fn new(processor: BackgroundRemovalProcessor, max_dimension: u32) -> Self {
        Self {
            processor: Arc::new(Mutex::new(processor)),
            normalizer: SizeNormalizer::new(max_dimension),
        }
    }

    /// Build the processor described by `processor_config` for `server`
    pub fn from_config(server: &ServerConfig, processor_config: ProcessorConfig) -> Result<Self> {
        let processor = BackgroundRemovalProcessor::new(processor_config)?;
        Ok(Self::new(processor, server.max_dimension))
    }

    #[must_use]
    pub fn max_dimension(&self) -> u32 {
        self.normalizer.max_dimension()
    }

    fn lock_processor(&self) -> Result<MutexGuard<'_, BackgroundRemovalProcessor>> {
        self.processor
            .lock()
            .map_err(|_| BgRemovalError::processing("Model lock poisoned by an earlier failure"))
    }

    /// Load the model now instead of on the first request
    pub async fn initialize(&self) -> Result<()> {
        let pipeline = self.clone();
        run_blocking(move || pipeline.lock_processor()?.initialize()).await
    }

    /// Whether the model has been loaded
    pub fn is_initialized(&self) -> bool {
        self.lock_processor()
            .map(|processor| processor.is_initialized())
            .unwrap_or(false)
    }

    /// Run every stage on the calling thread and return the base64 PNG
    #[instrument(skip_all, fields(payload_len = raw.len()))]
    pub fn remove_background_blocking(&self, raw: &str) -> Result<String> {
        let bytes = PayloadValidator::decode(raw)?;
        let image = ImageDecoder::decode(&bytes)?;
        debug!(
            width = image.width(),
            height = image.height(),
            color = ?image.color(),
            "Decoded input image"
        );

        let image = self.normalizer.normalize(image);

        let result = {
            let mut processor = self.lock_processor()?;
            processor.process_image(&image)?
        };
        debug!(
            inference_ms = result.timings.inference_ms,
            total_ms = result.timings.total_ms,
            "Background removed"
        );

        ResponseEncoder::encode(&result.image)
    }

    /// Async entry point used by the HTTP handler
    pub async fn remove_background(&self, raw: String) -> Result<String> {
        let pipeline = self.clone();
        let encoded = run_blocking(move || pipeline.remove_background_blocking(&raw)).await?;
        info!("Background removal completed successfully");
        Ok(encoded)
    }
}

/// Run `work` on the blocking pool; a panic inside it becomes `Internal`
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) => Err(BgRemovalError::internal(format!(
            "Background removal task failed: {}",
            e
        ))),
    }
}
