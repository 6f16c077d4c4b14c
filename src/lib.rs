#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Background Removal Server
//!
//! HTTP service that strips the background from images. A client posts a
//! base64 encoded image and receives a base64 PNG in which every background
//! pixel is transparent.
//!
//! ## Endpoints
//!
//! - `POST /remove-background` with `{"image": "<base64>"}`, answered with
//!   `{"image": "<base64 PNG>"}` or `{"detail": "<message>"}` on failure
//! - `GET /health` answered with `{"status": "healthy"}`
//!
//! ## Pipeline
//!
//! Each request runs through five stages in order, stopping at the first failure:
//!
//! 1. [`services::PayloadValidator`] strips an optional data-URI prefix and checks the base64
//! 2. [`services::ImageDecoder`] decodes the raster, keeping whatever a truncated file holds
//! 3. [`services::SizeNormalizer`] caps the larger side at 1500 pixels
//! 4. [`BackgroundRemovalProcessor`] runs the segmentation model and applies the mask as alpha
//! 5. [`services::ResponseEncoder`] writes an optimized RGBA PNG and base64 encodes it
//!
//! ## Embedding the router
//!
//! ```rust,no_run
//! use bgremove_server::{
//!     AppState, BackendType, ProcessorConfig, RemovalPipeline, ServerConfig,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let server_config = ServerConfig::builder().port(3000).build()?;
//! let processor_config = ProcessorConfig::builder()
//!     .backend_type(BackendType::Onnx)
//!     .build()?;
//!
//! let pipeline = RemovalPipeline::from_config(&server_config, processor_config)?;
//! pipeline.initialize().await?;
//!
//! let app = bgremove_server::router(AppState::new(pipeline), &server_config);
//! let listener = tokio::net::TcpListener::bind(server_config.socket_addr()).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): the `bgremove-server` binary
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`: JSON log output

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod pipeline;
pub mod processor;
pub mod server;
pub mod services;
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use backends::*;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{ExecutionProvider, InitMode, RemovalConfig, ServerConfig};
pub use download::{validate_model_url, DownloadProgress, ModelDownloader};
pub use error::{BgRemovalError, ErrorKind, Result};
pub use inference::InferenceBackend;
pub use models::{ModelManager, ModelSource, ModelSpec};
pub use pipeline::RemovalPipeline;
pub use processor::{
    BackendFactory, BackendType, BackgroundRemovalProcessor, DefaultBackendFactory,
    ProcessorConfig, ProcessorConfigBuilder,
};
pub use server::{router, serve, ApiError, AppState};
pub use services::{ImageDecoder, PayloadValidator, ResponseEncoder, SizeNormalizer};
pub use tracing_config::{TracingConfig, TracingFormat};
pub use types::{ProcessingTimings, RemovalResult, SegmentationMask};
pub use utils::{ImagePreprocessor, LetterboxTransform, PreprocessingOptions};
