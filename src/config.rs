//! Configuration types for the background removal server

use crate::error::BgRemovalError;
use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Port used when neither `--port` nor `PORT` is set
pub const DEFAULT_PORT: u16 = 8080;

/// Largest side of an image handed to the model
pub const DEFAULT_MAX_DIMENSION: u32 = 1500;

/// Responses smaller than this are sent uncompressed
pub const DEFAULT_GZIP_MIN_SIZE: u16 = 1000;

/// Request body limit (base64 inflates payloads by a third)
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown execution provider '{}'. Expected one of: auto, cpu, cuda, coreml",
                other
            ))),
        }
    }
}

/// Configuration for the segmentation model runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalConfig {
    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Skip the on-disk model cache when resolving downloaded models
    pub disable_cache: bool,

    /// Model specification including source and optional sidecar config
    pub model_spec: ModelSpec,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
            disable_cache: false,
            model_spec: ModelSpec::default(),
        }
    }
}

impl RemovalConfig {
    /// Create a new configuration builder
    ///
    /// ```rust
    /// use bgremove_server::{ExecutionProvider, RemovalConfig};
    ///
    /// let config = RemovalConfig::builder()
    ///     .execution_provider(ExecutionProvider::Cpu)
    ///     .num_threads(4)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.inter_threads, 2);
    /// ```
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::default()
    }

    /// Validate thread counts
    pub fn validate(&self) -> crate::Result<()> {
        let max_threads = 1024;
        if self.intra_threads > max_threads {
            return Err(BgRemovalError::config_value_error(
                "intra_threads",
                self.intra_threads,
                "0-1024",
                None,
            ));
        }
        if self.inter_threads > max_threads {
            return Err(BgRemovalError::config_value_error(
                "inter_threads",
                self.inter_threads,
                "0-1024",
                None,
            ));
        }
        Ok(())
    }
}

/// Builder for `RemovalConfig`
#[derive(Debug, Default)]
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
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

    /// Set both intra and inter threads (`threads` intra, `threads/2` inter, 0 = auto)
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    #[must_use]
    pub fn disable_cache(mut self, disable: bool) -> Self {
        self.config.disable_cache = disable;
        self
    }

    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> crate::Result<RemovalConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}

/// When the model handle is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InitMode {
    /// Load the model before the listener binds
    #[default]
    Eager,
    /// Load the model on the first request
    Lazy,
}

/// HTTP surface configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,

    /// Larger image side is capped at this many pixels before segmentation
    pub max_dimension: u32,

    /// Minimum response size in bytes before gzip kicks in
    pub gzip_min_size: u16,

    /// Maximum accepted request body in bytes
    pub max_body_bytes: usize,

    pub init_mode: InitMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_dimension: DEFAULT_MAX_DIMENSION,
            gzip_min_size: DEFAULT_GZIP_MIN_SIZE,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            init_mode: InitMode::default(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Defaults with the port taken from the `PORT` environment variable
    pub fn from_env() -> crate::Result<Self> {
        let port = port_from_env(std::env::var("PORT").ok().as_deref())?;
        Self::builder().port(port).build()
    }

    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_dimension == 0 || self.max_dimension > 16384 {
            return Err(BgRemovalError::config_value_error(
                "max_dimension",
                self.max_dimension,
                "1-16384",
                Some(DEFAULT_MAX_DIMENSION),
            ));
        }

        if self.max_body_bytes < 1024 {
            return Err(BgRemovalError::config_value_error(
                "max_body_bytes",
                self.max_body_bytes,
                ">= 1024",
                Some(DEFAULT_MAX_BODY_BYTES),
            ));
        }

        Ok(())
    }
}

/// Resolve the listening port from an optional `PORT` value
pub fn port_from_env(value: Option<&str>) -> crate::Result<u16> {
    match value.map(str::trim) {
        None | Some("") => Ok(DEFAULT_PORT),
        Some(raw) => raw.parse::<u16>().map_err(|_| {
            BgRemovalError::config_value_error("PORT", raw, "0-65535", Some("8080"))
        }),
    }
}

/// Builder for `ServerConfig`
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn host(mut self, host: IpAddr) -> Self {
        self.config.host = host;
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn max_dimension(mut self, max_dimension: u32) -> Self {
        self.config.max_dimension = max_dimension;
        self
    }

    #[must_use]
    pub fn gzip_min_size(mut self, bytes: u16) -> Self {
        self.config.gzip_min_size = bytes;
        self
    }

    #[must_use]
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.config.max_body_bytes = bytes;
        self
    }

    #[must_use]
    pub fn init_mode(mut self, mode: InitMode) -> Self {
        self.config.init_mode = mode;
        self
    }

    pub fn build(self) -> crate::Result<ServerConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
