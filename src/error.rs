//! Error types for the background removal service

use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Error types raised while validating, decoding, segmenting and encoding images
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Request carried no image payload
    #[error("{0}")]
    InvalidInput(String),

    /// Payload is not valid base64
    #[error("{0}")]
    InvalidEncoding(String),

    /// Decoded bytes are not a recognized raster format
    #[error("{0}")]
    UnreadableFormat(String),

    /// Bytes were identified as an image but failed to decode
    #[error("Error decoding image: {0}")]
    Decode(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding or buffer errors outside of request decoding
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Model download errors
    #[error("Network error: {0}")]
    Network(String),

    /// Segmentation produced an unusable result
    #[error("Processing error: {0}")]
    Processing(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Client-visible classification of a [`BgRemovalError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    InvalidEncoding,
    UnreadableFormat,
    DecodeError,
    ProcessingError,
    InternalError,
}

impl ErrorKind {
    /// HTTP status code reported for this kind
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::InvalidInput | Self::InvalidEncoding | Self::UnreadableFormat | Self::DecodeError => {
                400
            },
            Self::ProcessingError | Self::InternalError => 500,
        }
    }

    #[must_use]
    pub fn is_client_error(self) -> bool {
        self.status_code() < 500
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InvalidInput => "InvalidInput",
            Self::InvalidEncoding => "InvalidEncoding",
            Self::UnreadableFormat => "UnreadableFormat",
            Self::DecodeError => "DecodeError",
            Self::ProcessingError => "ProcessingError",
            Self::InternalError => "InternalError",
        };
        f.write_str(name)
    }
}

impl BgRemovalError {
    /// Empty or missing image field
    #[must_use]
    pub fn invalid_input() -> Self {
        Self::InvalidInput("No image data provided".to_string())
    }

    /// Malformed base64 payload
    #[must_use]
    pub fn invalid_encoding() -> Self {
        Self::InvalidEncoding("Invalid base64 string".to_string())
    }

    /// Bytes that no registered image format recognizes
    #[must_use]
    pub fn unreadable_format() -> Self {
        Self::UnreadableFormat("Invalid image format".to_string())
    }

    /// Create a new decode error carrying the underlying cause
    pub fn decode<S: Into<String>>(cause: S) -> Self {
        Self::Decode(cause.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a network error for model downloads with the underlying cause
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create processing error with stage context
    #[must_use]
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {})", info),
            None => String::new(),
        };

        Self::Processing(format!(
            "Processing failed at stage '{}'{}: {}",
            stage, input_context, details
        ))
    }

    /// Classify this error for the HTTP boundary.
    ///
    /// Model, inference and segmentation failures are `ProcessingError`; everything
    /// the service itself should never hit is `InternalError`.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::InvalidEncoding(_) => ErrorKind::InvalidEncoding,
            Self::UnreadableFormat(_) => ErrorKind::UnreadableFormat,
            Self::Decode(_) => ErrorKind::DecodeError,
            Self::Inference(_) | Self::Model(_) | Self::Processing(_) | Self::Network(_) => {
                ErrorKind::ProcessingError
            },
            Self::Io(_) | Self::Image(_) | Self::InvalidConfig(_) | Self::Internal(_) => {
                ErrorKind::InternalError
            },
        }
    }

    /// HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}
