//! Backend implementations for different inference engines
//!
//! - ONNX Runtime backend (high performance, GPU acceleration)
//! - Tract backend (pure Rust, no external dependencies)
//! - Mock backend (deterministic mask, no model file)

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

pub mod mock;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;

pub use self::mock::{CallHistory, MockBackend};
