//! Shared helpers used by the processor

pub mod preprocessing;

pub use preprocessing::{ImagePreprocessor, LetterboxTransform, PreprocessingOptions};
