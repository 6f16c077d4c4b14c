//! Core types produced by the background removal processor

use crate::error::{BgRemovalError, Result};
use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};

/// Result of a background removal operation
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// Input pixels with the mask applied as alpha
    pub image: RgbaImage,

    /// The segmentation mask used for removal
    pub mask: SegmentationMask,

    /// Per-stage timings
    pub timings: ProcessingTimings,
}

impl RemovalResult {
    #[must_use]
    pub fn new(image: RgbaImage, mask: SegmentationMask, timings: ProcessingTimings) -> Self {
        Self {
            image,
            mask,
            timings,
        }
    }

    /// Output dimensions as `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// Foreground probability per pixel, 0 (background) to 255 (foreground)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationMask {
    /// Mask data as grayscale values (0-255), row major
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    #[must_use]
    pub fn from_image(image: &GrayImage) -> Self {
        Self::new(image.as_raw().clone(), image.dimensions())
    }

    /// Convert mask to a grayscale image
    pub fn to_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        GrayImage::from_raw(width, height, self.data.clone())
            .ok_or_else(|| BgRemovalError::processing("Failed to create image from mask data"))
    }

    /// Resize the mask to new dimensions
    pub fn resize(&self, new_width: u32, new_height: u32) -> Result<SegmentationMask> {
        if (new_width, new_height) == self.dimensions {
            return Ok(self.clone());
        }
        let resized = image::imageops::resize(
            &self.to_image()?,
            new_width,
            new_height,
            image::imageops::FilterType::Lanczos3,
        );
        Ok(Self::from_image(&resized))
    }

    /// Share of pixels above half opacity
    #[must_use]
    pub fn foreground_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let foreground = self.data.iter().filter(|&&v| v > 127).count();
        foreground as f32 / self.data.len() as f32
    }
}

/// Timing breakdown for one processed image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Model loading time (first call only)
    pub model_load_ms: u64,

    /// Letterbox resize and tensor conversion
    pub preprocessing_ms: u64,

    /// Backend inference execution
    pub inference_ms: u64,

    /// Mask generation and alpha application
    pub postprocessing_ms: u64,

    /// Total end-to-end processing time
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Share of the total spent in inference
    #[must_use]
    pub fn inference_ratio(&self) -> f64 {
        if self.total_ms == 0 {
            0.0
        } else {
            self.inference_ms as f64 / self.total_ms as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_roundtrip_through_image() {
        let mask = SegmentationMask::new(vec![0, 64, 128, 255], (2, 2));
        let image = mask.to_image().unwrap();
        assert_eq!(image.get_pixel(1, 1)[0], 255);
        assert_eq!(SegmentationMask::from_image(&image), mask);
    }

    #[test]
    fn test_mask_with_wrong_length_fails() {
        let mask = SegmentationMask::new(vec![0; 3], (2, 2));
        assert!(mask.to_image().is_err());
    }

    #[test]
    fn test_mask_resize_and_ratio() {
        let mask = SegmentationMask::new(vec![255; 16], (4, 4));
        let resized = mask.resize(8, 2).unwrap();
        assert_eq!(resized.dimensions, (8, 2));
        assert_eq!(resized.data.len(), 16);
        assert!((resized.foreground_ratio() - 1.0).abs() < f32::EPSILON);

        let empty = SegmentationMask::new(Vec::new(), (0, 0));
        assert_eq!(empty.foreground_ratio(), 0.0);
    }

    #[test]
    fn test_inference_ratio() {
        let timings = ProcessingTimings {
            inference_ms: 30,
            total_ms: 120,
            ..ProcessingTimings::default()
        };
        assert!((timings.inference_ratio() - 0.25).abs() < f64::EPSILON);
        assert_eq!(ProcessingTimings::default().inference_ratio(), 0.0);
    }
}
