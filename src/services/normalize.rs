//! Caps image size before segmentation

use crate::config::DEFAULT_MAX_DIMENSION;
use image::{imageops::FilterType, DynamicImage};
use tracing::info;

/// Downscales images whose larger side exceeds `max_dimension`
#[derive(Debug, Clone, Copy)]
pub struct SizeNormalizer {
    max_dimension: u32,
}

impl Default for SizeNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION)
    }
}

impl SizeNormalizer {
    #[must_use]
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }

    #[must_use]
    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// New size for a `width x height` image, or `None` if it already fits.
    ///
    /// Both sides are scaled by `max_dimension / max(width, height)` and
    /// rounded down, never below one pixel.
    #[must_use]
    pub fn target_dimensions(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        let largest = width.max(height);
        if largest <= self.max_dimension {
            return None;
        }

        let scale = |side: u32| -> u32 {
            let scaled = u64::from(side) * u64::from(self.max_dimension) / u64::from(largest);
            u32::try_from(scaled).unwrap_or(self.max_dimension).max(1)
        };
        Some((scale(width), scale(height)))
    }

    /// Resize with Lanczos3 when over the limit, otherwise return `image` untouched
    #[must_use]
    pub fn normalize(&self, image: DynamicImage) -> DynamicImage {
        match self.target_dimensions(image.width(), image.height()) {
            Some((width, height)) => {
                let resized = image.resize_exact(width, height, FilterType::Lanczos3);
                info!("Resized image to ({}, {})", width, height);
                resized
            },
            None => image,
        }
    }
}
