//! Image to tensor preprocessing
//!
//! Letterboxes an image into the model's input size (aspect preserving
//! resize, centred on a padded canvas) and normalises it into an NCHW tensor.

use crate::{
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
};
use image::{DynamicImage, ImageBuffer, RgbImage};
use ndarray::Array4;

/// Configuration for preprocessing behavior
#[derive(Debug, Clone)]
pub struct PreprocessingOptions {
    /// Padding color for aspect ratio preservation (RGB)
    pub padding_color: [u8; 3],
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self {
            padding_color: [255, 255, 255],
        }
    }
}

/// Where the original image ended up inside the model input canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub original_width: u32,
    pub original_height: u32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl LetterboxTransform {
    /// Fit `width x height` into `target_width x target_height`
    pub fn fit(width: u32, height: u32, target_width: u32, target_height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(BgRemovalError::processing_stage_error(
                "preprocessing",
                "image has zero width or height",
                Some(&format!("{}x{}", width, height)),
            ));
        }
        if target_width == 0 || target_height == 0 {
            return Err(BgRemovalError::invalid_config(format!(
                "Model input size {}x{} is empty",
                target_width, target_height
            )));
        }

        let scale = (f64::from(target_width) / f64::from(width))
            .min(f64::from(target_height) / f64::from(height));
        let scaled_width = ((f64::from(width) * scale).round() as u32).clamp(1, target_width);
        let scaled_height = ((f64::from(height) * scale).round() as u32).clamp(1, target_height);

        Ok(Self {
            original_width: width,
            original_height: height,
            scaled_width,
            scaled_height,
            offset_x: (target_width - scaled_width) / 2,
            offset_y: (target_height - scaled_height) / 2,
        })
    }
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Letterbox `image` into the model input and build the normalised tensor
    pub fn preprocess_image(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
        options: &PreprocessingOptions,
    ) -> Result<(LetterboxTransform, Array4<f32>)> {
        let [target_height, target_width] = preprocessing_config.target_size;

        let rgb_image = image.to_rgb8();
        let (orig_width, orig_height) = rgb_image.dimensions();
        let transform = LetterboxTransform::fit(orig_width, orig_height, target_width, target_height)?;

        let resized = image::imageops::resize(
            &rgb_image,
            transform.scaled_width,
            transform.scaled_height,
            image::imageops::FilterType::Triangle,
        );

        let mut canvas =
            ImageBuffer::from_pixel(target_width, target_height, image::Rgb(options.padding_color));
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(transform.offset_x),
            i64::from(transform.offset_y),
        );

        let tensor = Self::canvas_to_tensor(&canvas, preprocessing_config);
        Ok((transform, tensor))
    }

    /// Convert canvas to normalized tensor
    fn canvas_to_tensor(canvas: &RgbImage, preprocessing_config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;

        Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, channel, y, x)| {
                let value = canvas.get_pixel(x as u32, y as u32)[channel];
                (f32::from(value) / 255.0 - mean[channel]) / std[channel]
            },
        )
    }

    /// Tensor only, white padding
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<(LetterboxTransform, Array4<f32>)> {
        Self::preprocess_image(image, preprocessing_config, &PreprocessingOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([255, 0, 0])))
    }

    #[test]
    fn test_preprocess_square_target() {
        let config = PreprocessingConfig::default();
        let (transform, tensor) =
            ImagePreprocessor::preprocess_for_inference(&create_test_image(100, 100), &config)
                .unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 320, 320]);
        assert_eq!((transform.scaled_width, transform.scaled_height), (320, 320));
        assert_eq!((transform.offset_x, transform.offset_y), (0, 0));

        // Red channel of a pure red pixel: (1 - 0.485) / 0.229
        let expected = (1.0 - 0.485) / 0.229;
        assert!((tensor[[0, 0, 160, 160]] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_preprocess_letterbox_padding() {
        let config = PreprocessingConfig::default();
        let options = PreprocessingOptions {
            padding_color: [0, 255, 0],
        };
        let (transform, tensor) =
            ImagePreprocessor::preprocess_image(&create_test_image(200, 100), &config, &options)
                .unwrap();

        assert_eq!((transform.scaled_width, transform.scaled_height), (320, 160));
        assert_eq!((transform.offset_x, transform.offset_y), (0, 80));

        // Top rows are padding: green channel saturated
        let green_padding = (1.0 - 0.456) / 0.224;
        assert!((tensor[[0, 1, 0, 0]] - green_padding).abs() < 1e-5);
        // Centre is image content: green channel empty
        let green_content = (0.0 - 0.456) / 0.224;
        assert!((tensor[[0, 1, 160, 160]] - green_content).abs() < 1e-5);
    }

    #[test]
    fn test_preprocess_non_square_target() {
        let config = PreprocessingConfig {
            target_size: [256, 192],
            ..PreprocessingConfig::default()
        };
        let (transform, tensor) =
            ImagePreprocessor::preprocess_for_inference(&create_test_image(10, 40), &config)
                .unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 256, 192]);
        assert_eq!((transform.scaled_width, transform.scaled_height), (64, 256));
        assert_eq!(transform.offset_x, 64);
    }

    #[test]
    fn test_letterbox_extreme_aspect_ratio() {
        let transform = LetterboxTransform::fit(5000, 1, 320, 320).unwrap();
        assert_eq!(transform.scaled_width, 320);
        assert_eq!(transform.scaled_height, 1);
        assert!(LetterboxTransform::fit(0, 10, 320, 320).is_err());
    }
}
