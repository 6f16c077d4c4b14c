//! Response encoding: optimized PNG wrapped in base64

use crate::error::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{
    codecs::png::{CompressionType, FilterType, PngEncoder},
    ImageEncoder, RgbaImage,
};

/// Encodes cut-outs for the JSON response
pub struct ResponseEncoder;

impl ResponseEncoder {
    /// PNG with best compression and adaptive row filters, alpha preserved
    pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let encoder =
            PngEncoder::new_with_quality(&mut bytes, CompressionType::Best, FilterType::Adaptive);
        encoder.write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )?;
        Ok(bytes)
    }

    /// Standard alphabet, padded
    #[must_use]
    pub fn to_base64(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    pub fn encode(image: &RgbaImage) -> Result<String> {
        Ok(Self::to_base64(&Self::encode_png(image)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};

    #[test]
    fn test_encode_produces_rgba_png() {
        let mut image = RgbaImage::from_pixel(12, 7, Rgba([0, 0, 0, 0]));
        image.put_pixel(3, 4, Rgba([200, 100, 50, 128]));

        let encoded = ResponseEncoder::encode(&image).unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);

        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (12, 7));
        assert_eq!(decoded.get_pixel(3, 4), &Rgba([200, 100, 50, 128]));
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_base64_is_padded_standard_alphabet() {
        assert_eq!(ResponseEncoder::to_base64(b"hi"), "aGk=");
    }
}
