//! Raster image decoding with truncation recovery
//!
//! Formats are sniffed from the leading bytes. A stream that is cut short
//! after a valid header still decodes: whatever rows arrived are kept and
//! the rest of the canvas stays zeroed.

use crate::error::{BgRemovalError, Result};
use image::{
    error::ImageError, DynamicImage, ExtendedColorType, ImageBuffer, ImageDecoder as _,
    ImageFormat, ImageReader,
};
use std::io::Cursor;

/// Decodes request bytes into a [`DynamicImage`]
pub struct ImageDecoder;

impl ImageDecoder {
    /// Decode `bytes`, tolerating truncated input
    ///
    /// # Errors
    ///
    /// - `UnreadableFormat` when no supported format matches the data
    /// - `Decode` for any other decoding failure, carrying the cause
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| BgRemovalError::decode(e.to_string()))?;

        let Some(format) = reader.format() else {
            return Err(BgRemovalError::unreadable_format());
        };

        match reader.decode() {
            Ok(image) => Ok(image),
            Err(ImageError::Unsupported(e)) => {
                tracing::debug!("Unsupported {:?} image: {}", format, e);
                Err(BgRemovalError::unreadable_format())
            },
            Err(e) if Self::is_truncation(&e) => {
                tracing::warn!("Truncated {:?} stream, keeping partial data: {}", format, e);
                Self::decode_partial(bytes, format)
                    .map_err(|partial| BgRemovalError::decode(partial.to_string()))
            },
            Err(e) => Err(BgRemovalError::decode(e.to_string())),
        }
    }

    /// Whether `error` means the stream ended early
    fn is_truncation(error: &ImageError) -> bool {
        if let ImageError::IoError(io) = error {
            if io.kind() == std::io::ErrorKind::UnexpectedEof {
                return true;
            }
        }
        let message = error.to_string().to_ascii_lowercase();
        ["eof", "end of", "truncat", "not enough data", "unexpected end"]
            .iter()
            .any(|needle| message.contains(needle))
    }

    /// Decode into a zeroed buffer and keep it even if the decoder stops early
    fn decode_partial(bytes: &[u8], format: ImageFormat) -> std::result::Result<DynamicImage, ImageError> {
        let decoder = ImageReader::with_format(Cursor::new(bytes), format).into_decoder()?;
        let (width, height) = decoder.dimensions();
        let color = decoder.color_type();
        let total = usize::try_from(decoder.total_bytes()).map_err(|_| {
            ImageError::Limits(image::error::LimitError::from_kind(
                image::error::LimitErrorKind::InsufficientMemory,
            ))
        })?;

        let mut buffer = vec![0u8; total];
        if let Err(e) = decoder.read_image(&mut buffer) {
            tracing::debug!("Partial decode stopped early: {}", e);
        }

        Self::buffer_to_image(width, height, color.into(), buffer).ok_or_else(|| {
            ImageError::Unsupported(image::error::UnsupportedError::from_format_and_kind(
                format.into(),
                image::error::UnsupportedErrorKind::Color(color.into()),
            ))
        })
    }

    fn buffer_to_image(
        width: u32,
        height: u32,
        color: ExtendedColorType,
        buffer: Vec<u8>,
    ) -> Option<DynamicImage> {
        let image = match color {
            ExtendedColorType::L8 => DynamicImage::ImageLuma8(ImageBuffer::from_raw(width, height, buffer)?),
            ExtendedColorType::La8 => DynamicImage::ImageLumaA8(ImageBuffer::from_raw(width, height, buffer)?),
            ExtendedColorType::Rgb8 => DynamicImage::ImageRgb8(ImageBuffer::from_raw(width, height, buffer)?),
            ExtendedColorType::Rgba8 => DynamicImage::ImageRgba8(ImageBuffer::from_raw(width, height, buffer)?),
            ExtendedColorType::L16 => {
                DynamicImage::ImageLuma16(ImageBuffer::from_raw(width, height, to_u16(&buffer))?)
            },
            ExtendedColorType::La16 => {
                DynamicImage::ImageLumaA16(ImageBuffer::from_raw(width, height, to_u16(&buffer))?)
            },
            ExtendedColorType::Rgb16 => {
                DynamicImage::ImageRgb16(ImageBuffer::from_raw(width, height, to_u16(&buffer))?)
            },
            ExtendedColorType::Rgba16 => {
                DynamicImage::ImageRgba16(ImageBuffer::from_raw(width, height, to_u16(&buffer))?)
            },
            ExtendedColorType::Rgb32F => {
                DynamicImage::ImageRgb32F(ImageBuffer::from_raw(width, height, to_f32(&buffer))?)
            },
            ExtendedColorType::Rgba32F => {
                DynamicImage::ImageRgba32F(ImageBuffer::from_raw(width, height, to_f32(&buffer))?)
            },
            _ => return None,
        };
        Some(image)
    }
}

// Decoders write samples in native byte order
fn to_u16(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|c| u16::from_ne_bytes([c[0], c[1]]))
        .collect()
}

fn to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
