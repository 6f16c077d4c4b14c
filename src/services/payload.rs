//! Request payload validation and base64 decoding

use crate::error::{BgRemovalError, Result};
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};

/// Marker that ends a data-URI header such as `data:image/png;base64,`
pub const DATA_URI_MARKER: &str = "base64,";

/// Standard alphabet, padding optional, non-canonical trailing bits accepted
const TOLERANT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Validates the `image` field of a request and turns it into raw bytes
pub struct PayloadValidator;

impl PayloadValidator {
    /// Drop a data-URI header.
    ///
    /// Everything between the first `base64,` marker and the next one (or the
    /// end of the string) is the payload. Strings without a marker are
    /// returned unchanged.
    #[must_use]
    pub fn strip_data_uri(raw: &str) -> &str {
        raw.split(DATA_URI_MARKER).nth(1).unwrap_or(raw)
    }

    /// Alphabet and length check: `A-Z a-z 0-9 + / =`, length a multiple of 4
    #[must_use]
    pub fn is_valid_base64(payload: &str) -> bool {
        payload.len() % 4 == 0
            && payload
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
    }

    /// Strip any data-URI header and check the remaining payload
    ///
    /// # Errors
    ///
    /// - `InvalidInput` when the field (or the part after the header) is empty
    /// - `InvalidEncoding` when the payload is not base64
    pub fn validate(raw: &str) -> Result<&str> {
        if raw.is_empty() {
            return Err(BgRemovalError::invalid_input());
        }

        let payload = Self::strip_data_uri(raw);
        if payload.is_empty() {
            return Err(BgRemovalError::invalid_input());
        }
        if !Self::is_valid_base64(payload) {
            return Err(BgRemovalError::invalid_encoding());
        }
        Ok(payload)
    }

    /// Decode an already validated payload
    ///
    /// # Errors
    ///
    /// `InvalidEncoding` when the decoder rejects the padding layout
    pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
        TOLERANT.decode(payload).map_err(|e| {
            tracing::debug!("Base64 decode rejected payload: {}", e);
            BgRemovalError::invalid_encoding()
        })
    }

    /// [`validate`](Self::validate) followed by [`decode_base64`](Self::decode_base64)
    pub fn decode(raw: &str) -> Result<Vec<u8>> {
        Self::decode_base64(Self::validate(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_strip_data_uri() {
        assert_eq!(
            PayloadValidator::strip_data_uri("data:image/png;base64,AAAA"),
            "AAAA"
        );
        assert_eq!(PayloadValidator::strip_data_uri("AAAA"), "AAAA");
        // Only the segment after the first marker is kept
        assert_eq!(
            PayloadValidator::strip_data_uri("x;base64,AAAA;base64,BBBB"),
            "AAAA;"
        );
        assert_eq!(PayloadValidator::strip_data_uri("data:image/png;base64,"), "");
    }

    #[test]
    fn test_empty_payload_is_invalid_input() {
        let err = PayloadValidator::validate("").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "No image data provided");

        let err = PayloadValidator::validate("data:image/png;base64,").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_invalid_base64_is_invalid_encoding() {
        for bad in ["hello world", "abc", "ab#d", "QUJD\n", "QUJD-_=="] {
            let err = PayloadValidator::validate(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidEncoding, "input {bad:?}");
            assert_eq!(err.to_string(), "Invalid base64 string");
        }
    }

    #[test]
    fn test_valid_payloads_decode() {
        assert_eq!(
            PayloadValidator::decode("aGVsbG8gd29ybGQ=").unwrap(),
            b"hello world"
        );
        assert_eq!(
            PayloadValidator::decode("data:text/plain;base64,aGk=").unwrap(),
            b"hi"
        );
    }

    #[test]
    fn test_non_canonical_trailing_bits_accepted() {
        // "aGl=" carries non-zero trailing bits; canonical form is "aGk="
        assert_eq!(PayloadValidator::decode("aGl=").unwrap(), b"hi");
    }

    #[test]
    fn test_misplaced_padding_is_invalid_encoding() {
        let err = PayloadValidator::decode("A===").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEncoding);
    }
}
