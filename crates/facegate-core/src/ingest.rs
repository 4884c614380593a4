//! Image ingestion: data URLs and raw encoded bytes into decoded bitmaps.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is not a data URL (missing ',' separator)")]
    MissingSeparator,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("undecodable image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a `<mime-prefix>,<base64-payload>` data URL into a bitmap.
///
/// Only the first comma separates prefix from payload; the prefix itself is
/// not inspected, the container format is sniffed from the decoded bytes.
pub fn decode_data_url(data_url: &str) -> Result<DynamicImage, DecodeError> {
    let (_, payload) = data_url
        .split_once(',')
        .ok_or(DecodeError::MissingSeparator)?;
    let bytes = STANDARD.decode(payload.trim())?;
    decode_image(&bytes)
}

/// Decode an encoded image container (PNG, JPEG, ...) with format sniffing.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
    Ok(image::load_from_memory(bytes)?)
}
