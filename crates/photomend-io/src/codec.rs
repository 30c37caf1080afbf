//! Image decoding and encoding.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces the RGBA
//! grid the restoration pipeline consumes, and encodes restored grids
//! back to bytes.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat};
use photomend_pipeline::RgbaImage;

use crate::error::CodecError;

/// Format used when neither the input nor the caller names one.
pub const DEFAULT_FORMAT: ImageFormat = ImageFormat::Png;

/// Decode raw image bytes into an RGBA grid.
///
/// # Errors
///
/// Returns [`CodecError::EmptyInput`] if `bytes` is empty.
/// Returns [`CodecError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<RgbaImage, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::EmptyInput);
    }
    let img = image::load_from_memory(bytes).map_err(CodecError::ImageDecode)?;
    Ok(img.to_rgba8())
}

/// Encode `image` in `format`.
///
/// JPEG has no alpha channel, so alpha is dropped for it.
///
/// # Errors
///
/// Returns [`CodecError::ImageEncode`] if the format is not supported
/// or encoding fails.
pub fn encode(image: &RgbaImage, format: ImageFormat) -> Result<Vec<u8>, CodecError> {
    let dynamic = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image.clone()).to_rgb8())
    } else {
        DynamicImage::ImageRgba8(image.clone())
    };
    let mut out = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut out, format)
        .map_err(CodecError::ImageEncode)?;
    Ok(out.into_inner())
}

/// Image format implied by a file extension.
#[must_use]
pub fn format_from_path(path: &Path) -> Option<ImageFormat> {
    ImageFormat::from_path(path).ok()
}

/// Image format of encoded bytes, detected from their magic number.
#[must_use]
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}
