//! Damage detection: classify every pixel as damaged or normal.
//!
//! Scratches and overexposed stains show up as near-white pixels, so a
//! pixel is damaged when the sum of its 8-bit R, G and B channels exceeds
//! a threshold (427 by default, a mean channel value of about 142).
//!
//! There is no cross-pixel dependency: the grid is split into tiles with
//! no halo and each worker classifies its own tile.
//!
//! This is stage 1 of the pipeline.

use image::{Luma, Rgba};

use crate::parallel::Workers;
use crate::partition::Layout;
use crate::types::{Dimensions, FloatMap, GrayImage, RgbaImage};

/// Mask value of a damaged pixel.
pub const DAMAGED: f32 = 1.0;

/// Mask value of a normal pixel.
pub const NORMAL: f32 = 0.0;

/// Whether `pixel` counts as damaged under `threshold`.
#[must_use]
pub fn is_damaged(pixel: Rgba<u8>, threshold: u32) -> bool {
    let [r, g, b, _] = pixel.0;
    u32::from(r) + u32::from(g) + u32::from(b) > threshold
}

/// Whether a mask cell marks a damaged pixel.
#[must_use]
pub fn is_damaged_cell(value: f32) -> bool {
    value >= DAMAGED
}

/// Build the binary damage mask of `image`.
///
/// Returns a grid of [`DAMAGED`] / [`NORMAL`] values with the same
/// dimensions as the image.
#[must_use = "returns the damage mask"]
pub fn detect_damage(image: &RgbaImage, threshold: u32, workers: &Workers) -> FloatMap {
    let mask = workers.render(Dimensions::of(image), Layout::Tiles, 0, |x, y| {
        if is_damaged(*image.get_pixel(x, y), threshold) {
            Luma([DAMAGED])
        } else {
            Luma([NORMAL])
        }
    });
    log::debug!(
        "mask: {} of {} pixels damaged (threshold {threshold})",
        count_damaged(&mask),
        Dimensions::of(&mask).pixel_count(),
    );
    mask
}

/// Number of damaged cells in a mask.
#[must_use]
pub fn count_damaged(mask: &FloatMap) -> u64 {
    mask.pixels()
        .map(|p| u64::from(is_damaged_cell(p.0[0])))
        .sum()
}

/// Render a mask as an opaque image: white where damaged, black
/// elsewhere.
#[must_use = "returns the mask preview image"]
pub fn mask_preview(mask: &FloatMap) -> RgbaImage {
    RgbaImage::from_fn(mask.width(), mask.height(), |x, y| {
        if is_damaged_cell(mask.get_pixel(x, y).0[0]) {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

/// Render a `[0, 1]` map (edges, feathered mask) as an 8-bit grayscale
/// image.
#[must_use = "returns the grayscale preview image"]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn map_preview(map: &FloatMap) -> GrayImage {
    GrayImage::from_fn(map.width(), map.height(), |x, y| {
        let v = map.get_pixel(x, y).0[0];
        Luma([(v * 255.0).round().clamp(0.0, 255.0) as u8])
    })
}
