//! Distance- and edge-weighted inpainting.
//!
//! Every pixel with a non-zero feather weight is replaced by a weighted
//! average of the undamaged pixels in a square neighborhood around it.
//! A neighbor at offset `(dx, dy)` contributes with weight
//! `(1 - edge) / (√(dx² + dy²) + 1e-6)`: close neighbors dominate, and
//! neighbors sitting on strong edges are discounted so structure on the
//! far side of an edge does not bleed in.
//!
//! Pixels within `radius` of the image border search the wider
//! `border_radius` instead, since clipping leaves them fewer candidates.
//!
//! Workers read only from the immutable input snapshot and each output
//! cell is computed by the worker that owns it.

use image::Rgba;

use crate::{feather, mask};
use crate::parallel::Workers;
use crate::partition::Layout;
use crate::types::{Dimensions, FloatMap, PipelineError, RgbaImage, ensure_dimensions};

/// Offset added to neighbor distances so the center pixel has finite
/// weight.
pub const DISTANCE_OFFSET: f64 = 1e-6;

/// Neighborhood sizes for [`inpaint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InpaintRadius {
    /// Search radius for interior pixels.
    pub interior: u32,
    /// Search radius for pixels within `interior` of any border.
    pub border: u32,
}

impl InpaintRadius {
    /// Search radius for the pixel at `(x, y)`.
    #[must_use]
    pub const fn at(self, dimensions: Dimensions, x: u32, y: u32) -> u32 {
        let r = self.interior;
        let near_border = x < r
            || y < r
            || x >= dimensions.width.saturating_sub(r)
            || y >= dimensions.height.saturating_sub(r);
        if near_border { self.border } else { r }
    }
}

/// Blend the undamaged neighbors of `(x, y)`.
///
/// Returns `None` when no neighbor carries any weight.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blend(
    image: &RgbaImage,
    mask: &FloatMap,
    edges: &FloatMap,
    x: u32,
    y: u32,
    radius: u32,
) -> Option<[u8; 3]> {
    let x0 = x.saturating_sub(radius);
    let y0 = y.saturating_sub(radius);
    let x1 = x.saturating_add(radius).min(image.width() - 1);
    let y1 = y.saturating_add(radius).min(image.height() - 1);

    let mut sums = [0.0_f64; 3];
    let mut total = 0.0_f64;
    for ny in y0..=y1 {
        let dy = f64::from(ny) - f64::from(y);
        for nx in x0..=x1 {
            if mask::is_damaged_cell(mask.get_pixel(nx, ny).0[0]) {
                continue;
            }
            let dx = f64::from(nx) - f64::from(x);
            let edge_weight = 1.0 - f64::from(edges.get_pixel(nx, ny).0[0]);
            let weight = edge_weight / (dx.hypot(dy) + DISTANCE_OFFSET);
            let px = image.get_pixel(nx, ny).0;
            for (sum, &c) in sums.iter_mut().zip(&px[..3]) {
                *sum += f64::from(c) * weight;
            }
            total += weight;
        }
    }

    if total <= 0.0 {
        return None;
    }
    Some(sums.map(|s| (s / total).round().clamp(0.0, 255.0) as u8))
}

/// Inpaint the damaged areas of `image`.
///
/// `mask` selects which neighbors may be sampled, `feathered` selects
/// which pixels are rewritten and `edges` attenuates neighbor weights.
/// Alpha is always taken from the source pixel.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if any map does not match
/// the image's dimensions.
pub fn inpaint(
    image: &RgbaImage,
    mask: &FloatMap,
    feathered: &FloatMap,
    edges: &FloatMap,
    radius: InpaintRadius,
    workers: &Workers,
) -> Result<RgbaImage, PipelineError> {
    let dimensions = Dimensions::of(image);
    ensure_dimensions("inpaint mask", dimensions, Dimensions::of(mask))?;
    ensure_dimensions("inpaint feathered mask", dimensions, Dimensions::of(feathered))?;
    ensure_dimensions("inpaint edges", dimensions, Dimensions::of(edges))?;

    let halo = radius.border.max(radius.interior);
    let output = workers.render(dimensions, Layout::Tiles, halo, |x, y| {
        let source = *image.get_pixel(x, y);
        if feathered.get_pixel(x, y).0[0] <= 0.0 {
            return source;
        }
        let r = radius.at(dimensions, x, y);
        match blend(image, mask, edges, x, y, r) {
            Some([red, green, blue]) => Rgba([red, green, blue, source.0[3]]),
            None => source,
        }
    });
    log::debug!(
        "inpaint: {} pixels blended (radius {}, border radius {})",
        feather::count_weighted(feathered),
        radius.interior,
        radius.border,
    );
    Ok(output)
}
