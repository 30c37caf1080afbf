//! Sobel edge detection.
//!
//! Produces a map of gradient magnitudes normalized to `[0, 1]` by the
//! global maximum, with weak responses zeroed. Downstream stages use the
//! map to stop feathering and inpainting from bleeding across real image
//! structure.
//!
//! The computation has two barriers:
//!
//! 1. Tiles (halo 1) compute raw gradients into worker-owned buffers; each
//!    worker merges its local maximum into a [`Reducer`].
//! 2. After the join, row bands divide every cell by the global maximum
//!    and zero values below the threshold. The threshold is applied after
//!    normalization, so it does not depend on image brightness.
//!
//! The one-pixel border is always zero because the 3x3 kernels cannot be
//! centered there.

use image::{Luma, Rgba};

use crate::parallel::{self, Workers};
use crate::partition::Layout;
use crate::reduce::{Maximum, Reducer};
use crate::types::{Dimensions, FloatMap, RgbaImage};

/// Horizontal Sobel kernel.
pub const SOBEL_X: [[i32; 3]; 3] = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]];

/// Vertical Sobel kernel.
pub const SOBEL_Y: [[i32; 3]; 3] = [[-1, -2, -1], [0, 0, 0], [1, 2, 1]];

/// Output of [`detect_edges`].
#[derive(Debug, Clone)]
pub struct EdgeDetection {
    /// Normalized, thresholded gradient magnitudes in `[0, 1]`.
    pub edges: FloatMap,
    /// Largest raw gradient magnitude before normalization.
    pub max_gradient: f32,
}

/// Unweighted gray level of a pixel: `(R + G + B) / 3`, in `[0, 255]`.
#[must_use]
pub fn intensity(pixel: Rgba<u8>) -> f32 {
    let [r, g, b, _] = pixel.0;
    f32::from(u16::from(r) + u16::from(g) + u16::from(b)) / 3.0
}

/// Sobel gradient magnitude at `(x, y)`.
///
/// The kernel cannot center on the one-pixel border, so border and
/// out-of-range coordinates yield `0.0`.
#[must_use]
pub fn sobel_gradient(image: &RgbaImage, x: u32, y: u32) -> f32 {
    if on_border(Dimensions::of(image), x, y) {
        return 0.0;
    }
    let mut gx = 0.0_f32;
    let mut gy = 0.0_f32;
    for (ky, (row_x, row_y)) in SOBEL_X.iter().zip(&SOBEL_Y).enumerate() {
        for (kx, (&wx, &wy)) in row_x.iter().zip(row_y).enumerate() {
            // ky, kx are 0..3, offset by one to center the kernel.
            let px = *image.get_pixel(x + kx as u32 - 1, y + ky as u32 - 1);
            let gray = intensity(px);
            #[allow(clippy::cast_precision_loss)]
            {
                gx += gray * wx as f32;
                gy += gray * wy as f32;
            }
        }
    }
    gx.hypot(gy)
}

/// Whether `(x, y)` lies on the one-pixel border of `dimensions`.
const fn on_border(dimensions: Dimensions, x: u32, y: u32) -> bool {
    x == 0
        || y == 0
        || x >= dimensions.width.saturating_sub(1)
        || y >= dimensions.height.saturating_sub(1)
}

/// Detect edges in `image`.
///
/// Values below `threshold` after normalization are set to exactly `0.0`.
/// A flat image (global maximum of zero) yields an all-zero map.
#[must_use = "returns the edge map"]
pub fn detect_edges(image: &RgbaImage, threshold: f32, workers: &Workers) -> EdgeDetection {
    let dimensions = Dimensions::of(image);

    // Phase 1: raw gradients per tile, local maxima into the reducer.
    let partitions = workers.partition(dimensions, Layout::Tiles, 1);
    let max_reducer = Reducer::new(Maximum::default());
    let tiles = workers.run(&partitions, |p| {
        let region = p.owned;
        let mut local_max = Maximum::default();
        let mut out = Vec::with_capacity(usize::try_from(region.area()).unwrap_or(0));
        for y in region.y..region.y_end() {
            for x in region.x..region.x_end() {
                let g = if on_border(dimensions, x, y) {
                    0.0
                } else {
                    sobel_gradient(image, x, y)
                };
                if g > local_max.0 {
                    local_max.0 = g;
                }
                out.push(Luma([g]));
            }
        }
        max_reducer.merge(local_max);
        out
    });
    let merges = max_reducer.merge_count();
    let max_gradient = max_reducer.finalize().0;
    let mut edges: FloatMap = parallel::stitch(dimensions, &partitions, tiles);

    // Phase 2: normalize by the global maximum and zero weak responses.
    if max_gradient > 0.0 {
        workers.for_each_band(&mut edges, dimensions, 1, |_, band| {
            for v in band.iter_mut() {
                let normalized = *v / max_gradient;
                *v = if normalized < threshold { 0.0 } else { normalized };
            }
        });
    }

    log::debug!(
        "edges: {} partitions merged, max gradient {max_gradient:.3}, {} edge pixels",
        merges,
        count_edge_pixels(&edges),
    );
    EdgeDetection {
        edges,
        max_gradient,
    }
}

/// Number of cells with a non-zero edge response.
#[must_use]
pub fn count_edge_pixels(edges: &FloatMap) -> u64 {
    edges.pixels().map(|p| u64::from(p.0[0] > 0.0)).sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::RestoreConfig;

    const THRESHOLD: f32 = RestoreConfig::DEFAULT_EDGE_THRESHOLD;

    /// 10x10 image with a sharp vertical black/white boundary at x = 5.
    fn sharp_edge_image() -> RgbaImage {
        RgbaImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        })
    }

    #[test]
    fn intensity_is_channel_mean() {
        assert!((intensity(Rgba([30, 60, 90, 0])) - 60.0).abs() < f32::EPSILON);
        assert!((intensity(Rgba([255, 255, 255, 255])) - 255.0).abs() < f32::EPSILON);
    }

    #[test]
    fn flat_image_has_no_edges() {
        let workers = Workers::new(2).unwrap();
        let img = RgbaImage::from_pixel(5, 5, Rgba([128, 128, 128, 255]));
        let result = detect_edges(&img, THRESHOLD, &workers);
        assert!(result.max_gradient.abs() < f32::EPSILON);
        assert!(result.edges.pixels().all(|p| p.0[0] == 0.0));
    }

    #[test]
    fn step_edge_gradient_matches_kernel_weights() {
        let workers = Workers::new(4).unwrap();
        let result = detect_edges(&sharp_edge_image(), THRESHOLD, &workers);
        // One full column of 255 against 0 weighted 1 + 2 + 1.
        assert!((result.max_gradient - 1020.0).abs() < 1e-3);
        for y in 1..9 {
            assert!((result.edges.get_pixel(4, y).0[0] - 1.0).abs() < f32::EPSILON);
            assert!((result.edges.get_pixel(5, y).0[0] - 1.0).abs() < f32::EPSILON);
            assert!(result.edges.get_pixel(2, y).0[0] == 0.0);
            assert!(result.edges.get_pixel(7, y).0[0] == 0.0);
        }
    }

    #[test]
    fn border_is_always_zero() {
        let workers = Workers::new(3).unwrap();
        let img = RgbaImage::from_fn(12, 9, |x, y| {
            let v = u8::try_from((x * 41 + y * 17) % 256).unwrap();
            Rgba([v, 255 - v, v / 2, 255])
        });
        let edges = detect_edges(&img, THRESHOLD, &workers).edges;
        for (x, y, p) in edges.enumerate_pixels() {
            if x == 0 || y == 0 || x == 11 || y == 8 {
                assert!(p.0[0] == 0.0, "border pixel ({x},{y}) = {}", p.0[0]);
            }
        }
    }

    #[test]
    fn values_normalized_and_thresholded() {
        let workers = Workers::new(4).unwrap();
        let img = RgbaImage::from_fn(20, 20, |x, y| {
            let v = u8::try_from((x * x + 3 * y) % 256).unwrap();
            Rgba([v, v, v, 255])
        });
        let edges = detect_edges(&img, THRESHOLD, &workers).edges;
        let mut saw_one = false;
        for p in edges.pixels() {
            let v = p.0[0];
            assert!((0.0..=1.0).contains(&v), "value {v} out of range");
            assert!(v == 0.0 || v >= THRESHOLD, "value {v} below threshold");
            saw_one |= v == 1.0;
        }
        assert!(saw_one, "the global maximum should normalize to exactly 1.0");
    }

    #[test]
    fn tiny_images_are_all_border() {
        let workers = Workers::new(2).unwrap();
        for (w, h) in [(1, 1), (2, 5), (5, 2)] {
            let img = RgbaImage::from_fn(w, h, |x, _| Rgba([u8::try_from(x * 60).unwrap(), 0, 0, 255]));
            let result = detect_edges(&img, THRESHOLD, &workers);
            assert!(result.edges.pixels().all(|p| p.0[0] == 0.0));
        }
    }

    #[test]
    fn gradient_is_zero_on_border() {
        let img = RgbaImage::from_fn(4, 4, |x, _| Rgba([u8::try_from(x * 80).unwrap(), 0, 0, 255]));
        for (x, y) in [(0, 0), (0, 2), (3, 1), (2, 3), (9, 9)] {
            assert!(sobel_gradient(&img, x, y) == 0.0, "({x},{y})");
        }
        assert!(sobel_gradient(&img, 1, 1) > 0.0);
    }

    #[test]
    fn edges_identical_across_worker_counts() {
        let img = RgbaImage::from_fn(37, 23, |x, y| {
            let v = u8::try_from((x * 7 + y * y) % 256).unwrap();
            Rgba([v, v.wrapping_mul(5), 200 - v % 200, 255])
        });
        let reference = detect_edges(&img, THRESHOLD, &Workers::new(1).unwrap());
        for count in [2, 4, 8] {
            let result = detect_edges(&img, THRESHOLD, &Workers::new(count).unwrap());
            assert_eq!(result.edges, reference.edges, "{count} workers");
            assert!(result.max_gradient.to_bits() == reference.max_gradient.to_bits());
        }
    }

    #[test]
    fn count_edge_pixels_counts_nonzero() {
        let map = FloatMap::from_fn(4, 1, |x, _| Luma([if x % 2 == 0 { 0.0 } else { 0.5 }]));
        assert_eq!(count_edge_pixels(&map), 2);
    }
}
