//! Chunk partitioning: split a pixel grid into worker-owned regions.
//!
//! Every stage writes only inside the [`Partition::owned`] region of the
//! partition it was handed, and owned regions cover the grid exactly
//! once. Neighborhood stages (edge detection, feathering, inpainting,
//! convolution) may additionally read the surrounding
//! [`Partition::halo`], which always refers to an immutable input buffer
//! from the previous stage.
//!
//! Two layouts are provided:
//!
//! - [`Layout::Tiles`]: near-square tiles with side
//!   `⌈√(H·W / workers)⌉`, used by 2D stages so each tile's halo is small
//!   relative to its area.
//! - [`Layout::RowBands`]: full-width bands of `⌈H / workers⌉` rows, used
//!   by histogram-style stages where only height matters.
//!
//! On each axis the final tile or band is clipped to the remaining
//! rows/columns, so no region ever exceeds the grid bounds.

use crate::types::Dimensions;

/// An axis-aligned rectangle of pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    /// Left column (inclusive).
    pub x: u32,
    /// Top row (inclusive).
    pub y: u32,
    /// Number of columns.
    pub width: u32,
    /// Number of rows.
    pub height: u32,
}

impl Region {
    /// Create a region from its top-left corner and size.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Region covering an entire grid.
    #[must_use]
    pub const fn full(dimensions: Dimensions) -> Self {
        Self::new(0, 0, dimensions.width, dimensions.height)
    }

    /// One past the right-most column.
    #[must_use]
    pub const fn x_end(self) -> u32 {
        self.x + self.width
    }

    /// One past the bottom row.
    #[must_use]
    pub const fn y_end(self) -> u32 {
        self.y + self.height
    }

    /// Number of pixels in the region.
    #[must_use]
    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Returns `true` if the region holds no pixels.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether `(x, y)` lies inside the region.
    #[must_use]
    pub const fn contains(self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x_end() && y >= self.y && y < self.y_end()
    }

    /// Grow the region by `margin` pixels on every side, clipped to
    /// `bounds`.
    #[must_use]
    pub fn expand(self, margin: u32, bounds: Dimensions) -> Self {
        let x = self.x.saturating_sub(margin);
        let y = self.y.saturating_sub(margin);
        let x_end = self.x_end().saturating_add(margin).min(bounds.width);
        let y_end = self.y_end().saturating_add(margin).min(bounds.height);
        Self::new(x, y, x_end - x, y_end - y)
    }

    /// Row-major index of `(x, y)` within this region.
    ///
    /// The coordinate must lie inside the region.
    #[must_use]
    pub const fn local_index(self, x: u32, y: u32) -> usize {
        (y - self.y) as usize * self.width as usize + (x - self.x) as usize
    }
}

/// A worker's share of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Cells this worker writes. Owned regions never overlap.
    pub owned: Region,
    /// Cells this worker may read: `owned` grown by the halo radius and
    /// clipped to the grid.
    pub halo: Region,
}

/// How a grid is split among workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Near-square tiles, for 2D neighborhood stages.
    Tiles,
    /// Full-width row bands, for histogram-style stages.
    RowBands,
}

impl Layout {
    /// Partition a grid for `workers` workers with the given halo radius.
    ///
    /// Returns an empty list when the grid is empty or `workers` is zero.
    #[must_use]
    pub fn partition(self, dimensions: Dimensions, workers: usize, halo: u32) -> Vec<Partition> {
        match self {
            Self::Tiles => tiles(dimensions, workers, halo),
            Self::RowBands => row_bands(dimensions, workers, halo),
        }
    }
}

/// Side length of a near-square tile: `⌈√(H·W / workers)⌉`, at least 1.
#[must_use]
pub fn tile_side(dimensions: Dimensions, workers: usize) -> u32 {
    let workers = u64::try_from(workers.max(1)).unwrap_or(u64::MAX);
    // ⌈√x⌉ == ⌈√⌈x⌉⌉ because no perfect square lies strictly between x
    // and ⌈x⌉.
    let per_worker = dimensions.pixel_count().div_ceil(workers);
    let side = ceil_sqrt(per_worker).max(1);
    u32::try_from(side).unwrap_or(u32::MAX)
}

/// Height of a row band: `⌈H / workers⌉`, at least 1.
#[must_use]
pub fn band_rows(dimensions: Dimensions, workers: usize) -> u32 {
    let workers = u32::try_from(workers.max(1)).unwrap_or(u32::MAX);
    dimensions.height.div_ceil(workers).max(1)
}

/// Split a grid into near-square tiles, in row-major tile order.
#[must_use]
pub fn tiles(dimensions: Dimensions, workers: usize, halo: u32) -> Vec<Partition> {
    if dimensions.is_empty() || workers == 0 {
        return Vec::new();
    }
    let side = tile_side(dimensions, workers);
    let mut partitions = Vec::new();
    let mut y = 0;
    while y < dimensions.height {
        let height = side.min(dimensions.height - y);
        let mut x = 0;
        while x < dimensions.width {
            let width = side.min(dimensions.width - x);
            let owned = Region::new(x, y, width, height);
            partitions.push(Partition {
                owned,
                halo: owned.expand(halo, dimensions),
            });
            x += width;
        }
        y += height;
    }
    partitions
}

/// Split a grid into full-width row bands, top to bottom.
#[must_use]
pub fn row_bands(dimensions: Dimensions, workers: usize, halo: u32) -> Vec<Partition> {
    if dimensions.is_empty() || workers == 0 {
        return Vec::new();
    }
    let rows = band_rows(dimensions, workers);
    let mut partitions = Vec::new();
    let mut y = 0;
    while y < dimensions.height {
        let height = rows.min(dimensions.height - y);
        let owned = Region::new(0, y, dimensions.width, height);
        partitions.push(Partition {
            owned,
            halo: owned.expand(halo, dimensions),
        });
        y += height;
    }
    partitions
}

fn ceil_sqrt(n: u64) -> u64 {
    let root = n.isqrt();
    if root * root < n { root + 1 } else { root }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coverage(dimensions: Dimensions, partitions: &[Partition]) -> Vec<u32> {
        let mut counts = vec![0_u32; usize::try_from(dimensions.pixel_count()).unwrap_or(0)];
        for p in partitions {
            for y in p.owned.y..p.owned.y_end() {
                for x in p.owned.x..p.owned.x_end() {
                    counts[y as usize * dimensions.width as usize + x as usize] += 1;
                }
            }
        }
        counts
    }

    #[test]
    fn ceil_sqrt_values() {
        assert_eq!(ceil_sqrt(0), 0);
        assert_eq!(ceil_sqrt(1), 1);
        assert_eq!(ceil_sqrt(2), 2);
        assert_eq!(ceil_sqrt(16), 4);
        assert_eq!(ceil_sqrt(17), 5);
    }

    #[test]
    fn tile_side_matches_formula() {
        // 100x100 over 4 workers: sqrt(2500) = 50.
        assert_eq!(tile_side(Dimensions::new(100, 100), 4), 50);
        // 10x10 over 3 workers: sqrt(33.3) -> 6.
        assert_eq!(tile_side(Dimensions::new(10, 10), 3), 6);
        // More workers than pixels still yields 1-pixel tiles.
        assert_eq!(tile_side(Dimensions::new(2, 2), 64), 1);
    }

    #[test]
    fn tiles_cover_every_cell_exactly_once() {
        for (w, h) in [(1, 1), (7, 3), (10, 10), (33, 17), (5, 64)] {
            let dims = Dimensions::new(w, h);
            for workers in [1, 2, 3, 4, 8, 13] {
                let parts = tiles(dims, workers, 2);
                assert!(
                    coverage(dims, &parts).iter().all(|&c| c == 1),
                    "{w}x{h} with {workers} workers not covered exactly once",
                );
            }
        }
    }

    #[test]
    fn row_bands_cover_every_cell_exactly_once() {
        for (w, h) in [(1, 1), (7, 3), (10, 10), (33, 17)] {
            let dims = Dimensions::new(w, h);
            for workers in [1, 2, 3, 4, 8, 13] {
                let parts = row_bands(dims, workers, 0);
                assert!(coverage(dims, &parts).iter().all(|&c| c == 1));
            }
        }
    }

    #[test]
    fn last_band_is_clipped() {
        let parts = row_bands(Dimensions::new(4, 10), 4, 0);
        // ceil(10 / 4) = 3 rows per band: 3, 3, 3, 1.
        let heights: Vec<u32> = parts.iter().map(|p| p.owned.height).collect();
        assert_eq!(heights, vec![3, 3, 3, 1]);
        assert!(parts.iter().all(|p| p.owned.width == 4));
    }

    #[test]
    fn halo_is_clipped_to_bounds() {
        let dims = Dimensions::new(10, 10);
        for p in tiles(dims, 4, 3) {
            assert!(p.halo.x_end() <= 10 && p.halo.y_end() <= 10);
            assert!(p.halo.x <= p.owned.x && p.halo.y <= p.owned.y);
            assert!(p.halo.x_end() >= p.owned.x_end());
            assert!(p.halo.y_end() >= p.owned.y_end());
        }
    }

    #[test]
    fn interior_halo_extends_by_radius() {
        let dims = Dimensions::new(30, 30);
        let region = Region::new(10, 10, 5, 5);
        let grown = region.expand(2, dims);
        assert_eq!(grown, Region::new(8, 8, 9, 9));
    }

    #[test]
    fn zero_workers_or_empty_grid_yields_nothing() {
        assert!(tiles(Dimensions::new(10, 10), 0, 0).is_empty());
        assert!(row_bands(Dimensions::new(10, 10), 0, 0).is_empty());
        assert!(tiles(Dimensions::new(0, 10), 4, 0).is_empty());
        assert!(row_bands(Dimensions::new(10, 0), 4, 0).is_empty());
    }

    #[test]
    fn region_helpers() {
        let r = Region::new(2, 3, 4, 5);
        assert_eq!(r.x_end(), 6);
        assert_eq!(r.y_end(), 8);
        assert_eq!(r.area(), 20);
        assert!(r.contains(2, 3));
        assert!(r.contains(5, 7));
        assert!(!r.contains(6, 7));
        assert_eq!(r.local_index(2, 3), 0);
        assert_eq!(r.local_index(5, 4), 7);
        assert!(Region::new(0, 0, 0, 3).is_empty());
    }

    #[test]
    fn layout_dispatches() {
        let dims = Dimensions::new(8, 8);
        assert_eq!(Layout::Tiles.partition(dims, 4, 1), tiles(dims, 4, 1));
        assert_eq!(Layout::RowBands.partition(dims, 4, 1), row_bands(dims, 4, 1));
    }
}
