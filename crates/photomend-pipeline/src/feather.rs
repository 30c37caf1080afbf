//! Edge-aware mask feathering.
//!
//! Turns the binary damage mask into a smooth `[0, 1]` weight map so that
//! inpainting fades into the surrounding pixels instead of leaving hard
//! seams. Every damaged pixel spreads an exponential falloff
//! `exp(-d² / R²)` over its radius-`R` disc, attenuated by `1 - edge` at
//! the receiving pixel so the spread stops at real image structure.
//! Overlapping contributions combine by maximum.
//!
//! Each worker scatters the damaged sources of its owned tile into a
//! private [`FeatherWindow`] covering the tile's halo (radius `R`), then
//! merges the window into the shared map through a [`Reducer`]. Max is
//! associative and commutative, so the result does not depend on how the
//! grid was split.

use crate::mask::{self, DAMAGED};
use crate::parallel::Workers;
use crate::partition::{Layout, Region};
use crate::reduce::{Merge, Reducer};
use crate::types::{Dimensions, FloatMap, PipelineError, RestoreConfig, ensure_dimensions};

/// Contributions below this weight are discarded.
pub const EPSILON: f32 = 0.01;

/// A worker's private feather accumulator over one region of the map.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatherWindow {
    /// Area of the map this window covers.
    pub region: Region,
    /// Row-major values for `region`.
    pub values: Vec<f32>,
}

impl FeatherWindow {
    /// An all-zero window over `region`.
    #[must_use]
    pub fn new(region: Region) -> Self {
        let len = usize::try_from(region.area()).unwrap_or(0);
        Self {
            region,
            values: vec![0.0; len],
        }
    }

    /// Raise the cell at global `(x, y)` to at least `value`.
    ///
    /// Coordinates outside the window are ignored.
    pub fn raise(&mut self, x: u32, y: u32, value: f32) {
        if !self.region.contains(x, y) {
            return;
        }
        let cell = &mut self.values[self.region.local_index(x, y)];
        if value > *cell {
            *cell = value;
        }
    }
}

impl Merge<FeatherWindow> for FloatMap {
    fn merge(&mut self, partial: FeatherWindow) {
        let region = partial.region;
        let mut values = partial.values.into_iter();
        for y in region.y..region.y_end() {
            for x in region.x..region.x_end() {
                let Some(v) = values.next() else { return };
                let cell = &mut self.get_pixel_mut(x, y).0[0];
                if v > *cell {
                    *cell = v;
                }
            }
        }
    }
}

/// Falloff weight of a pixel at squared distance `d2` from a damaged
/// source, before edge attenuation.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn falloff(d2: u64, radius: u32) -> f32 {
    let r2 = u64::from(radius) * u64::from(radius);
    (-(d2 as f32) / r2 as f32).exp()
}

/// Scatter one damaged source at `(sx, sy)` into `window`.
fn scatter(window: &mut FeatherWindow, edges: &FloatMap, sx: u32, sy: u32, radius: u32) {
    window.raise(sx, sy, DAMAGED);
    let r2 = u64::from(radius) * u64::from(radius);
    let reach = window.region;
    let x0 = sx.saturating_sub(radius).max(reach.x);
    let y0 = sy.saturating_sub(radius).max(reach.y);
    let x1 = sx.saturating_add(radius).min(reach.x_end().saturating_sub(1));
    let y1 = sy.saturating_add(radius).min(reach.y_end().saturating_sub(1));
    for ny in y0..=y1 {
        let dy = u64::from(ny.abs_diff(sy));
        for nx in x0..=x1 {
            let dx = u64::from(nx.abs_diff(sx));
            let d2 = (dx * dx).saturating_add(dy * dy);
            if d2 == 0 || d2 > r2 {
                continue;
            }
            let edge = edges.get_pixel(nx, ny).0[0];
            let weight = falloff(d2, radius) * (1.0 - edge);
            if weight >= EPSILON {
                window.raise(nx, ny, weight);
            }
        }
    }
}

/// Feather `mask` over `radius` pixels, attenuated by `edges`.
///
/// Damaged cells stay exactly `1.0`. A radius of zero returns the mask
/// unchanged.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if `edges` does not match
/// the mask's dimensions and [`PipelineError::InvalidConfig`] if `radius`
/// exceeds [`RestoreConfig::MAX_RADIUS`].
pub fn feather(
    mask: &FloatMap,
    edges: &FloatMap,
    radius: u32,
    workers: &Workers,
) -> Result<FloatMap, PipelineError> {
    let dimensions = Dimensions::of(mask);
    ensure_dimensions("feather", dimensions, Dimensions::of(edges))?;
    if radius > RestoreConfig::MAX_RADIUS {
        return Err(PipelineError::InvalidConfig(format!(
            "feather radius must not exceed {}, got {radius}",
            RestoreConfig::MAX_RADIUS,
        )));
    }
    if radius == 0 {
        return Ok(mask.clone());
    }

    let partitions = workers.partition(dimensions, Layout::Tiles, radius);
    let reducer = Reducer::new(FloatMap::new(dimensions.width, dimensions.height));
    workers.run(&partitions, |p| {
        let mut window = FeatherWindow::new(p.halo);
        let owned = p.owned;
        for y in owned.y..owned.y_end() {
            for x in owned.x..owned.x_end() {
                if mask::is_damaged_cell(mask.get_pixel(x, y).0[0]) {
                    scatter(&mut window, edges, x, y, radius);
                }
            }
        }
        log::trace!("feather window {:?} ready", p.halo);
        reducer.merge(window);
    });
    let merges = reducer.merge_count();
    let feathered = reducer.finalize();

    log::debug!(
        "feather: radius {radius}, {merges} windows merged, {} pixels weighted",
        count_weighted(&feathered),
    );
    Ok(feathered)
}

/// Number of cells with a non-zero feather weight.
#[must_use]
pub fn count_weighted(feathered: &FloatMap) -> u64 {
    feathered.pixels().map(|p| u64::from(p.0[0] > 0.0)).sum()
}
