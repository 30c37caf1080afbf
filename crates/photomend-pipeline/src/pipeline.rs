//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::restore_staged`] which runs every stage in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use photomend_pipeline::{Pipeline, PipelineError, RestoreConfig, RgbaImage};
//! # fn run(image: RgbaImage) -> Result<(), PipelineError> {
//! let staged = Pipeline::new(image, RestoreConfig::default())?
//!     .detect_damage()
//!     .detect_edges()
//!     .feather()?
//!     .inpaint()?
//!     .correct_colors()
//!     .smooth()?
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state
//! (or `Result` for fallible stages), carrying every previously computed
//! intermediate. Each transition is a complete fork-join over the shared
//! [`Workers`] pool, so a stage never observes a partially written buffer
//! from the one before it.

use std::sync::Arc;

use crate::color;
use crate::diagnostics::StageMetrics;
use crate::inpaint::InpaintRadius;
use crate::parallel::Workers;
use crate::types::{Dimensions, FloatMap, PipelineError, RestoreConfig, RgbaImage, StagedResult};

/// State shared by every stage.
#[derive(Debug, Clone)]
struct Context {
    config: RestoreConfig,
    workers: Arc<Workers>,
    dimensions: Dimensions,
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`detect_damage`](Self::detect_damage) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .detect_damage() to continue"]
#[derive(Debug)]
pub struct Pending {
    ctx: Context,
    original: RgbaImage,
}

impl Pending {
    /// The input image.
    #[must_use]
    pub const fn original(&self) -> &RgbaImage {
        &self.original
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &RestoreConfig {
        &self.ctx.config
    }

    /// Worker pool shared by all stages.
    #[must_use]
    pub fn workers(&self) -> &Workers {
        &self.ctx.workers
    }

    /// Classify every pixel as damaged or normal.
    pub fn detect_damage(self) -> Masked {
        let mask = crate::mask::detect_damage(
            &self.original,
            self.ctx.config.damage_threshold,
            &self.ctx.workers,
        );
        Masked {
            ctx: self.ctx,
            original: self.original,
            mask,
        }
    }
}

// ───────────────────────── Stage 1: Masked ───────────────────────────

/// Pipeline state after damage detection.
///
/// Call [`detect_edges`](Self::detect_edges) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .detect_edges() to continue"]
#[derive(Debug)]
pub struct Masked {
    ctx: Context,
    original: RgbaImage,
    mask: FloatMap,
}

impl Masked {
    /// Binary damage mask (`1.0` = damaged).
    #[must_use]
    pub const fn mask(&self) -> &FloatMap {
        &self.mask
    }

    /// Stage metrics for diagnostics.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Mask {
            threshold: self.ctx.config.damage_threshold,
            damaged_pixel_count: crate::mask::count_damaged(&self.mask),
            total_pixel_count: self.ctx.dimensions.pixel_count(),
        }
    }

    /// Compute the Sobel edge map of the original image.
    pub fn detect_edges(self) -> EdgesDetected {
        let detection = crate::edge::detect_edges(
            &self.original,
            self.ctx.config.edge_threshold,
            &self.ctx.workers,
        );
        EdgesDetected {
            ctx: self.ctx,
            original: self.original,
            mask: self.mask,
            edges: detection.edges,
            max_gradient: detection.max_gradient,
        }
    }
}

// ───────────────────────── Stage 2: EdgesDetected ────────────────────

/// Pipeline state after edge detection.
///
/// Call [`feather`](Self::feather) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .feather() to continue"]
#[derive(Debug)]
pub struct EdgesDetected {
    ctx: Context,
    original: RgbaImage,
    mask: FloatMap,
    edges: FloatMap,
    max_gradient: f32,
}

impl EdgesDetected {
    /// Normalized, thresholded edge map.
    #[must_use]
    pub const fn edges(&self) -> &FloatMap {
        &self.edges
    }

    /// Largest raw gradient magnitude in the image.
    #[must_use]
    pub const fn max_gradient(&self) -> f32 {
        self.max_gradient
    }

    /// Stage metrics for diagnostics.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::EdgeDetection {
            threshold: self.ctx.config.edge_threshold,
            max_gradient: self.max_gradient,
            edge_pixel_count: crate::edge::count_edge_pixels(&self.edges),
            total_pixel_count: self.ctx.dimensions.pixel_count(),
        }
    }

    /// Feather the damage mask, attenuated by the edge map.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if the mask and edge
    /// map disagree.
    pub fn feather(self) -> Result<Feathered, PipelineError> {
        let feathered = crate::feather::feather(
            &self.mask,
            &self.edges,
            self.ctx.config.feather_radius,
            &self.ctx.workers,
        )?;
        Ok(Feathered {
            ctx: self.ctx,
            original: self.original,
            mask: self.mask,
            edges: self.edges,
            feathered,
        })
    }
}

// ───────────────────────── Stage 3: Feathered ────────────────────────

/// Pipeline state after feathering.
///
/// Call [`inpaint`](Self::inpaint) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .inpaint() to continue"]
#[derive(Debug)]
pub struct Feathered {
    ctx: Context,
    original: RgbaImage,
    mask: FloatMap,
    edges: FloatMap,
    feathered: FloatMap,
}

impl Feathered {
    /// Feathered blend weights in `[0, 1]`.
    #[must_use]
    pub const fn feathered(&self) -> &FloatMap {
        &self.feathered
    }

    /// Stage metrics for diagnostics.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Feather {
            radius: self.ctx.config.feather_radius,
            weighted_pixel_count: crate::feather::count_weighted(&self.feathered),
        }
    }

    /// Reconstruct every pixel with a non-zero feather weight.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if any intermediate
    /// grid disagrees with the image.
    pub fn inpaint(self) -> Result<Inpainted, PipelineError> {
        let radius = InpaintRadius {
            interior: self.ctx.config.inpaint_radius,
            border: self.ctx.config.inpaint_border_radius,
        };
        let inpainted = crate::inpaint::inpaint(
            &self.original,
            &self.mask,
            &self.feathered,
            &self.edges,
            radius,
            &self.ctx.workers,
        )?;
        Ok(Inpainted {
            ctx: self.ctx,
            original: self.original,
            mask: self.mask,
            edges: self.edges,
            feathered: self.feathered,
            inpainted,
        })
    }
}

// ───────────────────────── Stage 4: Inpainted ────────────────────────

/// Pipeline state after inpainting.
///
/// Call [`correct_colors`](Self::correct_colors) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .correct_colors() to continue"]
#[derive(Debug)]
pub struct Inpainted {
    ctx: Context,
    original: RgbaImage,
    mask: FloatMap,
    edges: FloatMap,
    feathered: FloatMap,
    inpainted: RgbaImage,
}

impl Inpainted {
    /// The inpainted image.
    #[must_use]
    pub const fn inpainted(&self) -> &RgbaImage {
        &self.inpainted
    }

    /// Stage metrics for diagnostics.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Inpaint {
            radius: self.ctx.config.inpaint_radius,
            border_radius: self.ctx.config.inpaint_border_radius,
            blended_pixel_count: crate::feather::count_weighted(&self.feathered),
        }
    }

    /// Equalize the color histograms, or pass the image through when
    /// `equalize_colors` is off.
    pub fn correct_colors(self) -> ColorCorrected {
        let (color_corrected, flat_channels) = if self.ctx.config.equalize_colors {
            let eq = color::equalize(&self.inpainted, &self.ctx.workers);
            (eq.image, Some(eq.flat_channels))
        } else {
            log::debug!("color: equalization disabled");
            (self.inpainted.clone(), None)
        };
        ColorCorrected {
            ctx: self.ctx,
            original: self.original,
            mask: self.mask,
            edges: self.edges,
            feathered: self.feathered,
            inpainted: self.inpainted,
            color_corrected,
            flat_channels,
        }
    }
}

// ───────────────────────── Stage 5: ColorCorrected ───────────────────

/// Pipeline state after color correction.
///
/// Call [`smooth`](Self::smooth) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .smooth() to continue"]
#[derive(Debug)]
pub struct ColorCorrected {
    ctx: Context,
    original: RgbaImage,
    mask: FloatMap,
    edges: FloatMap,
    feathered: FloatMap,
    inpainted: RgbaImage,
    color_corrected: RgbaImage,
    flat_channels: Option<usize>,
}

impl ColorCorrected {
    /// The color-corrected image.
    #[must_use]
    pub const fn color_corrected(&self) -> &RgbaImage {
        &self.color_corrected
    }

    /// Stage metrics for diagnostics.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        let average = |img: &RgbaImage| {
            color::average_color(img, &self.ctx.workers).map(|px| [px.0[0], px.0[1], px.0[2]])
        };
        StageMetrics::ColorCorrection {
            enabled: self.flat_channels.is_some(),
            flat_channels: self.flat_channels.unwrap_or(0),
            average_before: average(&self.inpainted).unwrap_or_default(),
            average_after: average(&self.color_corrected).unwrap_or_default(),
        }
    }

    /// Blur then sharpen, or pass the image through when `sharpen` is
    /// off.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for invalid kernel
    /// parameters.
    pub fn smooth(self) -> Result<Restored, PipelineError> {
        let restored = if self.ctx.config.sharpen {
            crate::blur::smooth_and_sharpen(
                &self.color_corrected,
                self.ctx.config.blur_kernel_size,
                self.ctx.config.blur_sigma,
                &self.ctx.workers,
            )?
        } else {
            log::debug!("smooth: disabled");
            self.color_corrected.clone()
        };
        Ok(Restored {
            ctx: self.ctx,
            original: self.original,
            mask: self.mask,
            edges: self.edges,
            feathered: self.feathered,
            inpainted: self.inpainted,
            color_corrected: self.color_corrected,
            restored,
        })
    }
}

// ───────────────────────── Stage 6: Restored ─────────────────────────

/// Final pipeline state.
///
/// Call [`into_result`](Self::into_result) to collect every
/// intermediate.
#[must_use = "call .into_result() to collect the restored image"]
#[derive(Debug)]
pub struct Restored {
    ctx: Context,
    original: RgbaImage,
    mask: FloatMap,
    edges: FloatMap,
    feathered: FloatMap,
    inpainted: RgbaImage,
    color_corrected: RgbaImage,
    restored: RgbaImage,
}

impl Restored {
    /// The final restored image.
    #[must_use]
    pub const fn restored(&self) -> &RgbaImage {
        &self.restored
    }

    /// Image dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.ctx.dimensions
    }

    /// Stage metrics for diagnostics.
    #[must_use]
    pub const fn metrics(&self) -> StageMetrics {
        StageMetrics::Smooth {
            enabled: self.ctx.config.sharpen,
            kernel_size: self.ctx.config.blur_kernel_size,
            sigma: self.ctx.config.blur_sigma,
        }
    }

    /// Consume the pipeline and return every intermediate.
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        StagedResult {
            original: self.original,
            mask: self.mask,
            edges: self.edges,
            feathered: self.feathered,
            inpainted: self.inpainted,
            color_corrected: self.color_corrected,
            restored: self.restored,
            dimensions: self.ctx.dimensions,
        }
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental restoration pipeline.
///
/// Each stage method consumes the current state and returns the next,
/// making it a compile-time error to skip stages or call them out of
/// order.
pub struct Pipeline;

impl Pipeline {
    /// Validate `config`, start a worker pool of `config.workers` threads
    /// and return the [`Pending`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the configuration is
    /// invalid, [`PipelineError::EmptyImage`] if the image has no pixels
    /// and [`PipelineError::ThreadPool`] if the pool cannot start.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(image: RgbaImage, config: RestoreConfig) -> Result<Pending, PipelineError> {
        config.validate()?;
        let workers = Arc::new(Workers::new(config.workers)?);
        Self::with_workers(image, config, workers)
    }

    /// Like [`new`](Self::new), but run every stage on an existing pool.
    ///
    /// The pool's size takes precedence over `config.workers`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the configuration is
    /// invalid and [`PipelineError::EmptyImage`] if the image has no
    /// pixels.
    pub fn with_workers(
        image: RgbaImage,
        mut config: RestoreConfig,
        workers: Arc<Workers>,
    ) -> Result<Pending, PipelineError> {
        config.workers = workers.count();
        config.validate()?;
        let dimensions = Dimensions::of(&image);
        if dimensions.is_empty() {
            return Err(PipelineError::EmptyImage);
        }
        log::debug!(
            "pipeline: restoring {dimensions} image with {} workers",
            workers.count(),
        );
        Ok(Pending {
            ctx: Context {
                config,
                workers,
                dimensions,
            },
            original: image,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgba;

    use super::*;

    fn config(workers: usize) -> RestoreConfig {
        RestoreConfig {
            workers,
            ..RestoreConfig::default()
        }
    }

    /// Mid-gray image with a bright diagonal scratch.
    fn scratched_image(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if x == y || x == y + 1 {
                Rgba([250, 248, 245, 255])
            } else {
                let v = u8::try_from(60 + (x * 3 + y * 2) % 80).unwrap();
                Rgba([v, v / 2 + 30, 90, 255])
            }
        })
    }

    #[test]
    fn empty_image_rejected() {
        let result = Pipeline::new(RgbaImage::new(0, 5), config(2));
        assert!(matches!(result, Err(PipelineError::EmptyImage)));
    }

    #[test]
    fn invalid_config_rejected_before_work() {
        let bad = RestoreConfig {
            blur_kernel_size: 2,
            ..config(2)
        };
        let result = Pipeline::new(scratched_image(8, 8), bad);
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn with_workers_uses_pool_size() {
        let workers = Arc::new(Workers::new(3).unwrap());
        let pending = Pipeline::with_workers(scratched_image(8, 8), config(1), workers).unwrap();
        assert_eq!(pending.config().workers, 3);
        assert_eq!(pending.workers().count(), 3);
    }

    #[test]
    fn stages_expose_intermediates() {
        let img = scratched_image(24, 16);
        let masked = Pipeline::new(img.clone(), config(4)).unwrap().detect_damage();
        assert_eq!(masked.mask().dimensions(), (24, 16));
        assert!(crate::mask::count_damaged(masked.mask()) > 0);

        let edges = masked.detect_edges();
        assert!(edges.max_gradient() > 0.0);

        let feathered = edges.feather().unwrap();
        let inpainted = feathered.inpaint().unwrap();
        assert_ne!(inpainted.inpainted(), &img);

        let restored = inpainted.correct_colors().smooth().unwrap();
        assert_eq!(restored.dimensions(), Dimensions::new(24, 16));
        let result = restored.into_result();
        assert_eq!(result.original, img);
        assert_eq!(result.restored.dimensions(), (24, 16));
    }

    #[test]
    fn disabled_stages_pass_through() {
        let cfg = RestoreConfig {
            equalize_colors: false,
            sharpen: false,
            ..config(2)
        };
        let result = Pipeline::new(scratched_image(12, 12), cfg)
            .unwrap()
            .detect_damage()
            .detect_edges()
            .feather()
            .unwrap()
            .inpaint()
            .unwrap()
            .correct_colors()
            .smooth()
            .unwrap()
            .into_result();
        assert_eq!(result.color_corrected, result.inpainted);
        assert_eq!(result.restored, result.color_corrected);
    }

    #[test]
    fn metrics_report_stage_counts() {
        let masked = Pipeline::new(scratched_image(10, 10), config(2))
            .unwrap()
            .detect_damage();
        // Main diagonal plus the one just above it.
        assert!(matches!(
            masked.metrics(),
            StageMetrics::Mask {
                damaged_pixel_count: 19,
                total_pixel_count: 100,
                ..
            }
        ));
    }

    #[test]
    fn color_metrics_report_disabled_stage() {
        let cfg = RestoreConfig {
            equalize_colors: false,
            ..config(1)
        };
        let corrected = Pipeline::new(scratched_image(6, 6), cfg)
            .unwrap()
            .detect_damage()
            .detect_edges()
            .feather()
            .unwrap()
            .inpaint()
            .unwrap()
            .correct_colors();
        assert!(matches!(
            corrected.metrics(),
            StageMetrics::ColorCorrection {
                enabled: false,
                average_before,
                average_after,
                ..
            } if average_before == average_after
        ));
    }
}
