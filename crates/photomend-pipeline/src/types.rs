//! Shared types for the photomend restoration pipeline.

use std::fmt;
use std::num::NonZeroUsize;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference preview
/// rasters without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage`, the pixel grid every color stage consumes and
/// produces.
pub use image::RgbaImage;

/// Single-channel floating point grid.
///
/// Used for the damage mask (`0.0` / `1.0`), the normalized edge map and
/// the feathered mask. All values produced by the pipeline lie in `[0, 1]`.
pub type FloatMap = image::ImageBuffer<image::Luma<f32>, Vec<f32>>;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create dimensions from a width and height.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of any `image` buffer.
    #[must_use]
    pub fn of<P, C>(image: &image::ImageBuffer<P, C>) -> Self
    where
        P: image::Pixel,
        C: Deref<Target = [P::Subpixel]>,
    {
        Self::new(image.width(), image.height())
    }

    /// Total number of pixels (`width * height`).
    #[must_use]
    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Returns `true` if either axis is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Configuration for the restoration pipeline.
///
/// Every field has a default. Call [`validate`](Self::validate) (done
/// automatically by [`Pipeline::new`](crate::Pipeline::new)) to reject
/// invalid combinations before any parallel work starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Number of worker threads used by every stage.
    ///
    /// Defaults to the host's available parallelism. Must be non-zero.
    pub workers: usize,

    /// A pixel is damaged when `R + G + B` (8-bit channels) exceeds this
    /// value.
    pub damage_threshold: u32,

    /// Normalized gradient magnitudes below this value are zeroed.
    ///
    /// Must lie in `[0, 1]`.
    pub edge_threshold: f32,

    /// Radius in pixels over which damage is feathered into its
    /// surroundings. `0` keeps the binary mask.
    pub feather_radius: u32,

    /// Neighborhood radius used to reconstruct a pixel away from the
    /// image borders.
    pub inpaint_radius: u32,

    /// Neighborhood radius used for pixels within `inpaint_radius` of a
    /// border, where fewer samples are available.
    ///
    /// Must be at least `inpaint_radius`.
    pub inpaint_border_radius: u32,

    /// Side length of the Gaussian blur kernel. Must be odd.
    pub blur_kernel_size: u32,

    /// Standard deviation of the Gaussian blur kernel. Must be positive.
    pub blur_sigma: f64,

    /// Whether to run histogram equalization after inpainting.
    pub equalize_colors: bool,

    /// Whether to run the blur + sharpen post-processing stage.
    pub sharpen: bool,
}

impl RestoreConfig {
    /// Default damage threshold (sum of 8-bit R, G and B).
    pub const DEFAULT_DAMAGE_THRESHOLD: u32 = 427;

    /// Default post-normalization edge threshold.
    pub const DEFAULT_EDGE_THRESHOLD: f32 = 0.2;

    /// Default feather radius in pixels.
    pub const DEFAULT_FEATHER_RADIUS: u32 = 5;

    /// Default inpainting neighborhood radius.
    pub const DEFAULT_INPAINT_RADIUS: u32 = 5;

    /// Default inpainting neighborhood radius near the borders.
    pub const DEFAULT_INPAINT_BORDER_RADIUS: u32 = 10;

    /// Default Gaussian kernel size.
    pub const DEFAULT_BLUR_KERNEL_SIZE: u32 = 3;

    /// Default Gaussian kernel sigma.
    pub const DEFAULT_BLUR_SIGMA: f64 = 0.5;

    /// Largest accepted feather or inpaint radius in pixels.
    pub const MAX_RADIUS: u32 = 1024;

    /// Worker count derived from the host's available parallelism,
    /// falling back to a single worker when it cannot be queried.
    #[must_use]
    pub fn default_workers() -> usize {
        std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
    }

    /// Check every configuration invariant.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the first
    /// violated invariant.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.edge_threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "edge threshold must lie in [0, 1], got {}",
                self.edge_threshold,
            )));
        }
        if self.feather_radius > Self::MAX_RADIUS {
            return Err(PipelineError::InvalidConfig(format!(
                "feather radius must not exceed {}, got {}",
                Self::MAX_RADIUS,
                self.feather_radius,
            )));
        }
        if self.inpaint_border_radius > Self::MAX_RADIUS {
            return Err(PipelineError::InvalidConfig(format!(
                "inpaint border radius must not exceed {}, got {}",
                Self::MAX_RADIUS,
                self.inpaint_border_radius,
            )));
        }
        if self.inpaint_border_radius < self.inpaint_radius {
            return Err(PipelineError::InvalidConfig(format!(
                "inpaint border radius ({}) must be at least the inpaint radius ({})",
                self.inpaint_border_radius, self.inpaint_radius,
            )));
        }
        crate::blur::check_kernel_params(self.blur_kernel_size, self.blur_sigma)
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
            damage_threshold: Self::DEFAULT_DAMAGE_THRESHOLD,
            edge_threshold: Self::DEFAULT_EDGE_THRESHOLD,
            feather_radius: Self::DEFAULT_FEATHER_RADIUS,
            inpaint_radius: Self::DEFAULT_INPAINT_RADIUS,
            inpaint_border_radius: Self::DEFAULT_INPAINT_BORDER_RADIUS,
            blur_kernel_size: Self::DEFAULT_BLUR_KERNEL_SIZE,
            blur_sigma: Self::DEFAULT_BLUR_SIGMA,
            equalize_colors: true,
            sharpen: true,
        }
    }
}

/// Result of running the pipeline with every intermediate preserved.
///
/// Each field captures the output of one stage so callers can write
/// preview images or inspect the masks that drove the reconstruction.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Stage 0: the input image.
    pub original: RgbaImage,
    /// Stage 1: binary damage mask.
    pub mask: FloatMap,
    /// Stage 2: normalized, thresholded Sobel edge map.
    pub edges: FloatMap,
    /// Stage 3: feathered blend weights.
    pub feathered: FloatMap,
    /// Stage 4: image with damaged pixels reconstructed.
    pub inpainted: RgbaImage,
    /// Stage 5: histogram-equalized image (equal to `inpainted` when
    /// color correction is disabled).
    pub color_corrected: RgbaImage,
    /// Stage 6: final blurred and sharpened image (equal to
    /// `color_corrected` when sharpening is disabled).
    pub restored: RgbaImage,
    /// Image dimensions in pixels.
    pub dimensions: Dimensions,
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The input image has zero width or height.
    #[error("input image is empty")]
    EmptyImage,

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// A grid handed to a stage does not match the image it describes.
    #[error("{stage}: expected a {expected} grid, got {actual}")]
    DimensionMismatch {
        /// Name of the stage that rejected its inputs.
        stage: &'static str,
        /// Dimensions of the image being processed.
        expected: Dimensions,
        /// Dimensions of the offending grid.
        actual: Dimensions,
    },

    /// The worker thread pool could not be created.
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Ensure `actual` matches `expected`, naming `stage` in the error.
pub(crate) fn ensure_dimensions(
    stage: &'static str,
    expected: Dimensions,
    actual: Dimensions,
) -> Result<(), PipelineError> {
    if expected == actual {
        Ok(())
    } else {
        Err(PipelineError::DimensionMismatch {
            stage,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_pixel_count() {
        assert_eq!(Dimensions::new(640, 480).pixel_count(), 307_200);
        assert_eq!(Dimensions::new(0, 480).pixel_count(), 0);
    }

    #[test]
    fn dimensions_is_empty() {
        assert!(Dimensions::new(0, 3).is_empty());
        assert!(Dimensions::new(3, 0).is_empty());
        assert!(!Dimensions::new(1, 1).is_empty());
    }

    #[test]
    fn dimensions_of_image() {
        let img = RgbaImage::new(7, 3);
        assert_eq!(Dimensions::of(&img), Dimensions::new(7, 3));
    }

    #[test]
    fn dimensions_display() {
        assert_eq!(Dimensions::new(12, 5).to_string(), "12x5");
    }

    #[test]
    fn config_defaults_match_documented_values() {
        let config = RestoreConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.damage_threshold, 427);
        assert!((config.edge_threshold - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.feather_radius, 5);
        assert_eq!(config.inpaint_radius, 5);
        assert_eq!(config.inpaint_border_radius, 10);
        assert_eq!(config.blur_kernel_size, 3);
        assert!((config.blur_sigma - 0.5).abs() < f64::EPSILON);
        assert!(config.equalize_colors);
        assert!(config.sharpen);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(RestoreConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let config = RestoreConfig {
            workers: 0,
            ..RestoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn even_kernel_size_rejected() {
        let config = RestoreConfig {
            blur_kernel_size: 4,
            ..RestoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn non_positive_sigma_rejected() {
        for sigma in [0.0, -1.0, f64::NAN] {
            let config = RestoreConfig {
                blur_sigma: sigma,
                ..RestoreConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(PipelineError::InvalidConfig(_))),
                "sigma {sigma} should be rejected",
            );
        }
    }

    #[test]
    fn edge_threshold_out_of_range_rejected() {
        let config = RestoreConfig {
            edge_threshold: 1.5,
            ..RestoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn border_radius_smaller_than_radius_rejected() {
        let config = RestoreConfig {
            inpaint_radius: 8,
            inpaint_border_radius: 4,
            ..RestoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn error_display_messages() {
        assert_eq!(PipelineError::EmptyImage.to_string(), "input image is empty");
        assert_eq!(
            PipelineError::InvalidConfig("bad".to_string()).to_string(),
            "invalid pipeline configuration: bad",
        );
        let err = PipelineError::DimensionMismatch {
            stage: "inpaint",
            expected: Dimensions::new(4, 4),
            actual: Dimensions::new(3, 4),
        };
        assert_eq!(err.to_string(), "inpaint: expected a 4x4 grid, got 3x4");
    }

    #[test]
    fn ensure_dimensions_accepts_match() {
        let d = Dimensions::new(2, 2);
        assert!(ensure_dimensions("mask", d, d).is_ok());
    }

    #[test]
    fn config_serde_round_trip() {
        let config = RestoreConfig {
            workers: 3,
            damage_threshold: 500,
            edge_threshold: 0.3,
            feather_radius: 12,
            inpaint_radius: 4,
            inpaint_border_radius: 9,
            blur_kernel_size: 5,
            blur_sigma: 1.25,
            equalize_colors: false,
            sharpen: true,
        };
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RestoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn partial_config_json_uses_defaults() {
        let config: RestoreConfig = serde_json::from_str(r#"{"feather_radius": 40}"#).unwrap();
        assert_eq!(config.feather_radius, 40);
        assert_eq!(config.damage_threshold, RestoreConfig::DEFAULT_DAMAGE_THRESHOLD);
        assert_eq!(config.blur_kernel_size, RestoreConfig::DEFAULT_BLUR_KERNEL_SIZE);
    }

    #[test]
    fn oversized_radii_and_kernel_rejected() {
        let feather = RestoreConfig {
            feather_radius: u32::MAX,
            ..RestoreConfig::default()
        };
        assert!(matches!(feather.validate(), Err(PipelineError::InvalidConfig(_))));

        let inpaint = RestoreConfig {
            inpaint_border_radius: RestoreConfig::MAX_RADIUS + 1,
            ..RestoreConfig::default()
        };
        assert!(matches!(inpaint.validate(), Err(PipelineError::InvalidConfig(_))));

        let kernel = RestoreConfig {
            blur_kernel_size: u32::MAX,
            ..RestoreConfig::default()
        };
        assert!(matches!(kernel.validate(), Err(PipelineError::InvalidConfig(_))));

        let at_limit = RestoreConfig {
            feather_radius: RestoreConfig::MAX_RADIUS,
            inpaint_border_radius: RestoreConfig::MAX_RADIUS,
            ..RestoreConfig::default()
        };
        assert!(at_limit.validate().is_ok());
    }
}
