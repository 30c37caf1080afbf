//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! [`restore_with_diagnostics`] runs the full pipeline and records the
//! wall-clock duration of every stage transition together with stage
//! specific metrics. Time is read through the [`Clock`] trait so tests
//! can substitute a deterministic clock.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::pipeline::Pipeline;
use crate::types::{PipelineError, RestoreConfig, RgbaImage, StagedResult};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of timestamps for diagnostics.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: damage detection.
    pub mask: StageDiagnostics,
    /// Stage 2: Sobel edge detection.
    pub edges: StageDiagnostics,
    /// Stage 3: mask feathering.
    pub feather: StageDiagnostics,
    /// Stage 4: inpainting.
    pub inpaint: StageDiagnostics,
    /// Stage 5: histogram equalization.
    pub color: StageDiagnostics,
    /// Stage 6: blur + sharpen.
    pub smooth: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds),
    /// including worker pool start-up.
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Damage detection metrics.
    Mask {
        /// `R + G + B` threshold used.
        threshold: u32,
        /// Number of pixels classified as damaged.
        damaged_pixel_count: u64,
        /// Total pixel count.
        total_pixel_count: u64,
    },
    /// Sobel edge detection metrics.
    EdgeDetection {
        /// Post-normalization threshold.
        threshold: f32,
        /// Largest raw gradient magnitude.
        max_gradient: f32,
        /// Number of pixels with a non-zero edge value.
        edge_pixel_count: u64,
        /// Total pixel count.
        total_pixel_count: u64,
    },
    /// Feathering metrics.
    Feather {
        /// Feather radius in pixels.
        radius: u32,
        /// Number of pixels with a non-zero feather weight.
        weighted_pixel_count: u64,
    },
    /// Inpainting metrics.
    Inpaint {
        /// Interior search radius.
        radius: u32,
        /// Search radius near the borders.
        border_radius: u32,
        /// Number of pixels that were candidates for blending.
        blended_pixel_count: u64,
    },
    /// Color correction metrics.
    ColorCorrection {
        /// Whether equalization ran.
        enabled: bool,
        /// Channels left unchanged because they hold a single value.
        flat_channels: usize,
        /// Mean RGB before correction.
        average_before: [u8; 3],
        /// Mean RGB after correction.
        average_after: [u8; 3],
    },
    /// Blur + sharpen metrics.
    Smooth {
        /// Whether the stage ran.
        enabled: bool,
        /// Gaussian kernel side length.
        kernel_size: u32,
        /// Gaussian kernel sigma.
        sigma: f64,
    },
}

/// High-level summary for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Number of worker threads used by every stage.
    pub workers: usize,
}

impl PipelineDiagnostics {
    /// Stages in execution order with their display names.
    #[must_use]
    pub fn stages(&self) -> [(&'static str, &StageDiagnostics); 6] {
        [
            ("Mask", &self.mask),
            ("Edge Detection", &self.edges),
            ("Feather", &self.feather),
            ("Inpaint", &self.inpaint),
            ("Color Correction", &self.color),
            ("Smooth", &self.smooth),
        ]
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)  |  Workers: {}",
            self.summary.image_width,
            self.summary.image_height,
            self.summary.pixel_count,
            self.summary.workers,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Percentage of `part` in `total`, `0.0` when `total` is zero.
#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        part as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Mask {
            threshold,
            damaged_pixel_count,
            total_pixel_count,
        } => {
            let density = percent(*damaged_pixel_count, *total_pixel_count);
            format!("threshold={threshold} damaged={damaged_pixel_count} ({density:.1}%)")
        }
        StageMetrics::EdgeDetection {
            threshold,
            max_gradient,
            edge_pixel_count,
            total_pixel_count,
        } => {
            let density = percent(*edge_pixel_count, *total_pixel_count);
            format!(
                "threshold={threshold:.2} max={max_gradient:.1} edges={edge_pixel_count} ({density:.1}%)",
            )
        }
        StageMetrics::Feather {
            radius,
            weighted_pixel_count,
        } => format!("r={radius} weighted={weighted_pixel_count}"),
        StageMetrics::Inpaint {
            radius,
            border_radius,
            blended_pixel_count,
        } => format!("r={radius} border_r={border_radius} blended={blended_pixel_count}"),
        StageMetrics::ColorCorrection {
            enabled: false,
            ..
        } => "disabled".to_string(),
        StageMetrics::ColorCorrection {
            flat_channels,
            average_before: [r0, g0, b0],
            average_after: [r1, g1, b1],
            ..
        } => format!(
            "flat_channels={flat_channels} avg=({r0},{g0},{b0})->({r1},{g1},{b1})",
        ),
        StageMetrics::Smooth { enabled: false, .. } => "disabled".to_string(),
        StageMetrics::Smooth {
            kernel_size, sigma, ..
        } => format!("{kernel_size}x{kernel_size} sigma={sigma:.2} + sharpen"),
    }
}

/// Time one stage transition and capture the new stage's metrics.
macro_rules! timed {
    ($clock:expr, $step:expr) => {{
        let start = $clock.now();
        let next = $step;
        let duration = $clock.elapsed(&start);
        let metrics = next.metrics();
        (next, StageDiagnostics { duration, metrics })
    }};
}

/// Run the full pipeline, recording per-stage diagnostics.
///
/// # Errors
///
/// Returns [`PipelineError`] for the same reasons as
/// [`restore_staged`](crate::restore_staged).
pub fn restore_with_diagnostics<C: Clock>(
    image: RgbaImage,
    config: &RestoreConfig,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    let total_start = clock.now();

    let pending = Pipeline::new(image, config.clone())?;
    let workers = pending.workers().count();
    let (masked, mask) = timed!(clock, pending.detect_damage());
    let (edges_detected, edges) = timed!(clock, masked.detect_edges());
    let (feathered, feather) = timed!(clock, edges_detected.feather()?);
    let (inpainted, inpaint) = timed!(clock, feathered.inpaint()?);
    let (color_corrected, color) = timed!(clock, inpainted.correct_colors());
    let (restored, smooth) = timed!(clock, color_corrected.smooth()?);

    let staged = restored.into_result();
    let total_duration = clock.elapsed(&total_start);

    let diagnostics = PipelineDiagnostics {
        mask,
        edges,
        feather,
        inpaint,
        color,
        smooth,
        total_duration,
        summary: PipelineSummary {
            image_width: staged.dimensions.width,
            image_height: staged.dimensions.height,
            pixel_count: staged.dimensions.pixel_count(),
            workers,
        },
    };
    log::debug!(
        "pipeline: finished in {:.3}ms",
        duration_ms(diagnostics.total_duration),
    );
    Ok((staged, diagnostics))
}
