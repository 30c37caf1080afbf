//! photomend-pipeline: parallel photo restoration pipeline (sans-IO).
//!
//! Restores a damaged photograph through:
//! damage mask -> Sobel edges -> feathered mask -> inpainting ->
//! histogram equalization -> blur + sharpen.
//!
//! Every stage is a fork-join computation over a dedicated worker pool.
//! The image grid is split into worker-owned regions by [`partition`];
//! workers write only their own region (or a private buffer) and merge
//! global statistics through a [`reduce::Reducer`]. Output is bitwise
//! identical for any worker count.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! [`RgbaImage`] grids. Decoding, encoding and networking live in
//! `photomend-io`.

pub mod blur;
pub mod color;
pub mod diagnostics;
pub mod edge;
pub mod feather;
pub mod inpaint;
pub mod mask;
pub mod parallel;
pub mod partition;
pub mod pipeline;
pub mod reduce;
pub mod types;

pub use diagnostics::{Clock, PipelineDiagnostics, StdClock, restore_with_diagnostics};
pub use mask::{map_preview, mask_preview};
pub use parallel::Workers;
pub use pipeline::Pipeline;
pub use types::{
    Dimensions, FloatMap, GrayImage, PipelineError, RestoreConfig, RgbaImage, StagedResult,
};

/// Run the full restoration pipeline and return the restored image.
///
/// # Pipeline steps
///
/// 1. Damage mask (`R + G + B > damage_threshold`)
/// 2. Sobel edge map, normalized and thresholded
/// 3. Edge-aware feathering of the mask
/// 4. Distance- and edge-weighted inpainting
/// 5. Per-channel histogram equalization (optional)
/// 6. Gaussian blur then sharpen (optional)
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` is invalid,
/// [`PipelineError::EmptyImage`] if the image has no pixels and
/// [`PipelineError::ThreadPool`] if the worker pool cannot start.
pub fn restore(image: RgbaImage, config: &RestoreConfig) -> Result<RgbaImage, PipelineError> {
    Ok(restore_staged(image, config)?.restored)
}

/// Run the full pipeline, preserving every intermediate result.
///
/// # Errors
///
/// Same as [`restore`].
pub fn restore_staged(
    image: RgbaImage,
    config: &RestoreConfig,
) -> Result<StagedResult, PipelineError> {
    Ok(Pipeline::new(image, config.clone())?
        .detect_damage()
        .detect_edges()
        .feather()?
        .inpaint()?
        .correct_colors()
        .smooth()?
        .into_result())
}
