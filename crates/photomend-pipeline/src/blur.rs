//! Gaussian smoothing and sharpening.
//!
//! The last stage of the pipeline softens the seams left by inpainting
//! with a small Gaussian blur, then restores crispness with a fixed
//! sharpening kernel.
//!
//! [`convolve`] applies any odd square [`Kernel`] to the R, G and B
//! channels of an RGBA image. Samples outside the image replicate the
//! nearest border pixel, accumulation is in `f64` and results are rounded
//! and clamped to `[0, 255]`. Alpha is copied from the source.

use image::Rgba;

use crate::parallel::Workers;
use crate::partition::Layout;
use crate::types::{Dimensions, PipelineError, RgbaImage};

/// Fixed 3x3 sharpening weights. They sum to 1, so flat regions are
/// unchanged.
pub const SHARPEN: [f64; 9] = [-1.0, -2.0, -1.0, -2.0, 13.0, -2.0, -1.0, -2.0, -1.0];

/// Largest accepted Gaussian kernel side.
pub const MAX_KERNEL_SIZE: u32 = 99;

/// Check Gaussian kernel parameters.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `size` is zero, even or
/// above [`MAX_KERNEL_SIZE`], or `sigma` is not a finite positive number.
pub fn check_kernel_params(size: u32, sigma: f64) -> Result<(), PipelineError> {
    if size == 0 || size % 2 == 0 {
        return Err(PipelineError::InvalidConfig(format!(
            "blur kernel size must be odd and at least 1, got {size}"
        )));
    }
    if size > MAX_KERNEL_SIZE {
        return Err(PipelineError::InvalidConfig(format!(
            "blur kernel size must not exceed {MAX_KERNEL_SIZE}, got {size}"
        )));
    }
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(PipelineError::InvalidConfig(format!(
            "blur sigma must be a positive finite number, got {sigma}"
        )));
    }
    Ok(())
}

/// An odd-sized square convolution kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    size: u32,
    weights: Vec<f64>,
}

impl Kernel {
    /// Sampled 2D Gaussian of the given size, normalized to sum to 1.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for an even, zero or
    /// oversized `size` or a non-positive `sigma`.
    pub fn gaussian(size: u32, sigma: f64) -> Result<Self, PipelineError> {
        check_kernel_params(size, sigma)?;
        let center = f64::from(size / 2);
        let two_sigma_sq = 2.0 * sigma * sigma;
        let mut weights = Vec::with_capacity(size as usize * size as usize);
        for y in 0..size {
            for x in 0..size {
                let dx = f64::from(x) - center;
                let dy = f64::from(y) - center;
                weights.push((-(dx * dx + dy * dy) / two_sigma_sq).exp());
            }
        }
        let sum: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= sum;
        }
        Ok(Self { size, weights })
    }

    /// The fixed 3x3 sharpening kernel, see [`SHARPEN`].
    #[must_use]
    pub fn sharpen() -> Self {
        Self {
            size: 3,
            weights: SHARPEN.to_vec(),
        }
    }

    /// Side length.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Distance from the center to the edge of the kernel.
    #[must_use]
    pub const fn radius(&self) -> u32 {
        self.size / 2
    }

    /// Row-major weights.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

/// Convolve `image` with `kernel`.
#[must_use = "returns the filtered image"]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn convolve(image: &RgbaImage, kernel: &Kernel, workers: &Workers) -> RgbaImage {
    let dimensions = Dimensions::of(image);
    let radius = kernel.radius();
    let max_x = i64::from(dimensions.width) - 1;
    let max_y = i64::from(dimensions.height) - 1;

    workers.render(dimensions, Layout::Tiles, radius, |x, y| {
        let mut sums = [0.0_f64; 3];
        let mut weights = kernel.weights.iter();
        for ky in 0..kernel.size {
            let ny = (i64::from(y) + i64::from(ky) - i64::from(radius)).clamp(0, max_y);
            for kx in 0..kernel.size {
                let nx = (i64::from(x) + i64::from(kx) - i64::from(radius)).clamp(0, max_x);
                let w = weights.next().copied().unwrap_or(0.0);
                // Clamped into the image, so both fit in u32.
                let px = image.get_pixel(nx as u32, ny as u32).0;
                for (sum, &c) in sums.iter_mut().zip(&px[..3]) {
                    *sum += f64::from(c) * w;
                }
            }
        }
        let [r, g, b] = sums.map(|s| s.round().clamp(0.0, 255.0) as u8);
        Rgba([r, g, b, image.get_pixel(x, y).0[3]])
    })
}

/// Gaussian blur with a `size`x`size` kernel.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for invalid kernel
/// parameters.
pub fn gaussian_blur(
    image: &RgbaImage,
    size: u32,
    sigma: f64,
    workers: &Workers,
) -> Result<RgbaImage, PipelineError> {
    let kernel = Kernel::gaussian(size, sigma)?;
    Ok(convolve(image, &kernel, workers))
}

/// Sharpen with the fixed [`SHARPEN`] kernel.
#[must_use = "returns the sharpened image"]
pub fn sharpen(image: &RgbaImage, workers: &Workers) -> RgbaImage {
    convolve(image, &Kernel::sharpen(), workers)
}

/// Gaussian blur followed by sharpening.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for invalid kernel
/// parameters.
pub fn smooth_and_sharpen(
    image: &RgbaImage,
    size: u32,
    sigma: f64,
    workers: &Workers,
) -> Result<RgbaImage, PipelineError> {
    let blurred = gaussian_blur(image, size, sigma, workers)?;
    let sharpened = sharpen(&blurred, workers);
    log::debug!("smooth: {size}x{size} gaussian (sigma {sigma}) then sharpen");
    Ok(sharpened)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Test image with a sharp red/blue boundary at x=5.
    fn sharp_edge_image() -> RgbaImage {
        RgbaImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        })
    }

    #[test]
    fn gaussian_weights_sum_to_one() {
        for size in [1, 3, 5, 7, 9] {
            for sigma in [0.3, 0.5, 1.0, 2.5] {
                let k = Kernel::gaussian(size, sigma).unwrap();
                let sum: f64 = k.weights().iter().sum();
                assert!((sum - 1.0).abs() < 1e-6, "size {size} sigma {sigma}: {sum}");
                assert_eq!(k.weights().len(), (size * size) as usize);
            }
        }
    }

    #[test]
    fn gaussian_peaks_at_center() {
        let k = Kernel::gaussian(5, 1.0).unwrap();
        let center = k.weights()[12];
        assert!(k.weights().iter().all(|&w| w <= center));
    }

    #[test]
    fn invalid_kernel_params_rejected() {
        for (size, sigma) in [(0, 1.0), (4, 1.0), (3, 0.0), (3, -1.0), (3, f64::NAN), (3, f64::INFINITY)] {
            assert!(
                matches!(Kernel::gaussian(size, sigma), Err(PipelineError::InvalidConfig(_))),
                "size {size} sigma {sigma} should be rejected",
            );
        }
    }

    #[test]
    fn sharpen_kernel_sums_to_one() {
        let sum: f64 = Kernel::sharpen().weights().iter().sum();
        assert!((sum - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn size_one_kernel_is_identity() {
        let workers = Workers::new(2).unwrap();
        let img = sharp_edge_image();
        assert_eq!(gaussian_blur(&img, 1, 0.5, &workers).unwrap(), img);
    }

    #[test]
    fn uniform_image_unchanged() {
        let workers = Workers::new(3).unwrap();
        let img = RgbaImage::from_pixel(10, 10, Rgba([100, 150, 200, 250]));
        assert_eq!(gaussian_blur(&img, 5, 1.4, &workers).unwrap(), img);
        assert_eq!(sharpen(&img, &workers), img);
        assert_eq!(smooth_and_sharpen(&img, 3, 0.5, &workers).unwrap(), img);
    }

    #[test]
    fn blur_smooths_sharp_edge() {
        let workers = Workers::new(2).unwrap();
        let blurred = gaussian_blur(&sharp_edge_image(), 5, 2.0, &workers).unwrap();
        let left = blurred.get_pixel(4, 5).0[0];
        let right = blurred.get_pixel(5, 5).0[0];
        assert!(left < 255, "expected red to decrease near boundary, got {left}");
        assert!(right > 0, "expected red to increase near boundary, got {right}");
    }

    #[test]
    fn sharpen_amplifies_contrast() {
        let workers = Workers::new(2).unwrap();
        let img = RgbaImage::from_fn(9, 9, |x, _| {
            if x < 4 {
                Rgba([100, 100, 100, 255])
            } else {
                Rgba([150, 150, 150, 255])
            }
        });
        let out = sharpen(&img, &workers);
        // Dark side darkens and bright side brightens at the boundary.
        assert!(out.get_pixel(3, 4).0[0] < 100);
        assert!(out.get_pixel(4, 4).0[0] > 150);
        // Clamp-to-edge keeps the border from going black.
        assert_eq!(out.get_pixel(0, 0).0[0], 100);
    }

    #[test]
    fn alpha_is_preserved() {
        let workers = Workers::new(2).unwrap();
        let img = RgbaImage::from_fn(6, 6, |x, y| {
            Rgba([u8::try_from(x * 40).unwrap(), 0, 0, u8::try_from(y * 40).unwrap()])
        });
        let out = smooth_and_sharpen(&img, 3, 0.5, &workers).unwrap();
        for (src, dst) in img.pixels().zip(out.pixels()) {
            assert_eq!(src.0[3], dst.0[3]);
        }
    }

    #[test]
    fn convolve_identical_across_worker_counts() {
        let img = RgbaImage::from_fn(25, 19, |x, y| {
            let v = u8::try_from((x * 11 + y * 17) % 256).unwrap();
            Rgba([v, 255 - v, v / 2, 255])
        });
        let reference = smooth_and_sharpen(&img, 5, 1.0, &Workers::new(1).unwrap()).unwrap();
        for count in [2, 4, 8] {
            let out = smooth_and_sharpen(&img, 5, 1.0, &Workers::new(count).unwrap()).unwrap();
            assert_eq!(out, reference, "{count} workers");
        }
    }

    #[test]
    fn oversized_kernel_rejected() {
        assert!(matches!(
            Kernel::gaussian(u32::MAX, 1.0),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(Kernel::gaussian(MAX_KERNEL_SIZE, 1.0).is_ok());
        assert!(check_kernel_params(MAX_KERNEL_SIZE + 2, 1.0).is_err());
    }
}
