//! Global color correction by per-channel histogram equalization.
//!
//! Three phases with a barrier between each:
//!
//! 1. Row bands build private R/G/B histograms and merge them into a
//!    [`Reducer`] by bucket-wise sum.
//! 2. Sequentially, each channel's CDF is turned into a 256-entry lookup
//!    table.
//! 3. Row bands remap every pixel through the tables. Alpha is untouched.
//!
//! A channel whose CDF never changes between its first and last non-zero
//! value has a single occupied bucket; its table is the identity so the
//! constant value survives instead of dividing by zero.

use image::Rgba;

use crate::parallel::Workers;
use crate::partition::Layout;
use crate::reduce::{Merge, Reducer};
use crate::types::{Dimensions, RgbaImage};

/// Number of buckets per channel histogram.
pub const BUCKETS: usize = 256;

/// Bucket counts for the R, G and B channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHistograms {
    /// `counts[channel][value]`.
    pub counts: [[u64; BUCKETS]; 3],
}

impl Default for ChannelHistograms {
    fn default() -> Self {
        Self {
            counts: [[0; BUCKETS]; 3],
        }
    }
}

impl ChannelHistograms {
    /// Count one pixel.
    pub fn add(&mut self, pixel: Rgba<u8>) {
        for (channel, &value) in self.counts.iter_mut().zip(&pixel.0[..3]) {
            channel[usize::from(value)] += 1;
        }
    }

    /// Histogram of every pixel in `image`, computed by row bands.
    #[must_use]
    pub fn of(image: &RgbaImage, workers: &Workers) -> Self {
        let partitions = workers.partition(Dimensions::of(image), Layout::RowBands, 0);
        let reducer = Reducer::new(Self::default());
        workers.run(&partitions, |p| {
            let mut local = Self::default();
            let band = p.owned;
            for y in band.y..band.y_end() {
                for x in band.x..band.x_end() {
                    local.add(*image.get_pixel(x, y));
                }
            }
            reducer.merge(local);
        });
        reducer.finalize()
    }
}

impl Merge for ChannelHistograms {
    fn merge(&mut self, partial: Self) {
        for (acc, part) in self.counts.iter_mut().zip(partial.counts) {
            for (a, p) in acc.iter_mut().zip(part) {
                *a += p;
            }
        }
    }
}

/// Cumulative distribution of a histogram.
#[must_use]
pub fn cdf(histogram: &[u64; BUCKETS]) -> [u64; BUCKETS] {
    let mut out = [0; BUCKETS];
    let mut running = 0;
    for (c, &h) in out.iter_mut().zip(histogram) {
        running += h;
        *c = running;
    }
    out
}

/// First and last non-zero CDF values, or `None` if they are equal (or
/// the CDF is all zero).
#[must_use]
pub fn cdf_range(cdf: &[u64; BUCKETS]) -> Option<(u64, u64)> {
    let min = cdf.iter().copied().find(|&v| v > 0)?;
    let max = cdf.iter().copied().rev().find(|&v| v > 0)?;
    (max > min).then_some((min, max))
}

/// Lookup table mapping each channel value to its equalized value.
///
/// Returns the identity table when the channel has no variation.
#[must_use]
pub fn lookup_table(cdf: &[u64; BUCKETS]) -> [u8; BUCKETS] {
    let mut lut = [0_u8; BUCKETS];
    match cdf_range(cdf) {
        Some((min, max)) => {
            let span = max - min;
            for (out, &c) in lut.iter_mut().zip(cdf) {
                let scaled = c.saturating_sub(min) * 255 / span;
                *out = u8::try_from(scaled.min(255)).unwrap_or(u8::MAX);
            }
        }
        None => {
            for (value, out) in (0..=u8::MAX).zip(lut.iter_mut()) {
                *out = value;
            }
        }
    }
    lut
}

/// Output of [`equalize`].
#[derive(Debug, Clone)]
pub struct Equalization {
    /// The equalized image.
    pub image: RgbaImage,
    /// Histograms of the input image.
    pub histograms: ChannelHistograms,
    /// Number of color channels left unchanged because they hold a single
    /// value.
    pub flat_channels: usize,
}

/// Equalize the R, G and B histograms of `image` independently.
#[must_use = "returns the equalized image"]
pub fn equalize(image: &RgbaImage, workers: &Workers) -> Equalization {
    let histograms = ChannelHistograms::of(image, workers);
    let cdfs = histograms.counts.each_ref().map(cdf);
    let flat_channels = cdfs.iter().filter(|c| cdf_range(c).is_none()).count();
    let luts = cdfs.each_ref().map(lookup_table);

    let out = workers.render(Dimensions::of(image), Layout::RowBands, 0, |x, y| {
        let [r, g, b, a] = image.get_pixel(x, y).0;
        Rgba([
            luts[0][usize::from(r)],
            luts[1][usize::from(g)],
            luts[2][usize::from(b)],
            a,
        ])
    });
    log::debug!("color: equalized {} ({flat_channels} flat channels)", Dimensions::of(image));
    Equalization {
        image: out,
        histograms,
        flat_channels,
    }
}

/// Per-channel running sums for [`average_color`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSums {
    /// Sums of the R, G and B values.
    pub sums: [u64; 3],
    /// Number of pixels summed.
    pub count: u64,
}

impl Merge for ChannelSums {
    fn merge(&mut self, partial: Self) {
        for (acc, part) in self.sums.iter_mut().zip(partial.sums) {
            *acc += part;
        }
        self.count += partial.count;
    }
}

/// Mean color of `image` (integer division per channel), fully opaque.
///
/// Returns `None` for an empty image.
#[must_use]
pub fn average_color(image: &RgbaImage, workers: &Workers) -> Option<Rgba<u8>> {
    let partitions = workers.partition(Dimensions::of(image), Layout::RowBands, 0);
    let reducer = Reducer::new(ChannelSums::default());
    workers.run(&partitions, |p| {
        let mut local = ChannelSums::default();
        let band = p.owned;
        for y in band.y..band.y_end() {
            for x in band.x..band.x_end() {
                let px = image.get_pixel(x, y).0;
                for (sum, &c) in local.sums.iter_mut().zip(&px[..3]) {
                    *sum += u64::from(c);
                }
                local.count += 1;
            }
        }
        reducer.merge(local);
    });
    let total = reducer.finalize();
    if total.count == 0 {
        return None;
    }
    let [r, g, b] = total
        .sums
        .map(|s| u8::try_from(s / total.count).unwrap_or(u8::MAX));
    Some(Rgba([r, g, b, 255]))
}
