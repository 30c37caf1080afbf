//! Fork-join execution over grid partitions.
//!
//! [`Workers`] owns a dedicated rayon thread pool sized to the configured
//! worker count, so the degree of parallelism is an explicit pipeline
//! parameter rather than process-wide state. Every method is a complete
//! fork-join: it returns only after all workers have finished, which is
//! the barrier between consecutive stages.
//!
//! Pixel outputs are produced per partition into worker-private buffers
//! covering only the partition's owned region, then stitched into a
//! freshly allocated grid after the join. No two workers ever hold write
//! access to the same cell, and stitching is done in partition order, so
//! the result is independent of scheduling.

use image::{ImageBuffer, Pixel};
use rayon::prelude::*;

use crate::partition::{self, Layout, Partition};
use crate::types::{Dimensions, PipelineError};

/// A fixed-size pool of workers that runs one stage at a time.
#[derive(Debug)]
pub struct Workers {
    pool: rayon::ThreadPool,
    count: usize,
}

impl Workers {
    /// Start a pool with exactly `count` worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `count` is zero and
    /// [`PipelineError::ThreadPool`] if the threads cannot be spawned.
    pub fn new(count: usize) -> Result<Self, PipelineError> {
        if count == 0 {
            return Err(PipelineError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(count)
            .thread_name(|i| format!("photomend-worker-{i}"))
            .build()?;
        log::debug!("started worker pool with {count} threads");
        Ok(Self { pool, count })
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Partition a grid for this pool's worker count.
    #[must_use]
    pub fn partition(&self, dimensions: Dimensions, layout: Layout, halo: u32) -> Vec<Partition> {
        layout.partition(dimensions, self.count, halo)
    }

    /// Run `job` once per partition and collect the results in partition
    /// order.
    pub fn run<T, F>(&self, partitions: &[Partition], job: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&Partition) -> T + Send + Sync,
    {
        self.pool
            .install(|| partitions.par_iter().map(job).collect())
    }

    /// Produce a new grid by evaluating `pixel` at every coordinate.
    ///
    /// Each worker evaluates the coordinates of its owned region only.
    /// `pixel` may read any immutable input within `halo` pixels of the
    /// coordinate it is computing.
    pub fn render<P, F>(
        &self,
        dimensions: Dimensions,
        layout: Layout,
        halo: u32,
        pixel: F,
    ) -> ImageBuffer<P, Vec<P::Subpixel>>
    where
        P: Pixel + Send,
        F: Fn(u32, u32) -> P + Send + Sync,
    {
        let partitions = self.partition(dimensions, layout, halo);
        log::trace!(
            "rendering {dimensions} as {} {layout:?} partitions (halo {halo})",
            partitions.len(),
        );
        let tiles = self.run(&partitions, |p| {
            let region = p.owned;
            let mut out = Vec::with_capacity(usize::try_from(region.area()).unwrap_or(0));
            for y in region.y..region.y_end() {
                for x in region.x..region.x_end() {
                    out.push(pixel(x, y));
                }
            }
            out
        });
        stitch(dimensions, &partitions, tiles)
    }

    /// Mutate `data` in place, one row band per worker.
    ///
    /// `data` is a row-major buffer of `dimensions` with `channels`
    /// samples per pixel. `band` receives the index of the first row of
    /// its band and exclusive access to the band's samples.
    pub fn for_each_band<T, F>(&self, data: &mut [T], dimensions: Dimensions, channels: usize, band: F)
    where
        T: Send,
        F: Fn(u32, &mut [T]) + Send + Sync,
    {
        if data.is_empty() || dimensions.is_empty() {
            return;
        }
        let rows = partition::band_rows(dimensions, self.count);
        let chunk = rows as usize * dimensions.width as usize * channels.max(1);
        self.pool.install(|| {
            data.par_chunks_mut(chunk)
                .enumerate()
                .for_each(|(i, samples)| {
                    let first_row = u32::try_from(i).unwrap_or(u32::MAX).saturating_mul(rows);
                    band(first_row, samples);
                });
        });
    }
}

/// Assemble worker-owned tiles into one grid.
///
/// `tiles[i]` holds the pixels of `partitions[i].owned` in row-major
/// order.
pub(crate) fn stitch<P: Pixel>(
    dimensions: Dimensions,
    partitions: &[Partition],
    tiles: Vec<Vec<P>>,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let mut out = ImageBuffer::new(dimensions.width, dimensions.height);
    for (p, tile) in partitions.iter().zip(tiles) {
        let region = p.owned;
        let mut pixels = tile.into_iter();
        for y in region.y..region.y_end() {
            for x in region.x..region.x_end() {
                if let Some(px) = pixels.next() {
                    out.put_pixel(x, y, px);
                }
            }
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{Luma, Rgba};

    use super::*;

    #[test]
    fn zero_workers_rejected() {
        assert!(matches!(
            Workers::new(0),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn count_reports_pool_size() {
        assert_eq!(Workers::new(3).unwrap().count(), 3);
    }

    #[test]
    fn run_preserves_partition_order() {
        let workers = Workers::new(4).unwrap();
        let parts = workers.partition(Dimensions::new(16, 16), Layout::Tiles, 0);
        let origins = workers.run(&parts, |p| (p.owned.x, p.owned.y));
        let expected: Vec<(u32, u32)> = parts.iter().map(|p| (p.owned.x, p.owned.y)).collect();
        assert_eq!(origins, expected);
    }

    #[test]
    fn render_visits_every_pixel_once() {
        let workers = Workers::new(3).unwrap();
        let img = workers.render(Dimensions::new(13, 7), Layout::Tiles, 0, |x, y| {
            Rgba([u8::try_from(x).unwrap(), u8::try_from(y).unwrap(), 0, 255])
        });
        assert_eq!(img.dimensions(), (13, 7));
        for (x, y, px) in img.enumerate_pixels() {
            assert_eq!(px.0[0], u8::try_from(x).unwrap());
            assert_eq!(px.0[1], u8::try_from(y).unwrap());
        }
    }

    #[test]
    fn render_independent_of_worker_count_and_layout() {
        let f = |x: u32, y: u32| Luma([f32::from(u16::try_from(x * 31 + y * 7).unwrap()).sqrt()]);
        let dims = Dimensions::new(23, 19);
        let reference = Workers::new(1).unwrap().render(dims, Layout::Tiles, 0, f);
        for count in [2, 4, 8] {
            let workers = Workers::new(count).unwrap();
            assert_eq!(workers.render(dims, Layout::Tiles, 2, f), reference);
            assert_eq!(workers.render(dims, Layout::RowBands, 0, f), reference);
        }
    }

    #[test]
    fn for_each_band_touches_each_row_once() {
        let workers = Workers::new(3).unwrap();
        let dims = Dimensions::new(5, 8);
        let mut data = vec![0_u32; 5 * 8 * 2];
        workers.for_each_band(&mut data, dims, 2, |first_row, band| {
            for (i, v) in band.iter_mut().enumerate() {
                let row = first_row + u32::try_from(i / 10).unwrap();
                *v += row * 10 + 1;
            }
        });
        // Every sample was written exactly once, tagged with its global row.
        for (i, v) in data.iter().enumerate() {
            let row = u32::try_from(i / 10).unwrap();
            assert_eq!(*v, row * 10 + 1, "sample {i}");
        }
    }

    #[test]
    fn for_each_band_on_empty_buffer_is_noop() {
        let workers = Workers::new(2).unwrap();
        let mut data: Vec<f32> = Vec::new();
        workers.for_each_band(&mut data, Dimensions::new(0, 0), 1, |_, _| {});
        assert!(data.is_empty());
    }
}
