//! Reducer: merge per-worker partial results into one global value.
//!
//! Workers compute partial statistics (a local gradient maximum, private
//! histograms, a private feather window) without any sharing, then hand
//! each partial to [`Reducer::merge`] exactly once. The accumulator is
//! guarded by a single coarse lock, so contention is one acquisition per
//! worker per stage.
//!
//! [`Reducer::finalize`] consumes the reducer. Because every worker
//! borrows the reducer for the duration of the fork-join scope, the
//! borrow checker guarantees finalization happens strictly after all
//! workers have joined.
//!
//! Every [`Merge`] implementation in this crate is associative and
//! commutative (max, integer sum), so the finalized value does not depend
//! on worker count or completion order.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// An accumulator that can absorb a partial result of type `P`.
///
/// Implementations must be associative and commutative: merging the same
/// set of partials in any order must produce the same accumulator.
pub trait Merge<P = Self> {
    /// Fold `partial` into `self`.
    fn merge(&mut self, partial: P);
}

/// Lock-protected accumulator shared by the workers of one stage.
#[derive(Debug)]
pub struct Reducer<T> {
    acc: Mutex<T>,
    merges: AtomicUsize,
}

impl<T> Reducer<T> {
    /// Create a reducer seeded with the identity value of the merge.
    #[must_use]
    pub const fn new(initial: T) -> Self {
        Self {
            acc: Mutex::new(initial),
            merges: AtomicUsize::new(0),
        }
    }

    /// Merge one worker's partial result into the accumulator.
    pub fn merge<P>(&self, partial: P)
    where
        T: Merge<P>,
    {
        self.acc.lock().merge(partial);
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of partials merged so far.
    #[must_use]
    pub fn merge_count(&self) -> usize {
        self.merges.load(Ordering::Relaxed)
    }

    /// Consume the reducer and return the merged value.
    #[must_use]
    pub fn finalize(self) -> T {
        self.acc.into_inner()
    }
}

/// Running maximum of a non-negative quantity.
///
/// The default value `0.0` is the identity for non-negative inputs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Maximum(pub f32);

impl Merge for Maximum {
    fn merge(&mut self, partial: Self) {
        if partial.0 > self.0 {
            self.0 = partial.0;
        }
    }
}

impl Merge<f32> for Maximum {
    fn merge(&mut self, partial: f32) {
        self.merge(Self(partial));
    }
}
