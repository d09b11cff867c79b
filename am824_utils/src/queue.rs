//! Queue-related utilities.
//!
//! This module provides period tracking for cyclic buffers, and a small helper
//! for pushing batches into [`rtrb`] ring buffers.
use core::num;

pub use rtrb;

/// A counter that tracks progress through fixed-size periods.
///
/// Each time the counter advances past a multiple of it's period, a boundary
/// is considered crossed.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicCounter {
    period: num::NonZeroUsize,
    current: usize, // always less than self.period
}

impl PeriodicCounter {
    /// Creates a new counter with the given `period`.
    #[inline(always)]
    pub const fn new(period: num::NonZeroUsize) -> Self {
        Self { period, current: 0 }
    }

    /// Returns the configured period.
    #[inline(always)]
    pub const fn period(&self) -> num::NonZeroUsize {
        self.period
    }

    /// Returns the position within the current period.
    #[inline(always)]
    pub const fn current(&self) -> usize {
        self.current
    }

    #[inline(always)]
    pub const fn reset(&mut self) {
        self.current = 0;
    }

    /// Advances the counter by `n` steps.
    ///
    /// Returns the number of period boundaries crossed.
    #[inline(always)]
    pub const fn advance(&mut self, n: usize) -> usize {
        let p = self.period.get();
        let next_non_wrapped = self.current + n;
        self.current = next_non_wrapped % p;
        next_non_wrapped / p
    }

    /// Advances by one step and returns the position before advancing.
    #[inline(always)]
    pub const fn next(&mut self) -> usize {
        let current = self.current;
        self.advance(1);
        current
    }
}

/// Pushes as many of `items` as fit, in order, in a single chunk.
///
/// Returns how many were left out.
#[inline]
pub fn push_slice<T: Copy>(tx: &mut rtrb::Producer<T>, items: &[T]) -> usize {
    let n = items.len().min(tx.slots());

    let Ok(chunk) = tx.write_chunk_uninit(n) else {
        return items.len();
    };

    items.len() - chunk.fill_from_iter(items.iter().copied())
}
