//! Lock-free handoff between a configuring thread and a real-time callback.
//!
//! Values crossing from one side to the other are published whole: the
//! writer swaps in a new value, the reader takes a snapshot. Neither side ever
//! blocks, and no field is read-modify-written from both sides.

use arc_swap::ArcSwapOption;
use core::{fmt, sync::atomic};
use std::sync::Arc;

/// A single-slot mailbox holding an optional shared value.
///
/// Intended for exactly one writer (e.g. the audio host binding a handle) and
/// one reader (the stream callback). Loading is wait-free and never allocates.
pub struct HandoffCell<T> {
    slot: ArcSwapOption<T>,
}

impl<T> Default for HandoffCell<T> {
    #[inline(always)]
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> fmt::Debug for HandoffCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffCell")
            .field("occupied", &self.is_occupied())
            .finish()
    }
}

impl<T> HandoffCell<T> {
    #[inline(always)]
    pub fn empty() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
        }
    }

    #[inline(always)]
    pub fn new(value: Option<Arc<T>>) -> Self {
        Self {
            slot: ArcSwapOption::new(value),
        }
    }

    /// Publishes a new value, or clears the cell with `None`.
    #[inline(always)]
    pub fn store(&self, value: Option<Arc<T>>) {
        self.slot.store(value);
    }

    /// Publishes a new value and returns the previous one.
    #[inline(always)]
    pub fn swap(&self, value: Option<Arc<T>>) -> Option<Arc<T>> {
        self.slot.swap(value)
    }

    /// Takes a snapshot of the current value.
    ///
    /// The snapshot stays valid even if the writer replaces the value
    /// meanwhile. Keep it short lived on the real-time side.
    #[inline(always)]
    pub fn load(&self) -> arc_swap::Guard<Option<Arc<T>>> {
        self.slot.load()
    }

    #[inline(always)]
    pub fn is_occupied(&self) -> bool {
        self.slot.load().is_some()
    }
}

/// A bitmap of up to 32 flags with a single writer.
///
/// The owning side flips individual bits, the real-time side reads a whole
/// snapshot once per packet.
#[derive(Debug, Default)]
pub struct TriggerMask {
    bits: atomic::AtomicU32,
}

impl TriggerMask {
    pub const CAPACITY: usize = u32::BITS as usize;

    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            bits: atomic::AtomicU32::new(0),
        }
    }

    /// Sets or clears bit `index`. Out of range indices are ignored.
    #[inline]
    pub fn set(&self, index: usize, on: bool) {
        let Some(bit) = u32::try_from(index).ok().and_then(|i| 1u32.checked_shl(i)) else {
            return;
        };

        if on {
            self.bits.fetch_or(bit, atomic::Ordering::Release);
        } else {
            self.bits.fetch_and(!bit, atomic::Ordering::Release);
        }
    }

    #[inline(always)]
    pub fn clear(&self) {
        self.bits.store(0, atomic::Ordering::Release);
    }

    #[inline(always)]
    pub fn snapshot(&self) -> u32 {
        self.bits.load(atomic::Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_set(&self, index: usize) -> bool {
        index < Self::CAPACITY && self.snapshot() & (1 << index) != 0
    }
}
