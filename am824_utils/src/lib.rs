//! Real-time primitives shared by the stream engine.
//!
//! This crate provides small building blocks for code that runs inside a
//! periodic, non-blocking callback while other threads configure it:
//!
//! - [`queue`]: period tracking and batch pushes into [`rtrb`] ring buffers.
//! - [`handoff`]: single-writer cells for handing values to the callback
//!   without ever taking a lock on its side.
//! - [`Latch`]: a one-shot signal the callback raises, and a caller thread
//!   waits on with a deadline.

pub mod handoff;
pub mod queue;

use core::sync::atomic::{AtomicBool, Ordering};

/// A one-shot, resettable signal, raised from a real-time context and awaited
/// on a regular thread.
///
/// Raising never blocks: it stores a flag and unparks the waiting thread, if
/// any. Waiting parks the current thread until the flag is raised or the
/// timeout elapses.
///
/// ```ignore
/// let latch = Latch::new();
///
/// // callback thread
/// latch.raise();
///
/// // caller thread
/// assert!(latch.wait(core::time::Duration::from_millis(100)));
/// ```
#[derive(Debug, Default)]
pub struct Latch {
    raised: AtomicBool,
    waiter: handoff::HandoffCell<std::thread::Thread>,
}

impl Latch {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the flag, so that the next [`wait`](Self::wait) blocks again.
    #[inline(always)]
    pub fn reset(&self) {
        self.raised.store(false, Ordering::Release);
    }

    #[inline(always)]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Raises the flag and wakes the waiting thread.
    #[inline]
    pub fn raise(&self) {
        if !self.raised.swap(true, Ordering::AcqRel) {
            if let Some(thread) = self.waiter.load().as_ref() {
                thread.unpark();
            }
        }
    }

    /// Waits until the flag is raised, for at most `timeout`.
    ///
    /// Returns whether the flag was raised.
    pub fn wait(&self, timeout: core::time::Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;

        self.waiter
            .store(Some(std::sync::Arc::new(std::thread::current())));

        let raised = loop {
            if self.is_raised() {
                break true;
            }

            let now = std::time::Instant::now();
            if now >= deadline {
                break self.is_raised();
            }

            // spurious wakeups are fine, we loop
            std::thread::park_timeout(deadline - now);
        };

        self.waiter.store(None);
        raised
    }
}
