//! Ready-made [`MidiPort`]s backed by [`rtrb`] ring buffers.
//!
//! The stream owns one end, behind a non-blocking lock, the host keeps the
//! other. If the lock is contended (the host rebinding the port), the packet
//! simply carries no MIDI for this port.

use crate::host::MidiPort;
use am824_utils::queue::push_slice;
use core::{num, sync::atomic};
use std::sync::Arc;

/// Bytes flowing from the host to the device.
pub struct MidiOutput {
    rx: parking_lot::Mutex<rtrb::Consumer<u8>>,
}

impl MidiPort for MidiOutput {
    #[inline]
    fn pull(&self) -> Option<u8> {
        self.rx.try_lock()?.pop().ok()
    }
}

/// Creates an output port. The host pushes bytes into the returned producer.
pub fn midi_output(capacity: num::NonZeroUsize) -> (rtrb::Producer<u8>, Arc<MidiOutput>) {
    let (tx, rx) = rtrb::RingBuffer::new(capacity.get());
    let port = MidiOutput {
        rx: parking_lot::Mutex::new(rx),
    };
    (tx, Arc::new(port))
}

/// Bytes flowing from the device to the host.
pub struct MidiInput {
    tx: parking_lot::Mutex<rtrb::Producer<u8>>,
    dropped: atomic::AtomicUsize,
}

impl MidiInput {
    /// Number of received bytes lost because the host did not read fast enough.
    #[inline(always)]
    pub fn dropped_bytes(&self) -> usize {
        self.dropped.load(atomic::Ordering::Relaxed)
    }
}

impl MidiPort for MidiInput {
    #[inline]
    fn push(&self, bytes: &[u8]) {
        let lost = match self.tx.try_lock() {
            Some(mut tx) => push_slice(&mut tx, bytes),
            None => bytes.len(),
        };

        if lost != 0 {
            self.dropped.fetch_add(lost, atomic::Ordering::Relaxed);
        }
    }
}

/// Creates an input port. The host pops received bytes from the returned consumer.
pub fn midi_input(capacity: num::NonZeroUsize) -> (Arc<MidiInput>, rtrb::Consumer<u8>) {
    let (tx, rx) = rtrb::RingBuffer::new(capacity.get());
    let port = MidiInput {
        tx: parking_lot::Mutex::new(tx),
        dropped: atomic::AtomicUsize::new(0),
    };
    (Arc::new(port), rx)
}
