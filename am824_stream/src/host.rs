//! The audio host side: PCM ring buffers and MIDI endpoints.
//!
//! The engine calls into these from the transport callback, so
//! implementations must not block.

use am824_proto::SampleWidth;

/// Interleaved host samples, borrowed.
#[derive(Debug, Clone, Copy)]
pub enum PcmSamples<'a> {
    S16(&'a [i16]),
    S32(&'a [i32]),
}

/// Interleaved host samples, mutably borrowed.
#[derive(Debug)]
pub enum PcmSamplesMut<'a> {
    S16(&'a mut [i16]),
    S32(&'a mut [i32]),
}

impl PcmSamples<'_> {
    #[inline(always)]
    pub const fn len(&self) -> usize {
        match self {
            Self::S16(s) => s.len(),
            Self::S32(s) => s.len(),
        }
    }

    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PcmSamplesMut<'_> {
    #[inline(always)]
    pub const fn len(&self) -> usize {
        match self {
            Self::S16(s) => s.len(),
            Self::S32(s) => s.len(),
        }
    }

    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn fill_silence(&mut self) {
        match self {
            Self::S16(s) => s.fill(0),
            Self::S32(s) => s.fill(0),
        }
    }
}

/// Owned scratch space for one packet's worth of samples, allocated at start.
#[derive(Debug, Clone)]
pub(crate) enum PcmBuffer {
    S16(Vec<i16>),
    S32(Vec<i32>),
}

impl PcmBuffer {
    pub(crate) fn new(width: SampleWidth, len: usize) -> Self {
        match width {
            SampleWidth::S16 => Self::S16(vec![0; len]),
            SampleWidth::S32 => Self::S32(vec![0; len]),
        }
    }

    /// The first `len` samples. Panics if `len` exceeds the allocation.
    #[inline(always)]
    pub(crate) fn samples(&self, len: usize) -> PcmSamples<'_> {
        match self {
            Self::S16(v) => PcmSamples::S16(&v[..len]),
            Self::S32(v) => PcmSamples::S32(&v[..len]),
        }
    }

    #[inline(always)]
    pub(crate) fn samples_mut(&mut self, len: usize) -> PcmSamplesMut<'_> {
        match self {
            Self::S16(v) => PcmSamplesMut::S16(&mut v[..len]),
            Self::S32(v) => PcmSamplesMut::S32(&mut v[..len]),
        }
    }
}

/// A host PCM ring buffer (a "substream").
///
/// Positions are in frames, always less than [`buffer_frames`](Self::buffer_frames).
/// Reads and writes may wrap around the end of the ring.
pub trait PcmSubstream: Send + Sync {
    fn buffer_frames(&self) -> usize;

    fn period_frames(&self) -> usize;

    /// Copies frames starting at `position` into `out` (transmit streams).
    fn read_frames(&self, position: usize, out: PcmSamplesMut<'_>);

    /// Copies `samples` into the ring, starting at `position` (receive streams).
    fn write_frames(&self, position: usize, samples: PcmSamples<'_>);

    /// Called each time the buffer position crosses a period boundary.
    fn period_elapsed(&self);

    /// The stream faulted and will not deliver or consume frames anymore.
    fn abort(&self);
}

/// A host MIDI endpoint bound to one port of a stream.
pub trait MidiPort: Send + Sync {
    /// Next byte to send, if any. Called at most once per 8 data blocks.
    #[inline(always)]
    fn pull(&self) -> Option<u8> {
        None
    }

    /// Bytes received on this port.
    #[inline(always)]
    fn push(&self, bytes: &[u8]) {
        let _ = bytes;
    }
}
