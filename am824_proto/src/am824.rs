//! AM824 quadlet labels.
//!
//! Every quadlet of a data block starts with an 8-bit label telling the
//! receiver how to interpret the 24 bits that follow.

/// Multi-bit linear audio, 24-bit sample.
pub const LABEL_MBLA: u8 = 0x40;

/// MIDI conformant data, no byte in this quadlet.
pub const LABEL_MIDI_EMPTY: u8 = 0x80;

/// MIDI conformant data carrying one byte.
pub const LABEL_MIDI_ONE: u8 = 0x81;

/// Largest number of MIDI bytes a single quadlet can carry.
pub const MIDI_MAX_BYTES: usize = 3;

/// A PCM quadlet holding digital silence.
pub const PCM_SILENCE: u32 = (LABEL_MBLA as u32) << 24;

/// An empty MIDI quadlet.
pub const MIDI_EMPTY: u32 = (LABEL_MIDI_EMPTY as u32) << 24;

/// Interpretation of the label of a received MIDI quadlet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiLabel {
    Empty,
    /// The quadlet carries this many bytes (1..=3).
    Bytes(usize),
    /// Not a MIDI conformant data label.
    Invalid(u8),
}

impl MidiLabel {
    #[inline(always)]
    pub const fn parse(label: u8) -> Self {
        match label {
            LABEL_MIDI_EMPTY => Self::Empty,
            0x81..=0x83 => Self::Bytes((label - LABEL_MIDI_EMPTY) as usize),
            other => Self::Invalid(other),
        }
    }
}
