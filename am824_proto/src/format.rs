//! Rate/format table and stream configuration.

use core::num;
use serde::{Deserialize, Serialize};

/// Maximum number of PCM channels in a single stream.
pub const MAX_PCM_CHANNELS: u32 = 64;

/// Maximum number of MIDI ports in a single stream.
pub const MAX_MIDI_PORTS: u32 = 16;

/// Number of MIDI ports multiplexed into one data block quadlet.
pub const MIDI_PORTS_PER_QUADLET: u32 = 8;

/// Errors returned when describing a stream that the engine cannot carry.
///
/// These are always reported synchronously, before any resource is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported sample rate: {0} Hz")]
    UnsupportedRate(u32),

    #[error("unsupported sample-frequency class code: {0:#04x}")]
    UnsupportedSfc(u8),

    #[error("too many PCM channels: {0} (at most 64)")]
    TooManyPcmChannels(u32),

    #[error("too many MIDI ports: {0} (at most 16)")]
    TooManyMidiPorts(u32),

    #[error("a stream must carry at least one PCM channel or MIDI port")]
    EmptyDataBlock,

    #[error("unsupported sample width: {0} bits")]
    UnsupportedWidth(u32),

    #[error("transfer delay of {0} ticks is out of range (3072 to 49152)")]
    TransferDelay(u32),
}

/// Direction of a stream, fixed per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Host to device.
    Transmit,
    /// Device to host.
    Receive,
}

/// The sample-frequency classes of IEC 61883-6, in SFC code order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SampleFrequencyClass {
    Hz32000 = 0,
    Hz44100 = 1,
    Hz48000 = 2,
    Hz88200 = 3,
    Hz96000 = 4,
    Hz176400 = 5,
    Hz192000 = 6,
}

/// One row of the rate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RateInfo {
    rate: u32,
    sfc: SampleFrequencyClass,
    /// Largest number of data blocks a packet can carry at this rate.
    max_data_blocks: u32,
    /// Number of frames between two SYT-stamped events.
    syt_interval: u32,
}

const RATE_TABLE: [RateInfo; 7] = {
    use SampleFrequencyClass::*;

    const fn row(rate: u32, sfc: SampleFrequencyClass, max: u32, syt: u32) -> RateInfo {
        RateInfo {
            rate,
            sfc,
            max_data_blocks: max,
            syt_interval: syt,
        }
    }

    [
        row(32000, Hz32000, 4, 8),
        row(44100, Hz44100, 6, 8),
        row(48000, Hz48000, 6, 8),
        row(88200, Hz88200, 12, 16),
        row(96000, Hz96000, 12, 16),
        row(176400, Hz176400, 23, 32),
        row(192000, Hz192000, 24, 32),
    ]
};

impl SampleFrequencyClass {
    /// All classes, in SFC code order.
    pub const ALL: [Self; 7] = {
        use SampleFrequencyClass::*;
        [
            Hz32000, Hz44100, Hz48000, Hz88200, Hz96000, Hz176400, Hz192000,
        ]
    };

    #[inline(always)]
    const fn info(self) -> &'static RateInfo {
        &RATE_TABLE[self as usize]
    }

    /// Looks up the class of a sample rate given in Hz.
    pub fn from_rate(rate: u32) -> Result<Self, ConfigError> {
        RATE_TABLE
            .iter()
            .find(|info| info.rate == rate)
            .map(|info| info.sfc)
            .ok_or(ConfigError::UnsupportedRate(rate))
    }

    /// Parses the 3-bit SFC code carried in the FDF field.
    pub fn from_code(code: u8) -> Result<Self, ConfigError> {
        Self::ALL
            .get(usize::from(code))
            .copied()
            .ok_or(ConfigError::UnsupportedSfc(code))
    }

    /// The SFC code, as placed in the FDF field of the CIP header.
    #[inline(always)]
    pub const fn code(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    pub const fn rate(self) -> u32 {
        self.info().rate
    }

    /// Whether this rate belongs to the 44.1 kHz family, whose frame count per
    /// bus cycle is not an integer.
    #[inline(always)]
    pub const fn is_base_44100(self) -> bool {
        matches!(self, Self::Hz44100 | Self::Hz88200 | Self::Hz176400)
    }

    /// Power-of-two multiplier relative to the base rate of the family
    /// (0 for 32/44.1/48 kHz, 1 for 88.2/96 kHz, 2 for 176.4/192 kHz).
    #[inline(always)]
    pub const fn multiplier_shift(self) -> u32 {
        (self as u32) >> 1
    }

    /// Frames per bus cycle, rounded down.
    ///
    /// Exact for the integer-ratio rates.
    #[inline(always)]
    pub const fn nominal_data_blocks(self) -> u32 {
        self.rate() / crate::cip::CYCLES_PER_SECOND
    }

    #[inline(always)]
    pub const fn max_data_blocks(self) -> u32 {
        self.info().max_data_blocks
    }

    #[inline(always)]
    pub const fn syt_interval(self) -> num::NonZeroU32 {
        match num::NonZeroU32::new(self.info().syt_interval) {
            Some(n) => n,
            None => unreachable!(),
        }
    }
}

impl TryFrom<u32> for SampleFrequencyClass {
    type Error = ConfigError;

    #[inline(always)]
    fn try_from(rate: u32) -> Result<Self, Self::Error> {
        Self::from_rate(rate)
    }
}

/// Width of the host's native PCM samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SampleWidth {
    S16,
    S32,
}

impl SampleWidth {
    pub const fn from_bits(bits: u32) -> Result<Self, ConfigError> {
        match bits {
            16 => Ok(Self::S16),
            32 => Ok(Self::S32),
            other => Err(ConfigError::UnsupportedWidth(other)),
        }
    }

    /// Size of a single host sample in bytes.
    #[inline(always)]
    pub const fn sample_size(self) -> num::NonZeroU8 {
        let res = match self {
            Self::S16 => 2,
            Self::S32 => 4,
        };

        match num::NonZeroU8::new(res) {
            Some(n) => n,
            None => unreachable!(),
        }
    }
}

/// A complete, validated description of one stream.
///
/// Fixed once the stream is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StreamConfigRepr")]
pub struct StreamConfig {
    sfc: SampleFrequencyClass,
    pcm_channels: u32,
    midi_ports: u32,
    width: SampleWidth,
    direction: Direction,
}

#[derive(Deserialize)]
struct StreamConfigRepr {
    sfc: SampleFrequencyClass,
    pcm_channels: u32,
    midi_ports: u32,
    width: SampleWidth,
    direction: Direction,
}

impl TryFrom<StreamConfigRepr> for StreamConfig {
    type Error = ConfigError;

    fn try_from(r: StreamConfigRepr) -> Result<Self, Self::Error> {
        Self::new(r.sfc, r.pcm_channels, r.midi_ports, r.width, r.direction)
    }
}

impl StreamConfig {
    pub const fn new(
        sfc: SampleFrequencyClass,
        pcm_channels: u32,
        midi_ports: u32,
        width: SampleWidth,
        direction: Direction,
    ) -> Result<Self, ConfigError> {
        if pcm_channels > MAX_PCM_CHANNELS {
            return Err(ConfigError::TooManyPcmChannels(pcm_channels));
        }

        if midi_ports > MAX_MIDI_PORTS {
            return Err(ConfigError::TooManyMidiPorts(midi_ports));
        }

        if pcm_channels == 0 && midi_ports == 0 {
            return Err(ConfigError::EmptyDataBlock);
        }

        Ok(Self {
            sfc,
            pcm_channels,
            midi_ports,
            width,
            direction,
        })
    }

    /// Same as [`StreamConfig::new`], with the rate given in Hz.
    pub fn with_rate(
        rate: u32,
        pcm_channels: u32,
        midi_ports: u32,
        width: SampleWidth,
        direction: Direction,
    ) -> Result<Self, ConfigError> {
        Self::new(
            SampleFrequencyClass::from_rate(rate)?,
            pcm_channels,
            midi_ports,
            width,
            direction,
        )
    }

    #[inline(always)]
    pub const fn sfc(&self) -> SampleFrequencyClass {
        self.sfc
    }

    #[inline(always)]
    pub const fn pcm_channels(&self) -> u32 {
        self.pcm_channels
    }

    #[inline(always)]
    pub const fn midi_ports(&self) -> u32 {
        self.midi_ports
    }

    #[inline(always)]
    pub const fn width(&self) -> SampleWidth {
        self.width
    }

    #[inline(always)]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Number of quadlets holding multiplexed MIDI, `ceil(midi_ports / 8)`.
    #[inline(always)]
    pub const fn midi_quadlets(&self) -> u32 {
        self.midi_ports.div_ceil(MIDI_PORTS_PER_QUADLET)
    }

    /// Size of a data block in quadlets (the DBS field).
    ///
    /// Never zero, and always fits the 8-bit DBS field given the channel limits.
    #[inline(always)]
    pub const fn data_block_quadlets(&self) -> u32 {
        self.pcm_channels + self.midi_quadlets()
    }

    /// Upper bound on the size of any packet of this stream, CIP header included.
    #[inline(always)]
    pub const fn max_payload_bytes(&self) -> usize {
        let quadlets = self.sfc.max_data_blocks() * self.data_block_quadlets();
        crate::cip::HEADER_SIZE + quadlets as usize * 4
    }

    /// Number of host samples for `frames` frames.
    #[inline(always)]
    pub const fn frames_to_samples(&self, frames: usize) -> usize {
        frames * self.pcm_channels as usize
    }
}
