//! The two-quadlet CIP header with SYT field, and bus clock constants.
//!
//! ```text
//!  quadlet 0: | 0 | 0 |    SID    |      DBS      | FN | QPC |S|  rsv  |      DBC      |
//!  quadlet 1: | 1 | 0 |    FMT    |      FDF      |              SYT                  |
//! ```
//!
//! Both quadlets are big-endian on the wire.

use serde::{Deserialize, Serialize};

/// Bus cycles per second.
pub const CYCLES_PER_SECOND: u32 = 8000;

/// Ticks of the 24.576 MHz cycle-offset clock within one bus cycle.
pub const TICKS_PER_CYCLE: u32 = 3072;

/// Ticks of the cycle-offset clock per second.
pub const TICKS_PER_SECOND: u32 = TICKS_PER_CYCLE * CYCLES_PER_SECOND;

/// Default presentation delay added to every SYT, about 479 µs.
pub const TRANSFER_DELAY_TICKS: u32 = 0x2e00;

/// Bounds of the presentation delay, in ticks. The SYT only tells cycles
/// apart within 16 cycles, and the delay must cover at least the current one.
pub const MIN_TRANSFER_DELAY_TICKS: u32 = TICKS_PER_CYCLE;
pub const MAX_TRANSFER_DELAY_TICKS: u32 = 16 * TICKS_PER_CYCLE;

/// Size of the CIP header, in bytes.
pub const HEADER_SIZE: usize = 8;

/// The SYT value meaning "no timestamp in this packet".
pub const SYT_NO_INFO: u16 = 0xffff;

/// FMT value for AM824 (audio & music) data.
pub const FMT_AM: u8 = 0x10;

/// FDF value signalling a packet without data blocks.
pub const FDF_NO_DATA: u8 = 0xff;

const EOH: u32 = 1 << 31;
const SID_SHIFT: u32 = 24;
const SID_MASK: u32 = 0x3f << SID_SHIFT;
const DBS_SHIFT: u32 = 16;
const DBS_MASK: u32 = 0xff << DBS_SHIFT;
const DBC_MASK: u32 = 0xff;
const FMT_SHIFT: u32 = 24;
const FMT_MASK: u32 = 0x3f << FMT_SHIFT;
const FDF_SHIFT: u32 = 16;
const FDF_MASK: u32 = 0xff << FDF_SHIFT;
const SYT_MASK: u32 = 0xffff;

/// Reasons for rejecting a received CIP header.
///
/// None of these are fatal to a stream: the packet is replaced by silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum HeaderError {
    #[error("packet too short for a CIP header: {0} bytes")]
    Truncated(usize),

    #[error("invalid end-of-header bits: {0:08X}:{1:08X}")]
    EndOfHeader(u32, u32),

    #[error("not an AM824 packet (FMT {0:#04x})")]
    Format(u8),

    #[error("zero data block size")]
    ZeroDataBlockSize,

    #[error("data block size {found} does not match the configured {expected}")]
    DataBlockSize { expected: u8, found: u8 },
}

/// Decoded fields of a CIP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CipHeader {
    /// Node id of the sender, 6 bits.
    pub source_node_id: u8,
    /// Data block size, in quadlets.
    pub data_block_quadlets: u8,
    /// Data block counter, modulo 256.
    pub data_block_counter: u8,
    /// Format dependent field: an SFC code, or [`FDF_NO_DATA`].
    pub fdf: u8,
    /// Presentation timestamp, or [`SYT_NO_INFO`].
    pub syt: u16,
}

impl CipHeader {
    /// Returns `true` if the header announces a packet without data blocks.
    #[inline(always)]
    pub const fn is_no_data(&self) -> bool {
        self.fdf == FDF_NO_DATA
    }

    /// The SYT, or `None` if the packet carries no timestamp.
    #[inline(always)]
    pub const fn syt(&self) -> Option<u16> {
        syt_from_wire(self.syt)
    }

    /// Packs the header into its two big-endian quadlets.
    #[inline]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let q0 = ((u32::from(self.source_node_id) << SID_SHIFT) & SID_MASK)
            | (u32::from(self.data_block_quadlets) << DBS_SHIFT)
            | u32::from(self.data_block_counter);

        let q1 = EOH
            | (u32::from(FMT_AM) << FMT_SHIFT)
            | (u32::from(self.fdf) << FDF_SHIFT)
            | u32::from(self.syt);

        let mut out = [0; HEADER_SIZE];
        let (first, second) = out.split_at_mut(4);
        first.copy_from_slice(&q0.to_be_bytes());
        second.copy_from_slice(&q1.to_be_bytes());
        out
    }

    /// Encodes into the start of `buf`, which must be at least [`HEADER_SIZE`] bytes.
    #[inline(always)]
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[..HEADER_SIZE].copy_from_slice(&self.encode());
    }

    /// Parses and validates the header at the start of a received packet.
    ///
    /// Only the "two-quadlet CIP header with SYT field" layout carrying AM824
    /// data is accepted.
    pub fn parse(packet: &[u8]) -> Result<Self, HeaderError> {
        let (&q0, rem) = packet
            .split_first_chunk::<4>()
            .ok_or(HeaderError::Truncated(packet.len()))?;
        let (&q1, _payload) = rem
            .split_first_chunk::<4>()
            .ok_or(HeaderError::Truncated(packet.len()))?;

        let q0 = u32::from_be_bytes(q0);
        let q1 = u32::from_be_bytes(q1);

        if q0 & EOH != 0 || q1 & EOH == 0 {
            return Err(HeaderError::EndOfHeader(q0, q1));
        }

        let fmt = ((q1 & FMT_MASK) >> FMT_SHIFT) as u8;
        if fmt != FMT_AM {
            return Err(HeaderError::Format(fmt));
        }

        Ok(Self {
            source_node_id: ((q0 & SID_MASK) >> SID_SHIFT) as u8,
            data_block_quadlets: ((q0 & DBS_MASK) >> DBS_SHIFT) as u8,
            data_block_counter: (q0 & DBC_MASK) as u8,
            fdf: ((q1 & FDF_MASK) >> FDF_SHIFT) as u8,
            syt: (q1 & SYT_MASK) as u16,
        })
    }
}

/// Maps the wire SYT sentinel to `None`.
#[inline(always)]
pub const fn syt_from_wire(syt: u16) -> Option<u16> {
    if syt == SYT_NO_INFO { None } else { Some(syt) }
}

/// Maps `None` to the wire SYT sentinel.
#[inline(always)]
pub const fn syt_to_wire(syt: Option<u16>) -> u16 {
    match syt {
        Some(s) => s,
        None => SYT_NO_INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_reference_header() {
        let header = CipHeader {
            source_node_id: 0x02,
            data_block_quadlets: 2,
            data_block_counter: 0x30,
            fdf: 0x02,
            syt: 0x1234,
        };

        assert_eq!(
            header.encode(),
            [0x02, 0x02, 0x00, 0x30, 0x90, 0x02, 0x12, 0x34]
        );
        assert_eq!(CipHeader::parse(&header.encode()), Ok(header));
    }

    #[test]
    fn node_id_is_masked_to_six_bits() {
        let header = CipHeader {
            source_node_id: 0xff,
            data_block_quadlets: 1,
            data_block_counter: 0,
            fdf: FDF_NO_DATA,
            syt: SYT_NO_INFO,
        };

        let bytes = header.encode();
        assert_eq!(bytes[0], 0x3f);

        let parsed = CipHeader::parse(&bytes).unwrap();
        assert!(parsed.is_no_data());
        assert_eq!(parsed.syt(), None);
    }

    #[test]
    fn rejects_bad_framing() {
        assert_eq!(CipHeader::parse(&[0; 7]), Err(HeaderError::Truncated(7)));

        // EOH of the second quadlet cleared
        let bytes = [0x00, 0x02, 0x00, 0x00, 0x10, 0x02, 0xff, 0xff];
        assert!(matches!(
            CipHeader::parse(&bytes),
            Err(HeaderError::EndOfHeader(..))
        ));

        // EOH of the first quadlet set
        let bytes = [0x80, 0x02, 0x00, 0x00, 0x90, 0x02, 0xff, 0xff];
        assert!(matches!(
            CipHeader::parse(&bytes),
            Err(HeaderError::EndOfHeader(..))
        ));

        // MPEG2-TS format
        let bytes = [0x00, 0x02, 0x00, 0x00, 0xa0, 0x02, 0xff, 0xff];
        assert_eq!(CipHeader::parse(&bytes), Err(HeaderError::Format(0x20)));
    }
}
