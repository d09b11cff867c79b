//! Compatibility predicates for known device firmware inconsistencies.
//!
//! Some devices put values in their CIP headers that do not match what they
//! actually send. Each inconsistency has a flag, and a small predicate the
//! receive path consults instead of trusting the header blindly.

use crate::cip::{CipHeader, HEADER_SIZE, HeaderError};
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Per-device workarounds, usually selected by the device control plane.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CompatFlags: u32 {
        /// The DBS field does not match the layout of the data blocks.
        const WRONG_DBS = 1 << 0;
        /// Packets without data blocks carry a garbage DBC.
        const EMPTY_HAS_WRONG_DBC = 1 << 1;
        /// The device sometimes restarts its DBC at zero.
        const SKIP_DBC_ZERO_CHECK = 1 << 2;
        /// The DBC counts the last data block of the packet, not the first.
        const DBC_IS_END_EVENT = 1 << 3;
    }
}

/// The data block size to decode a received packet with.
///
/// Devices with [`CompatFlags::WRONG_DBS`] report a DBS that does not describe
/// their payload, so the configured size is used instead.
#[inline(always)]
pub const fn effective_data_block_quadlets(
    flags: CompatFlags,
    reported: u8,
    configured: u8,
) -> u8 {
    if flags.contains(CompatFlags::WRONG_DBS) {
        configured
    } else {
        reported
    }
}

/// Number of data blocks in a received packet of `packet_len` bytes (CIP
/// header included), checked against the stream's `configured` block size.
///
/// Packets flagged as carrying no data, or too short to hold a single quadlet
/// of data, have zero blocks whatever their DBS field says.
#[inline]
pub const fn received_data_blocks(
    flags: CompatFlags,
    header: &CipHeader,
    packet_len: usize,
    configured: u8,
) -> Result<u32, HeaderError> {
    if packet_len < HEADER_SIZE + 4 || header.is_no_data() {
        return Ok(0);
    }

    if header.data_block_quadlets == 0 {
        return Err(HeaderError::ZeroDataBlockSize);
    }

    let dbs = effective_data_block_quadlets(flags, header.data_block_quadlets, configured);

    if dbs != configured {
        return Err(HeaderError::DataBlockSize {
            expected: configured,
            found: dbs,
        });
    }

    Ok(((packet_len - HEADER_SIZE) / 4 / dbs as usize) as u32)
}

/// The data block counter to trust for a received packet.
///
/// `expected` is `None` until the first packet has been seen.
#[inline(always)]
pub const fn effective_data_block_counter(
    flags: CompatFlags,
    reported: u8,
    data_blocks: u32,
    expected: Option<u8>,
) -> u8 {
    match expected {
        Some(expected)
            if data_blocks == 0 && flags.contains(CompatFlags::EMPTY_HAS_WRONG_DBC) =>
        {
            expected
        }
        _ => reported,
    }
}

/// Returns `true` if `counter` shows that packets were lost since the last one.
///
/// `expected` is the counter the previous packet predicted (`None` before the
/// first packet), `data_blocks` the number of blocks in this packet.
#[inline]
pub const fn is_discontinuity(
    flags: CompatFlags,
    counter: u8,
    expected: Option<u8>,
    data_blocks: u32,
) -> bool {
    let Some(expected) = expected else {
        return false;
    };

    if counter == 0 && flags.contains(CompatFlags::SKIP_DBC_ZERO_CHECK) {
        return false;
    }

    if flags.contains(CompatFlags::DBC_IS_END_EVENT) {
        counter != expected.wrapping_add(data_blocks as u8)
    } else {
        counter != expected
    }
}

/// The counter the next packet should carry, given this packet's counter.
#[inline(always)]
pub const fn next_data_block_counter(flags: CompatFlags, counter: u8, data_blocks: u32) -> u8 {
    if flags.contains(CompatFlags::DBC_IS_END_EVENT) {
        counter
    } else {
        counter.wrapping_add(data_blocks as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_dbs_uses_configured_size() {
        assert_eq!(effective_data_block_quadlets(CompatFlags::empty(), 8, 10), 8);
        assert_eq!(effective_data_block_quadlets(CompatFlags::WRONG_DBS, 8, 10), 10);
    }

    fn header(dbs: u8, fdf: u8) -> CipHeader {
        CipHeader {
            source_node_id: 1,
            data_block_quadlets: dbs,
            data_block_counter: 0,
            fdf,
            syt: 0xffff,
        }
    }

    #[test]
    fn data_block_count() {
        let none = CompatFlags::empty();

        assert_eq!(received_data_blocks(none, &header(2, 0x02), 8 + 6 * 8, 2), Ok(6));
        // trailing partial block is ignored
        assert_eq!(received_data_blocks(none, &header(2, 0x02), 8 + 6 * 8 + 4, 2), Ok(6));

        // no-data and short packets
        assert_eq!(received_data_blocks(none, &header(2, 0xff), 8 + 6 * 8, 2), Ok(0));
        assert_eq!(received_data_blocks(none, &header(0, 0x02), 8, 2), Ok(0));

        assert_eq!(
            received_data_blocks(none, &header(0, 0x02), 64, 2),
            Err(HeaderError::ZeroDataBlockSize)
        );
        assert_eq!(
            received_data_blocks(none, &header(3, 0x02), 64, 2),
            Err(HeaderError::DataBlockSize {
                expected: 2,
                found: 3
            })
        );
        assert_eq!(
            received_data_blocks(CompatFlags::WRONG_DBS, &header(3, 0x02), 8 + 6 * 8, 2),
            Ok(6)
        );
    }

    #[test]
    fn empty_packets_with_garbage_counter() {
        let f = CompatFlags::EMPTY_HAS_WRONG_DBC;
        assert_eq!(effective_data_block_counter(f, 0x55, 0, Some(0x10)), 0x10);
        // only packets without data blocks are affected
        assert_eq!(effective_data_block_counter(f, 0x55, 8, Some(0x10)), 0x55);
        // nothing to substitute before the first packet
        assert_eq!(effective_data_block_counter(f, 0x55, 0, None), 0x55);
        assert_eq!(
            effective_data_block_counter(CompatFlags::empty(), 0x55, 0, Some(0x10)),
            0x55
        );
    }

    #[test]
    fn continuity() {
        let none = CompatFlags::empty();
        assert!(!is_discontinuity(none, 0x42, None, 8));
        assert!(!is_discontinuity(none, 0x08, Some(0x08), 8));
        assert!(is_discontinuity(none, 0x10, Some(0x08), 8));

        // a device restarting at zero
        assert!(is_discontinuity(none, 0, Some(0x08), 8));
        assert!(!is_discontinuity(CompatFlags::SKIP_DBC_ZERO_CHECK, 0, Some(0x08), 8));

        // end-event counters point at the last block of the packet
        let end = CompatFlags::DBC_IS_END_EVENT;
        assert!(!is_discontinuity(end, 0x0f, Some(0x07), 8));
        assert!(is_discontinuity(end, 0x08, Some(0x07), 8));
        assert!(!is_discontinuity(end, 0x03, Some(0xfb), 8));
    }

    #[test]
    fn counter_progression() {
        assert_eq!(next_data_block_counter(CompatFlags::empty(), 0xfc, 8), 0x04);
        assert_eq!(next_data_block_counter(CompatFlags::DBC_IS_END_EVENT, 0xfc, 8), 0xfc);
    }
}
