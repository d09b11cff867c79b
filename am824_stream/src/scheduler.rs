//! Data block scheduling: how many frames go into each packet.

use am824_proto::SampleFrequencyClass;

/// Produces the number of data blocks of each successive packet, so that the
/// stream carries exactly `rate / 8000` frames per bus cycle on average.
///
/// For the integer-ratio rates this is a constant. For the 44.1 kHz family a
/// repeating pattern of 80 packets (40 at 88.2 kHz, 20 at 176.4 kHz) carries
/// exactly 441 frames, with the rounded-up packets placed as early as possible
/// so that the receiver's buffer never runs dry.
#[derive(Debug, Clone)]
pub struct DataBlockScheduler {
    sfc: SampleFrequencyClass,
    phase: u32,
}

impl DataBlockScheduler {
    #[inline(always)]
    pub const fn new(sfc: SampleFrequencyClass) -> Self {
        Self { sfc, phase: 0 }
    }

    #[inline(always)]
    pub const fn sfc(&self) -> SampleFrequencyClass {
        self.sfc
    }

    /// Length of the repeating pattern, in packets.
    #[inline(always)]
    pub const fn period(&self) -> u32 {
        if self.sfc.is_base_44100() {
            80 >> self.sfc.multiplier_shift()
        } else {
            1
        }
    }

    #[inline(always)]
    pub const fn reset(&mut self) {
        self.phase = 0;
    }

    /// Returns the frame count of the next packet and advances the pattern.
    #[inline]
    pub const fn next_block_count(&mut self) -> u32 {
        if !self.sfc.is_base_44100() {
            return self.sfc.nominal_data_blocks();
        }

        let phase = self.phase;
        let shift = self.sfc.multiplier_shift();

        let blocks = if shift == 0 {
            // 6 6 5 6 5 6 5 ...
            let odd = phase & 1;
            let edge = (phase == 0 || phase >= 40) as u32;
            5 + (odd ^ edge)
        } else {
            // 12 11 11 11 11 ... or 23 22 22 22 22 ...
            11 * shift + (phase == 0) as u32
        };

        self.phase = if phase + 1 >= self.period() {
            0
        } else {
            phase + 1
        };

        blocks
    }
}

/// Data blocks of a packet in blocking mode: a full SYT interval when the
/// packet carries a timestamp, nothing otherwise.
#[inline(always)]
pub const fn blocking_block_count(sfc: SampleFrequencyClass, syt: Option<u16>) -> u32 {
    match syt {
        Some(_) => sfc.syt_interval().get(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SampleFrequencyClass::*;

    const ORACLE_44100: [u32; 80] = [
        6, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, //
        5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, //
        6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, //
        6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, 6, 5, //
    ];

    #[test]
    fn reproduces_44100_pattern() {
        let mut scheduler = DataBlockScheduler::new(Hz44100);

        // twice, to cover the wrap around
        for _ in 0..2 {
            let counts: Vec<_> = (0..80).map(|_| scheduler.next_block_count()).collect();
            assert_eq!(counts, ORACLE_44100);
        }
    }

    #[test]
    fn average_is_exact_for_every_rate() {
        for sfc in SampleFrequencyClass::ALL {
            let mut scheduler = DataBlockScheduler::new(sfc);
            let period = scheduler.period();

            let total: u32 = (0..period).map(|_| scheduler.next_block_count()).sum();

            // total / period == rate / 8000, exactly
            assert_eq!(
                u64::from(total) * 8000,
                u64::from(sfc.rate()) * u64::from(period),
                "{sfc:?}"
            );
        }
    }

    #[test]
    fn never_exceeds_max_blocks() {
        for sfc in SampleFrequencyClass::ALL {
            let mut scheduler = DataBlockScheduler::new(sfc);
            for _ in 0..160 {
                assert!(scheduler.next_block_count() <= sfc.max_data_blocks());
            }
        }
    }

    #[test]
    fn high_rates_round_up_first() {
        let mut scheduler = DataBlockScheduler::new(Hz176400);
        let counts: Vec<_> = (0..21).map(|_| scheduler.next_block_count()).collect();
        assert_eq!(counts[0], 23);
        assert!(counts[1..20].iter().all(|&c| c == 22));
        assert_eq!(counts[20], 23);

        let mut scheduler = DataBlockScheduler::new(Hz88200);
        assert_eq!(scheduler.next_block_count(), 12);
        assert_eq!(scheduler.next_block_count(), 11);
    }

    #[test]
    fn blocking_mode() {
        assert_eq!(blocking_block_count(Hz48000, Some(0x1234)), 8);
        assert_eq!(blocking_block_count(Hz96000, Some(0)), 16);
        assert_eq!(blocking_block_count(Hz192000, None), 0);
    }
}
