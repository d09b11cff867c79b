//! Presentation timestamp (SYT) generation.

use am824_proto::{
    SampleFrequencyClass,
    cip::{TICKS_PER_CYCLE, TICKS_PER_SECOND},
};

/// Length of the 44.1 kHz family's increment pattern, in packets.
const PHASE_PERIOD_44100: u32 = 147;

/// Computes the SYT of successive packets of a transmitted stream.
///
/// The generator tracks, in ticks of the 24.576 MHz cycle-offset clock, where
/// within the current bus cycle the next SYT-stamped frame falls. When that
/// event slips past the end of the cycle the packet carries no timestamp, and
/// the offset is brought back by one cycle.
#[derive(Debug, Clone)]
pub struct SytGenerator {
    sfc: SampleFrequencyClass,
    /// Offset of the next event, in ticks. `>= TICKS_PER_CYCLE` means "not in
    /// this cycle".
    last_offset: u32,
    phase: u32,
    transfer_delay: u32,
}

impl SytGenerator {
    /// `transfer_delay` is the presentation delay in ticks, usually
    /// [`TRANSFER_DELAY_TICKS`](am824_proto::cip::TRANSFER_DELAY_TICKS).
    #[inline(always)]
    pub const fn new(sfc: SampleFrequencyClass, transfer_delay: u32) -> Self {
        Self {
            sfc,
            last_offset: TICKS_PER_CYCLE,
            phase: 0,
            transfer_delay,
        }
    }

    #[inline(always)]
    pub const fn transfer_delay(&self) -> u32 {
        self.transfer_delay
    }

    /// Ticks the event position moves by, per cycle, past the cycle boundary.
    ///
    /// For the 44.1 kHz family this alternates between 1386 and 1387, so that
    /// the running sum equals `n * syt_interval * 24576000 / rate mod 3072`,
    /// rounded down, for every `n`.
    #[inline]
    const fn increment(&mut self) -> u32 {
        if !self.sfc.is_base_44100() {
            let interval_ticks =
                self.sfc.syt_interval().get() * (TICKS_PER_SECOND / self.sfc.rate());
            return interval_ticks - TICKS_PER_CYCLE;
        }

        let phase = self.phase;
        let index = phase % 13;
        let extra = (index != 0 && index % 4 == 0) || phase == PHASE_PERIOD_44100 - 1;

        self.phase = if phase + 1 >= PHASE_PERIOD_44100 {
            0
        } else {
            phase + 1
        };

        1386 + extra as u32
    }

    /// Returns the SYT for the packet sent in bus cycle `cycle`, or `None` if
    /// no SYT-stamped frame falls within that packet.
    #[inline]
    pub const fn next_syt(&mut self, cycle: u32) -> Option<u16> {
        let offset = if self.last_offset < TICKS_PER_CYCLE {
            self.last_offset + self.increment()
        } else {
            self.last_offset - TICKS_PER_CYCLE
        };

        self.last_offset = offset;

        if offset >= TICKS_PER_CYCLE {
            return None;
        }

        let presentation = offset + self.transfer_delay - TICKS_PER_CYCLE;
        let syt = (cycle.wrapping_add(presentation / TICKS_PER_CYCLE) << 12)
            .wrapping_add(presentation % TICKS_PER_CYCLE);

        Some((syt & 0xffff) as u16)
    }
}

/// Duration of one SYT interval, in ticks, rounded down.
///
/// Blocking streams add this to their presentation delay, since devices buffer
/// one more interval to absorb the no-data packets.
#[inline(always)]
pub const fn syt_interval_ticks(sfc: SampleFrequencyClass) -> u32 {
    let ticks = (TICKS_PER_SECOND as u64 * sfc.syt_interval().get() as u64) / sfc.rate() as u64;
    ticks as u32
}
