//! Tunables of a stream, independent of its audio format.

use crate::syt::syt_interval_ticks;
use am824_proto::{
    CompatFlags, ConfigError, Direction, StreamConfig,
    cip::{HEADER_SIZE, MAX_TRANSFER_DELAY_TICKS, MIN_TRANSFER_DELAY_TICKS, TRANSFER_DELAY_TICKS},
};
use core::{num, time::Duration};
use serde::{Deserialize, Serialize};

/// How a transmit stream spreads frames over packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransmitMode {
    /// Every packet carries the average number of frames, rounded per the
    /// rate's pattern.
    #[default]
    NonBlocking,
    /// Packets carry either a full SYT interval of frames or none at all.
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Number of packets in flight, i.e. staging slots.
    pub queue_length: num::NonZeroUsize,
    /// A completion interrupt is requested every this many packets.
    pub interrupt_interval: num::NonZeroUsize,
    /// How long `start` waits for the transport's first callback.
    pub first_callback_timeout: Duration,
    pub transmit_mode: TransmitMode,
    pub compat: CompatFlags,
    /// Presentation delay added to transmitted timestamps, in ticks.
    /// Blocking mode adds one SYT interval on top.
    pub transfer_delay_ticks: u32,
}

impl StreamOptions {
    pub const DEFAULT: Self = Self {
        queue_length: num::NonZeroUsize::new(48).unwrap(),
        interrupt_interval: num::NonZeroUsize::new(16).unwrap(),
        first_callback_timeout: Duration::from_millis(100),
        transmit_mode: TransmitMode::NonBlocking,
        compat: CompatFlags::empty(),
        transfer_delay_ticks: TRANSFER_DELAY_TICKS,
    };
}

impl StreamOptions {
    /// Rejects values the packet engine cannot work with.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        let delay = self.transfer_delay_ticks;

        if delay < MIN_TRANSFER_DELAY_TICKS || delay > MAX_TRANSFER_DELAY_TICKS {
            return Err(ConfigError::TransferDelay(delay));
        }

        Ok(())
    }

    /// Presentation delay of a stream using `config`, in ticks, blocking
    /// transmit streams buffering one more SYT interval.
    #[inline(always)]
    pub const fn transfer_delay(&self, config: &StreamConfig) -> u32 {
        match (self.transmit_mode, config.direction()) {
            (TransmitMode::Blocking, Direction::Transmit) => {
                self.transfer_delay_ticks + syt_interval_ticks(config.sfc())
            }
            _ => self.transfer_delay_ticks,
        }
    }

    /// Largest number of data blocks in one packet of a stream using `config`.
    ///
    /// Blocking transmit streams send a whole SYT interval at once, which is
    /// more than the rate's usual maximum.
    #[inline(always)]
    pub const fn max_data_blocks(&self, config: &StreamConfig) -> u32 {
        match (self.transmit_mode, config.direction()) {
            (TransmitMode::Blocking, Direction::Transmit) => config.sfc().syt_interval().get(),
            _ => config.sfc().max_data_blocks(),
        }
    }

    /// Largest packet of a stream using `config`, CIP header included.
    #[inline(always)]
    pub const fn max_payload_bytes(&self, config: &StreamConfig) -> usize {
        let quadlets = self.max_data_blocks(config) * config.data_block_quadlets();
        HEADER_SIZE + quadlets as usize * 4
    }
}

impl Default for StreamOptions {
    #[inline(always)]
    fn default() -> Self {
        Self::DEFAULT
    }
}
