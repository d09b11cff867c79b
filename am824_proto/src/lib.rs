//! Wire-level definitions for AM824 audio/MIDI streams carried in Common
//! Isochronous Packets (CIP) over a fixed-cycle serial bus.
//!
//! This crate is purely descriptive: it does not move any data by itself.
//! It defines the vocabulary shared by every layer of the stream engine.
//!
//! ## Contents
//!
//! - [`format`]: the table of supported sample rates, their sample-frequency
//!   classes (SFC) and the constants derived from them, together with the
//!   immutable per-stream [`StreamConfig`](format::StreamConfig).
//! - [`cip`]: the two-quadlet CIP header with SYT field, and the bus clock
//!   constants it is expressed in.
//! - [`am824`]: the label bytes used to tag each quadlet of an AM824 data
//!   block.
//! - [`compat`]: named predicates for known device firmware inconsistencies,
//!   applied on the receive path.
//!
//! ## Packet model
//!
//! The bus runs at 8000 cycles per second. Each cycle, a stream may place at
//! most one packet on its channel. A packet is a CIP header followed by zero or
//! more *data blocks*, each data block being one frame worth of PCM samples
//! and multiplexed MIDI bytes, one big-endian quadlet each.
//!
//! Because most sample rates are not integer multiples of the cycle rate, the
//! number of data blocks varies from packet to packet. Receivers reconstruct the
//! sample clock from the SYT timestamp carried by some of the packets.
//!
//! The types in this crate implement `serde`'s `Serialize` and `Deserialize`
//! traits, for the user to conveniently plug into other `serde` backends.

pub mod am824;
pub mod cip;
pub mod compat;
pub mod format;

pub use compat::CompatFlags;
pub use format::{ConfigError, Direction, SampleFrequencyClass, SampleWidth, StreamConfig};
