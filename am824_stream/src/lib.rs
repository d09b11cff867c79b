//! Isochronous AM824 stream engine.
//!
//! Packs host PCM samples and MIDI bytes into CIP packets for a periodic bus
//! transport, and unpacks received ones, one bus cycle at a time:
//!
//! - [`scheduler`] decides how many frames go in each packet,
//! - [`syt`] computes each packet's presentation timestamp,
//! - [`am824`] encodes and decodes the data blocks,
//! - the packet engine ties them together inside the transport callback,
//! - [`AmdtpStream`] and [`Session`] start and stop it.
//!
//! The bus itself, the device connection and the audio host are traits
//! ([`IsoTransport`], [`ConnectionManager`], [`PcmSubstream`], [`MidiPort`]),
//! implemented by the driver using this crate.

pub mod am824;
mod engine;
pub mod error;
pub mod host;
pub mod midi;
pub mod options;
pub mod scheduler;
pub mod session;
pub mod stream;
pub mod syt;
pub mod transport;

pub use am824_proto as proto;

pub use engine::{StreamState, StreamStats};
pub use error::{ConnectionError, Result, StreamError, TransportError};
pub use host::{MidiPort, PcmSamples, PcmSamplesMut, PcmSubstream};
pub use options::{StreamOptions, TransmitMode};
pub use session::{ConnectionManager, IsoResources, Session};
pub use stream::{AmdtpStream, pair};
pub use transport::{
    ContextParams, IsoCallback, IsoEvent, IsoPacket, IsoQueue, IsoTransport, Speed,
};
