//! The isochronous transmit/receive facility the engine runs on.
//!
//! A transport owns a cyclic queue of packet descriptors. The engine primes it
//! with [`IsoQueue::enqueue`] before starting, then refills it from the
//! transport's callback, once per batch of completed cycles.

use crate::error::TransportError;
use am824_proto::Direction;
use serde::{Deserialize, Serialize};

/// Bus speed of an isochronous channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Speed {
    S100,
    S200,
    S400,
    S800,
}

impl Speed {
    /// Largest isochronous payload allowed at this speed, in bytes.
    #[inline(always)]
    pub const fn max_payload(self) -> usize {
        match self {
            Self::S100 => 1024,
            Self::S200 => 2048,
            Self::S400 => 4096,
            Self::S800 => 8192,
        }
    }
}

/// Everything a transport needs to allocate a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    pub direction: Direction,
    pub channel: u8,
    pub speed: Speed,
    /// Bytes of per-packet header the transport reports in [`IsoEvent::headers`].
    pub header_size: usize,
    /// Largest packet the stream will queue or accept, CIP header included.
    pub max_payload: usize,
    /// Number of packets in flight.
    pub queue_length: usize,
}

/// Descriptor of one queued packet.
///
/// For transmit contexts, `payload` holds the bytes to send (the transport
/// copies them). For receive contexts it is empty, and `payload_length` is the
/// buffer space to reserve.
#[derive(Debug, Clone, Copy)]
pub struct IsoPacket<'a> {
    /// Index of the staging slot this packet comes from.
    pub slot: usize,
    pub header_length: usize,
    pub payload: &'a [u8],
    pub payload_length: usize,
    /// Send nothing in this cycle.
    pub skip: bool,
    /// Request a callback once this packet completes.
    pub interrupt: bool,
}

/// A batch of completed cycles.
#[derive(Debug, Clone, Copy)]
pub struct IsoEvent<'a> {
    /// Bus cycle of the last completed packet.
    pub cycle: u32,
    /// Size of each packet's entry in `headers`.
    pub header_size: usize,
    /// Concatenated per-packet headers. For receive contexts, the first
    /// quadlet of each holds the received length in its upper 16 bits.
    pub headers: &'a [u8],
    /// Received packets, CIP header included. Empty for transmit contexts.
    pub payloads: &'a [&'a [u8]],
}

impl IsoEvent<'_> {
    /// Number of packets completed in this batch.
    #[inline(always)]
    pub fn completed(&self) -> usize {
        self.headers
            .len()
            .checked_div(self.header_size)
            .unwrap_or(self.payloads.len())
    }

    /// Received length of packet `index`, as reported by its header.
    #[inline]
    pub fn payload_length(&self, index: usize) -> Option<usize> {
        let start = index * self.header_size;
        let quadlet = self.headers.get(start..start + 4)?;
        let quadlet = u32::from_be_bytes([quadlet[0], quadlet[1], quadlet[2], quadlet[3]]);
        Some((quadlet >> 16) as usize)
    }
}

/// The queue half of a transport context.
pub trait IsoQueue {
    fn enqueue(&mut self, packet: IsoPacket<'_>) -> Result<(), TransportError>;
}

/// Called by the transport for every batch of completed packets.
///
/// Never called concurrently with itself.
pub type IsoCallback = Box<dyn FnMut(&IsoEvent<'_>, &mut dyn IsoQueue) + Send>;

/// A periodic isochronous transmit or receive facility.
pub trait IsoTransport {
    type Context: Send;

    fn create(&mut self, params: &ContextParams) -> Result<Self::Context, TransportError>;

    /// A handle that can queue packets on `ctx` outside of its callback,
    /// used for priming and by slave streams.
    fn queue_handle(&mut self, ctx: &Self::Context) -> Box<dyn IsoQueue + Send>;

    /// Starts the context, at bus cycle `cycle` if given, `sync` is the
    /// sync field to match for receive contexts.
    fn start(
        &mut self,
        ctx: &mut Self::Context,
        cycle: Option<u32>,
        sync: u32,
        callback: IsoCallback,
    ) -> Result<(), TransportError>;

    /// Processes completed packets now instead of waiting for the next
    /// interrupt.
    #[inline(always)]
    fn flush_completions(&mut self, ctx: &mut Self::Context) {
        let _ = ctx;
    }

    /// Stops the context. Once this returns, the callback is never called again.
    fn stop(&mut self, ctx: &mut Self::Context);

    fn destroy(&mut self, ctx: Self::Context);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_lengths_from_headers() {
        let headers = [0x00, 0x38, 0x00, 0x00, 0x00, 0x08, 0xde, 0xad];
        let event = IsoEvent {
            cycle: 0,
            header_size: 4,
            headers: &headers,
            payloads: &[],
        };

        assert_eq!(event.completed(), 2);
        assert_eq!(event.payload_length(0), Some(56));
        assert_eq!(event.payload_length(1), Some(8));
        assert_eq!(event.payload_length(2), None);
    }
}
