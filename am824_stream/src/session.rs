//! A stream together with the bus resources it runs on.

use crate::{
    error::{ConnectionError, Result, StreamError},
    stream::AmdtpStream,
    transport::{IsoTransport, Speed},
};
use serde::{Deserialize, Serialize};

/// Bus resources allocated to one direction of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IsoResources {
    pub channel: u8,
    pub speed: Speed,
}

/// Allocates and maintains the isochronous channel and bandwidth of a stream,
/// and the device-side connection (plug) using them.
pub trait ConnectionManager {
    /// Allocates resources for packets of up to `max_payload` bytes and
    /// connects the device.
    fn establish(&mut self, max_payload: usize) -> Result<IsoResources, ConnectionError>;

    /// Re-acquires the same resources after a bus reset.
    fn update(&mut self) -> Result<(), ConnectionError>;

    /// Disconnects the device and releases the resources.
    fn break_connection(&mut self);
}

#[derive(Debug, Clone, Copy)]
enum SessionState {
    Idle,
    Connected(IsoResources),
}

/// Starts and stops a stream together with its connection, and carries both
/// through bus resets.
pub struct Session<T: IsoTransport, C: ConnectionManager> {
    stream: AmdtpStream<T>,
    connection: C,
    state: SessionState,
}

impl<T: IsoTransport, C: ConnectionManager> Session<T, C> {
    pub fn new(stream: AmdtpStream<T>, connection: C) -> Self {
        Self {
            stream,
            connection,
            state: SessionState::Idle,
        }
    }

    /// The stream, for configuring it and binding host buffers.
    #[inline(always)]
    pub fn stream(&self) -> &AmdtpStream<T> {
        &self.stream
    }

    #[inline(always)]
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Resources in use, if started.
    #[inline(always)]
    pub fn resources(&self) -> Option<IsoResources> {
        match self.state {
            SessionState::Idle => None,
            SessionState::Connected(r) => Some(r),
        }
    }

    /// Establishes the connection, then starts the stream on it. If the stream
    /// fails to start, the connection is broken again.
    pub fn start(&mut self) -> Result<IsoResources> {
        if let SessionState::Connected(_) = self.state {
            return Err(StreamError::InvalidState(self.stream.state().name()));
        }

        let max_payload = self
            .stream
            .max_payload_bytes()
            .ok_or(StreamError::NotConfigured)?;
        let resources = self.connection.establish(max_payload)?;

        if let Err(e) = self.stream.start(resources.channel, resources.speed) {
            self.connection.break_connection();
            return Err(e);
        }

        self.state = SessionState::Connected(resources);
        Ok(resources)
    }

    /// Stops the stream, then breaks the connection.
    pub fn stop(&mut self) {
        self.stream.stop();

        if let SessionState::Connected(resources) =
            core::mem::replace(&mut self.state, SessionState::Idle)
        {
            self.connection.break_connection();
            log::info!("released channel {}", resources.channel);
        }
    }

    /// Follows a bus reset: refreshes the connection and the node id written
    /// in outgoing packets. The stream keeps running.
    pub fn bus_reset(&mut self, node_id: u8) -> Result<()> {
        let res = match self.state {
            SessionState::Connected(_) => self.connection.update(),
            SessionState::Idle => Ok(()),
        };

        self.stream.update_node_id(node_id);

        res.map_err(|e| {
            log::warn!("failed to update connection after bus reset: {e}");
            e.into()
        })
    }

    /// Stops everything and returns the parts.
    pub fn into_parts(mut self) -> (AmdtpStream<T>, C) {
        self.stop();
        (self.stream, self.connection)
    }
}
