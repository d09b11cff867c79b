use am824_proto::ConfigError;

/// Failure reported by an [`IsoTransport`](crate::transport::IsoTransport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("isochronous context unavailable: {0}")]
    Unavailable(String),

    #[error("isochronous queue full")]
    QueueFull,

    #[error("transport error: {0}")]
    Other(String),
}

/// Failure reported by a [`ConnectionManager`](crate::session::ConnectionManager).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("no isochronous channel available")]
    NoChannel,

    #[error("insufficient bandwidth for {0} byte packets")]
    NoBandwidth(usize),

    #[error("connection error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("no callback from the transport within {0:?}")]
    StartTimeout(core::time::Duration),

    #[error("stream is not configured")]
    NotConfigured,

    #[error("operation not allowed while the stream is {0}")]
    InvalidState(&'static str),

    #[error("no MIDI port {0}")]
    InvalidMidiPort(usize),

    #[error("only a transmit stream can be slaved to another stream")]
    UnsupportedCoupling,
}

pub type Result<T, E = StreamError> = core::result::Result<T, E>;
