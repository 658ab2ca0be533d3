//! Transport seam for the SPDY session layer
//!
//! The session never touches sockets. It hands fully formed frames to a
//! [`FrameSink`], which guarantees FIFO delivery per connection, and asks the
//! sink to close the connection once the session has drained.

pub mod channel;

pub use channel::{channel_transport, ChannelTransport, FrameReceiver, TransportEvent};

use spdy_proto::Frame;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Frame rejected: {0}")]
    Rejected(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Which side closed the physical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseType {
    Local,
    Remote,
}

/// Downstream write primitive for one connection.
///
/// `submit_frame` may be called from many threads at once; frames are
/// delivered in call order. Implementations must not block on I/O: a call
/// queues the frame and returns.
pub trait FrameSink: Send + Sync {
    /// Queue a frame for delivery
    fn submit_frame(&self, frame: Frame) -> TransportResult<()>;

    /// Close the connection after previously submitted frames
    fn close(&self);

    /// Whether the connection has been closed
    fn is_closed(&self) -> bool;
}
