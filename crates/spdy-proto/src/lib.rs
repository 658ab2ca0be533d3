//! SPDY Protocol Definitions
//!
//! This crate defines the typed frame model, status codes, stream identifiers
//! and the stateful header compression context shared by the session layer.
//! Byte-level frame encoding lives outside this crate; frames travel between
//! the session and the transport as typed values.

pub mod compression;
pub mod frames;
pub mod headers;

pub use compression::{HeaderDecoder, HeaderEncoder};
pub use frames::{
    DataFrame, Frame, FrameType, GoAwayFrame, GoAwayStatus, HeadersFrame, PingFrame,
    RstStatus, RstStreamFrame, Setting, SettingsFrame, SynReplyFrame, SynStreamFrame,
    WindowUpdateFrame,
};
pub use headers::HeaderBlock;

use thiserror::Error;

/// Stream identifier (31 bits on the wire)
pub type StreamId = u32;

/// Protocol version
pub const PROTOCOL_VERSION: u16 = 3;

/// Largest stream ID representable on the wire
pub const MAX_STREAM_ID: StreamId = 0x7fff_ffff;

/// Largest flow-control window a peer may advertise
pub const MAX_WINDOW_SIZE: u32 = 0x7fff_ffff;

/// Default per-stream flow-control window (64KB)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 64 * 1024;

/// Default cap on concurrently open streams
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;

/// Lowest (least urgent) stream priority; priorities are a 3-bit field
pub const LOWEST_PRIORITY: u8 = 7;

/// Which end of the connection a session represents.
///
/// The role fixes the parity of locally initiated stream IDs: servers use
/// even IDs, clients odd ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// First stream ID a session in this role may initiate
    pub fn first_local_stream_id(self) -> StreamId {
        match self {
            Role::Server => 2,
            Role::Client => 1,
        }
    }

    /// Whether `stream_id` was initiated by an endpoint in this role
    pub fn initiated(self, stream_id: StreamId) -> bool {
        if stream_id == 0 {
            return false;
        }
        match self {
            Role::Server => stream_id % 2 == 0,
            Role::Client => stream_id % 2 == 1,
        }
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Server => Role::Client,
            Role::Client => Role::Server,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

/// Header block codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Header block truncated")]
    Truncated,

    #[error("Header block has {0} trailing bytes")]
    TrailingBytes(usize),

    #[error("Header {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("Header field too long: {0} bytes")]
    FieldTooLong(usize),

    #[error("Compression failed: {0}")]
    Compress(#[from] flate2::CompressError),

    #[error("Decompression failed: {0}")]
    Decompress(#[from] flate2::DecompressError),
}
