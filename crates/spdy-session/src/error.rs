//! Session and stream error taxonomy
//!
//! [`SessionError::Fatal`] means the session is shutting down. Every
//! [`StreamError`] leaves the session usable.

use crate::config::ConfigError;
use spdy_proto::{CodecError, GoAwayStatus, RstStatus, StreamId};
use spdy_transport::TransportError;
use thiserror::Error;

/// Stream-level errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("Stream {stream_id} refused: concurrent stream limit reached")]
    Refused { stream_id: StreamId },

    #[error("Parent stream {parent_id} of stream {stream_id} does not exist")]
    ParentMissing {
        stream_id: StreamId,
        parent_id: StreamId,
    },

    #[error("Stream {0} already exists")]
    StreamInUse(StreamId),

    #[error("Stream ID {0} has the wrong parity for its initiator")]
    InvalidStreamId(StreamId),

    #[error("Invalid priority: {0}")]
    InvalidPriority(u8),

    #[error("Session is closing")]
    SessionClosing,

    #[error("Session closed")]
    SessionClosed,

    #[error("Stream {0} is closed")]
    StreamClosed(StreamId),

    #[error("Stream {stream_id} reset: {status:?}")]
    Reset {
        stream_id: StreamId,
        status: RstStatus,
    },

    #[error("Flow control violation on stream {0}")]
    FlowControl(StreamId),

    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),

    #[error("No stream IDs available")]
    IdsExhausted,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Header block error: {0}")]
    Codec(String),
}

impl StreamError {
    /// RST_STREAM status reported to the peer for this error
    pub fn rst_status(&self) -> RstStatus {
        match self {
            StreamError::Refused { .. } | StreamError::ParentMissing { .. } => {
                RstStatus::RefusedStream
            }
            StreamError::StreamInUse(_) => RstStatus::StreamInUse,
            StreamError::InvalidStreamId(_)
            | StreamError::InvalidPriority(_)
            | StreamError::InvalidOperation(_)
            | StreamError::Codec(_) => RstStatus::ProtocolError,
            StreamError::StreamClosed(_) => RstStatus::StreamAlreadyClosed,
            StreamError::FlowControl(_) => RstStatus::FlowControlError,
            StreamError::Reset { status, .. } => *status,
            StreamError::SessionClosing
            | StreamError::SessionClosed
            | StreamError::IdsExhausted
            | StreamError::Transport(_) => RstStatus::Cancel,
        }
    }
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        StreamError::Transport(err.to_string())
    }
}

impl From<CodecError> for StreamError {
    fn from(err: CodecError) -> Self {
        StreamError::Codec(err.to_string())
    }
}

/// Session-level errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session failed on stream {stream_id} ({status:?}): {reason}")]
    Fatal {
        stream_id: StreamId,
        status: GoAwayStatus,
        reason: String,
    },

    #[error("Session is already closing")]
    AlreadyClosing,

    #[error("Deflater has been initialized already")]
    CompressorInitialized,

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("Header codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Whether the session has been forced into shutdown
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Fatal { .. })
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rst_status_mapping() {
        assert_eq!(
            StreamError::Refused { stream_id: 3 }.rst_status(),
            RstStatus::RefusedStream
        );
        assert_eq!(
            StreamError::FlowControl(5).rst_status(),
            RstStatus::FlowControlError
        );
        assert_eq!(
            StreamError::Reset {
                stream_id: 1,
                status: RstStatus::Cancel
            }
            .rst_status(),
            RstStatus::Cancel
        );
    }

    #[test]
    fn test_fatal_classification() {
        let fatal = SessionError::Fatal {
            stream_id: 5,
            status: GoAwayStatus::InternalError,
            reason: "overflow".to_string(),
        };
        assert!(fatal.is_fatal());
        assert!(!SessionError::AlreadyClosing.is_fatal());
        assert!(!SessionError::from(StreamError::SessionClosing).is_fatal());
    }
}
