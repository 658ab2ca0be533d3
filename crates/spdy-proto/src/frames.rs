//! Typed frames exchanged between the session layer and the transport

use crate::StreamId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame types carried on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum FrameType {
    Data = 0,
    SynStream = 1,
    SynReply = 2,
    RstStream = 3,
    Settings = 4,
    Ping = 6,
    GoAway = 7,
    Headers = 8,
    WindowUpdate = 9,
}

impl TryFrom<u16> for FrameType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Data),
            1 => Ok(FrameType::SynStream),
            2 => Ok(FrameType::SynReply),
            3 => Ok(FrameType::RstStream),
            4 => Ok(FrameType::Settings),
            6 => Ok(FrameType::Ping),
            7 => Ok(FrameType::GoAway),
            8 => Ok(FrameType::Headers),
            9 => Ok(FrameType::WindowUpdate),
            other => Err(other),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameType::Data => "DATA",
            FrameType::SynStream => "SYN_STREAM",
            FrameType::SynReply => "SYN_REPLY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::Ping => "PING",
            FrameType::GoAway => "GOAWAY",
            FrameType::Headers => "HEADERS",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
        };
        f.write_str(name)
    }
}

/// RST_STREAM status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum RstStatus {
    ProtocolError = 1,
    InvalidStream = 2,
    RefusedStream = 3,
    UnsupportedVersion = 4,
    Cancel = 5,
    InternalError = 6,
    FlowControlError = 7,
    StreamInUse = 8,
    StreamAlreadyClosed = 9,
    FrameTooLarge = 11,
}

impl TryFrom<u32> for RstStatus {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RstStatus::ProtocolError),
            2 => Ok(RstStatus::InvalidStream),
            3 => Ok(RstStatus::RefusedStream),
            4 => Ok(RstStatus::UnsupportedVersion),
            5 => Ok(RstStatus::Cancel),
            6 => Ok(RstStatus::InternalError),
            7 => Ok(RstStatus::FlowControlError),
            8 => Ok(RstStatus::StreamInUse),
            9 => Ok(RstStatus::StreamAlreadyClosed),
            11 => Ok(RstStatus::FrameTooLarge),
            other => Err(other),
        }
    }
}

/// GOAWAY status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum GoAwayStatus {
    Ok = 0,
    ProtocolError = 1,
    InternalError = 2,
}

impl TryFrom<u32> for GoAwayStatus {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GoAwayStatus::Ok),
            1 => Ok(GoAwayStatus::ProtocolError),
            2 => Ok(GoAwayStatus::InternalError),
            other => Err(other),
        }
    }
}

/// SYN_STREAM: opens a stream. `header_block` is compressed.
#[derive(Debug, Clone, PartialEq)]
pub struct SynStreamFrame {
    pub stream_id: StreamId,
    /// Zero when the stream is not associated with another stream
    pub associated_to_stream_id: StreamId,
    pub priority: u8,
    pub slot: u8,
    pub fin: bool,
    pub unidirectional: bool,
    pub header_block: Bytes,
}

/// SYN_REPLY: the receiver's answer to a SYN_STREAM
#[derive(Debug, Clone, PartialEq)]
pub struct SynReplyFrame {
    pub stream_id: StreamId,
    pub fin: bool,
    pub header_block: Bytes,
}

/// HEADERS: additional headers on an established stream
#[derive(Debug, Clone, PartialEq)]
pub struct HeadersFrame {
    pub stream_id: StreamId,
    pub fin: bool,
    pub header_block: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstStreamFrame {
    pub stream_id: StreamId,
    pub status: RstStatus,
}

/// Individual SETTINGS entries understood by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    MaxConcurrentStreams(u32),
    InitialWindowSize(u32),
    /// Any other setting, kept as (id, value)
    Other(u32, u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsFrame {
    pub clear_persisted: bool,
    pub settings: Vec<Setting>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFrame {
    pub id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoAwayFrame {
    pub last_good_stream_id: StreamId,
    pub status: GoAwayStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    pub stream_id: StreamId,
    pub delta_window_size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub stream_id: StreamId,
    pub fin: bool,
    pub payload: Bytes,
}

/// A decoded (or to-be-encoded) frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    SynStream(SynStreamFrame),
    SynReply(SynReplyFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    Ping(PingFrame),
    GoAway(GoAwayFrame),
    Headers(HeadersFrame),
    WindowUpdate(WindowUpdateFrame),
    Data(DataFrame),
}

impl Frame {
    pub fn data(stream_id: StreamId, payload: Bytes, fin: bool) -> Self {
        Frame::Data(DataFrame {
            stream_id,
            fin,
            payload,
        })
    }

    pub fn rst_stream(stream_id: StreamId, status: RstStatus) -> Self {
        Frame::RstStream(RstStreamFrame { stream_id, status })
    }

    pub fn go_away(last_good_stream_id: StreamId, status: GoAwayStatus) -> Self {
        Frame::GoAway(GoAwayFrame {
            last_good_stream_id,
            status,
        })
    }

    pub fn window_update(stream_id: StreamId, delta_window_size: u32) -> Self {
        Frame::WindowUpdate(WindowUpdateFrame {
            stream_id,
            delta_window_size,
        })
    }

    pub fn ping(id: u32) -> Self {
        Frame::Ping(PingFrame { id })
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::SynStream(_) => FrameType::SynStream,
            Frame::SynReply(_) => FrameType::SynReply,
            Frame::RstStream(_) => FrameType::RstStream,
            Frame::Settings(_) => FrameType::Settings,
            Frame::Ping(_) => FrameType::Ping,
            Frame::GoAway(_) => FrameType::GoAway,
            Frame::Headers(_) => FrameType::Headers,
            Frame::WindowUpdate(_) => FrameType::WindowUpdate,
            Frame::Data(_) => FrameType::Data,
        }
    }

    /// Stream the frame belongs to; `None` for session-level frames
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Frame::SynStream(f) => Some(f.stream_id),
            Frame::SynReply(f) => Some(f.stream_id),
            Frame::RstStream(f) => Some(f.stream_id),
            Frame::Headers(f) => Some(f.stream_id),
            Frame::WindowUpdate(f) => Some(f.stream_id),
            Frame::Data(f) => Some(f.stream_id),
            Frame::Settings(_) | Frame::Ping(_) | Frame::GoAway(_) => None,
        }
    }

    /// Whether the frame carries a compressed header block
    pub fn carries_headers(&self) -> bool {
        matches!(
            self,
            Frame::SynStream(_) | Frame::SynReply(_) | Frame::Headers(_)
        )
    }

    /// Whether the frame closes the sender's half of its stream
    pub fn is_fin(&self) -> bool {
        match self {
            Frame::SynStream(f) => f.fin,
            Frame::SynReply(f) => f.fin,
            Frame::Headers(f) => f.fin,
            Frame::Data(f) => f.fin,
            _ => false,
        }
    }
}
