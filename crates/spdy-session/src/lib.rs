//! SPDY Session Layer
//!
//! Multiplexes many logical streams over one ordered frame transport:
//! stream-ID allocation, admission control, the stream registry, per-stream
//! flow control, the shared header compression context and the GOAWAY
//! shutdown handshake.
//!
//! # Example
//!
//! ```no_run
//! use spdy_proto::{HeaderBlock, Role};
//! use spdy_session::{Session, SessionConfig, StreamRequest};
//! use spdy_transport::channel_transport;
//! use std::sync::Arc;
//!
//! let (transport, _frames) = channel_transport("conn-1");
//! let (session, _incoming) =
//!     Session::new(Role::Client, SessionConfig::client_default(), Arc::new(transport))?;
//!
//! let stream = session.open_stream(StreamRequest::new(
//!     HeaderBlock::new().with(":method", "GET").with(":path", "/"),
//! ))?;
//! stream.finish()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod allocator;
pub mod config;
mod dispatch;
pub mod error;
pub mod flow_control;
mod registry;
pub mod session;
pub mod stream;
pub mod table;
mod writer;

pub use allocator::StreamIdAllocator;
pub use config::{ConfigError, SessionConfig, DEFAULT_COMPRESSION_LEVEL};
pub use error::{SessionError, SessionResult, StreamError};
pub use flow_control::{Window, WindowError};
pub use registry::CloseState;
pub use session::{IncomingStreams, Session};
pub use stream::{Stream, StreamEvent, StreamRequest, StreamState, WriteHandle};
pub use table::SessionTable;
