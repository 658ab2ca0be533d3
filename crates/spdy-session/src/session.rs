//! Session: stream admission, local opens and the GOAWAY handshake
//!
//! Lock order, outermost first: new-stream lock (allocator), stream core,
//! registry state, compression guard. The registry lock is released before
//! any stream is notified.

use crate::allocator::StreamIdAllocator;
use crate::config::{ConfigError, SessionConfig};
use crate::error::{SessionError, SessionResult, StreamError};
use crate::registry::{CloseState, PeerAdmission, StreamRegistry};
use crate::stream::{Stream, StreamRequest, StreamState};
use crate::writer::FrameWriter;
use spdy_proto::{
    Frame, GoAwayStatus, Role, RstStatus, Setting, SettingsFrame, StreamId, SynStreamFrame,
    MAX_WINDOW_SIZE,
};
use spdy_transport::{CloseType, FrameSink};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub(crate) struct SessionShared {
    pub(crate) id: String,
    pub(crate) role: Role,
    pub(crate) local_initial_window_size: AtomicU32,
    pub(crate) peer_initial_window_size: AtomicU32,
    pub(crate) local_max_concurrent_streams: AtomicU32,
    pub(crate) peer_max_concurrent_streams: AtomicU32,
    pub(crate) registry: StreamRegistry,
    allocator: Mutex<StreamIdAllocator>,
    pub(crate) writer: FrameWriter,
    pub(crate) incoming: mpsc::UnboundedSender<Stream>,
}

impl SessionShared {
    /// Drop a stream from the registry, tearing down a drained closing session
    pub(crate) fn deregister(&self, stream_id: StreamId) {
        if self.registry.remove(stream_id) {
            self.teardown();
        }
    }

    /// The GOAWAY frame has been handed to the transport
    pub(crate) fn finish_local_close(&self) {
        if self.registry.finish_local_close() {
            self.teardown();
        }
    }

    pub(crate) fn teardown(&self) {
        info!(session_id = %self.id, "Session drained, closing connection");
        self.writer.close_transport();
    }

    pub(crate) fn send_rst(&self, stream_id: StreamId, status: RstStatus) {
        if let Err(e) = self.writer.write(Frame::rst_stream(stream_id, status)) {
            debug!(session_id = %self.id, stream_id, "Failed to send RST_STREAM: {}", e);
        }
    }

    /// Shut the session down after an unrecoverable error
    pub(crate) fn fail(
        &self,
        stream_id: StreamId,
        status: GoAwayStatus,
        reason: impl Into<String>,
    ) -> SessionError {
        let reason = reason.into();
        warn!(session_id = %self.id, stream_id, ?status, "Session failed: {}", reason);

        if let Some(last_good_stream_id) = self.registry.begin_local_close() {
            if let Err(e) = self.writer.write(Frame::go_away(last_good_stream_id, status)) {
                debug!(session_id = %self.id, "Failed to send GOAWAY: {}", e);
            }
            self.finish_local_close();
        }

        SessionError::Fatal {
            stream_id,
            status,
            reason,
        }
    }
}

/// One multiplexed connection.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct Session {
    pub(crate) shared: Arc<SessionShared>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("role", &self.shared.role)
            .field("streams", &self.shared.registry.len())
            .finish()
    }
}

/// Peer-initiated streams accepted by [`Session::handle_frame`]
#[derive(Debug)]
pub struct IncomingStreams {
    rx: mpsc::UnboundedReceiver<Stream>,
}

impl IncomingStreams {
    /// Next accepted stream; `None` once the session is gone
    pub async fn next(&mut self) -> Option<Stream> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<Stream> {
        self.rx.try_recv().ok()
    }
}

impl Session {
    pub fn new(
        role: Role,
        config: SessionConfig,
        transport: Arc<dyn FrameSink>,
    ) -> SessionResult<(Self, IncomingStreams)> {
        config.validate()?;

        let id = format!("spdy-{}-{}", role.as_str(), Uuid::new_v4());
        let (incoming, rx) = mpsc::unbounded_channel();

        let shared = Arc::new(SessionShared {
            id,
            role,
            local_initial_window_size: AtomicU32::new(config.local_initial_window_size),
            peer_initial_window_size: AtomicU32::new(config.peer_initial_window_size),
            local_max_concurrent_streams: AtomicU32::new(config.local_max_concurrent_streams),
            peer_max_concurrent_streams: AtomicU32::new(config.peer_max_concurrent_streams),
            registry: StreamRegistry::new(),
            allocator: Mutex::new(StreamIdAllocator::new(role)),
            writer: FrameWriter::new(transport, config.deflater_compression_level),
            incoming,
        });

        debug!(session_id = %shared.id, "Session created");
        Ok((Self { shared }, IncomingStreams { rx }))
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn close_state(&self) -> CloseState {
        self.shared.registry.close_state()
    }

    pub fn last_local_stream_id(&self) -> StreamId {
        self.shared
            .allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_local_stream_id()
    }

    pub fn last_peer_stream_id(&self) -> StreamId {
        self.shared.registry.last_peer_stream_id()
    }

    pub fn stream_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn get_stream(&self, stream_id: StreamId) -> Option<Stream> {
        self.shared.registry.get(stream_id)
    }

    /// IDs of the live streams associated with `parent_id`, ascending
    pub fn associated_streams(&self, parent_id: StreamId) -> Vec<StreamId> {
        self.shared.registry.children_of(parent_id)
    }

    pub fn local_initial_window_size(&self) -> u32 {
        self.shared.local_initial_window_size.load(Ordering::Acquire)
    }

    pub fn set_local_initial_window_size(&self, size: u32) -> Result<(), ConfigError> {
        if size > MAX_WINDOW_SIZE {
            return Err(ConfigError::WindowTooLarge("local_initial_window_size"));
        }
        self.shared
            .local_initial_window_size
            .store(size, Ordering::Release);
        Ok(())
    }

    pub fn peer_initial_window_size(&self) -> u32 {
        self.shared.peer_initial_window_size.load(Ordering::Acquire)
    }

    pub fn set_peer_initial_window_size(&self, size: u32) -> Result<(), ConfigError> {
        if size > MAX_WINDOW_SIZE {
            return Err(ConfigError::WindowTooLarge("peer_initial_window_size"));
        }
        self.shared
            .peer_initial_window_size
            .store(size, Ordering::Release);
        Ok(())
    }

    pub fn local_max_concurrent_streams(&self) -> u32 {
        self.shared
            .local_max_concurrent_streams
            .load(Ordering::Acquire)
    }

    pub fn set_local_max_concurrent_streams(&self, max: u32) -> Result<(), ConfigError> {
        if max == 0 {
            return Err(ConfigError::ZeroStreamLimit("local_max_concurrent_streams"));
        }
        self.shared
            .local_max_concurrent_streams
            .store(max, Ordering::Release);
        Ok(())
    }

    pub fn peer_max_concurrent_streams(&self) -> u32 {
        self.shared.peer_max_concurrent_streams.load(Ordering::Acquire)
    }

    pub fn set_peer_max_concurrent_streams(&self, max: u32) -> Result<(), ConfigError> {
        if max == 0 {
            return Err(ConfigError::ZeroStreamLimit("peer_max_concurrent_streams"));
        }
        self.shared
            .peer_max_concurrent_streams
            .store(max, Ordering::Release);
        Ok(())
    }

    pub fn deflater_compression_level(&self) -> u32 {
        self.shared.writer.compression_level()
    }

    /// Fails once the first header block has been compressed
    pub fn set_deflater_compression_level(&self, level: u32) -> SessionResult<()> {
        self.shared.writer.set_compression_level(level)
    }

    /// Open a locally initiated stream and send its SYN_STREAM.
    ///
    /// ID allocation, registration and the SYN_STREAM submission happen under
    /// the new-stream lock, so SYN_STREAM frames leave in ID order. A refused
    /// open does not use up an ID.
    pub fn open_stream(&self, request: StreamRequest) -> Result<Stream, StreamError> {
        let shared = &self.shared;
        let mut allocator = shared
            .allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let stream_id = allocator.next_local_id()?;
        let stream = Stream::new(
            shared,
            stream_id,
            &request,
            true,
            shared.peer_initial_window_size.load(Ordering::Acquire),
            shared.local_initial_window_size.load(Ordering::Acquire),
        )?;

        // Held until SYN_STREAM is out so no DATA can precede it
        let core = stream.lock_core();
        shared.registry.admit_local(
            &stream,
            shared.local_max_concurrent_streams.load(Ordering::Acquire),
        )?;
        allocator.commit(stream_id);

        let written = shared.writer.write_headers(&request.headers, |header_block| {
            Frame::SynStream(SynStreamFrame {
                stream_id,
                associated_to_stream_id: request.parent_id.unwrap_or(0),
                priority: request.priority,
                slot: request.slot,
                fin: request.fin,
                unidirectional: request.unidirectional,
                header_block,
            })
        });
        drop(core);
        drop(allocator);

        if let Err(e) = written {
            warn!(session_id = %shared.id, stream_id, "Failed to send SYN_STREAM: {}", e);
            stream.abort(e.clone());
            return Err(e);
        }

        debug!(
            session_id = %shared.id,
            stream_id,
            parent_id = ?request.parent_id,
            "Opened local stream"
        );
        if stream.state() == StreamState::Closed {
            shared.deregister(stream_id);
        }
        Ok(stream)
    }

    /// Admit a peer-initiated stream.
    ///
    /// `Ok(None)` means the session is closing and the stream was ignored.
    /// Exceeding the concurrency cap is fatal: the refused stream is reset
    /// and the session sends GOAWAY(INTERNAL_ERROR).
    pub fn accept_stream(
        &self,
        stream_id: StreamId,
        request: StreamRequest,
    ) -> SessionResult<Option<Stream>> {
        let shared = &self.shared;
        if !shared.role.peer().initiated(stream_id) {
            return Err(StreamError::InvalidStreamId(stream_id).into());
        }

        let stream = Stream::new(
            shared,
            stream_id,
            &request,
            false,
            shared.peer_initial_window_size.load(Ordering::Acquire),
            shared.local_initial_window_size.load(Ordering::Acquire),
        )?;

        let max_concurrent = shared.local_max_concurrent_streams.load(Ordering::Acquire);
        match shared.registry.admit_peer(&stream, max_concurrent) {
            PeerAdmission::Admitted => {
                debug!(session_id = %shared.id, stream_id, "Accepted peer stream");
                if stream.state() == StreamState::Closed {
                    shared.deregister(stream_id);
                }
                Ok(Some(stream))
            }
            PeerAdmission::SessionClosing => {
                debug!(session_id = %shared.id, stream_id, "Session closing, ignoring stream");
                Ok(None)
            }
            PeerAdmission::Overflow {
                last_good_stream_id,
            } => {
                warn!(
                    session_id = %shared.id,
                    stream_id,
                    max_concurrent,
                    "Peer exceeded concurrent stream limit"
                );
                shared.send_rst(stream_id, RstStatus::RefusedStream);
                if let Err(e) = shared.writer.write(Frame::go_away(
                    last_good_stream_id,
                    GoAwayStatus::InternalError,
                )) {
                    debug!(session_id = %shared.id, "Failed to send GOAWAY: {}", e);
                }
                shared.finish_local_close();

                Err(SessionError::Fatal {
                    stream_id,
                    status: GoAwayStatus::InternalError,
                    reason: format!("peer exceeded {} concurrent streams", max_concurrent),
                })
            }
            PeerAdmission::Rejected(e) => Err(e.into()),
        }
    }

    /// Start a graceful local shutdown with a single GOAWAY frame
    pub fn go_away(&self, status: GoAwayStatus) -> SessionResult<()> {
        let shared = &self.shared;
        let last_good_stream_id = shared
            .registry
            .begin_local_close()
            .ok_or(SessionError::AlreadyClosing)?;

        info!(
            session_id = %shared.id,
            last_good_stream_id,
            ?status,
            "Sending GOAWAY"
        );
        let written = shared
            .writer
            .write(Frame::go_away(last_good_stream_id, status));
        shared.finish_local_close();
        written?;
        Ok(())
    }

    /// The physical connection closed underneath the session
    pub fn connection_closed(&self, close_type: CloseType) {
        let streams = self.shared.registry.connection_lost(close_type);
        info!(
            session_id = %self.shared.id,
            ?close_type,
            streams = streams.len(),
            "Connection closed"
        );
        for stream in streams {
            stream.abort(StreamError::SessionClosed);
        }
    }

    /// Tell the peer our stream limit and initial window
    pub fn advertise_settings(&self) -> SessionResult<()> {
        let frame = Frame::Settings(SettingsFrame {
            clear_persisted: false,
            settings: vec![
                Setting::MaxConcurrentStreams(self.local_max_concurrent_streams()),
                Setting::InitialWindowSize(self.local_initial_window_size()),
            ],
        });
        self.shared.writer.write(frame)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spdy_proto::HeaderBlock;
    use spdy_transport::channel_transport;

    fn session(role: Role, config: SessionConfig) -> (Session, spdy_transport::FrameReceiver) {
        let (transport, receiver) = channel_transport("session-test");
        let (session, _incoming) = Session::new(role, config, Arc::new(transport)).unwrap();
        (session, receiver)
    }

    fn request(path: &str) -> StreamRequest {
        StreamRequest::new(HeaderBlock::new().with(":path", path))
    }

    #[test]
    fn test_session_id_names_role() {
        let (server, _rx) = session(Role::Server, SessionConfig::server_default());
        assert!(server.id().starts_with("spdy-server-"));
        let (client, _rx) = session(Role::Client, SessionConfig::client_default());
        assert!(client.id().starts_with("spdy-client-"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (transport, _receiver) = channel_transport("bad-config");
        let config = SessionConfig::default().with_local_max_concurrent_streams(0);
        let result = Session::new(Role::Client, config, Arc::new(transport));
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn test_accept_rejects_wrong_parity() {
        let (server, _rx) = session(Role::Server, SessionConfig::server_default());
        let result = server.accept_stream(2, request("/"));
        assert!(matches!(
            result,
            Err(SessionError::Stream(StreamError::InvalidStreamId(2)))
        ));
        assert_eq!(server.stream_count(), 0);
    }

    #[test]
    fn test_accept_duplicate_stream() {
        let (server, _rx) = session(Role::Server, SessionConfig::server_default());
        server.accept_stream(1, request("/")).unwrap().unwrap();
        let result = server.accept_stream(1, request("/"));
        assert!(matches!(
            result,
            Err(SessionError::Stream(StreamError::StreamInUse(1)))
        ));
    }

    #[test]
    fn test_open_rejects_priority_out_of_range() {
        let (client, _rx) = session(Role::Client, SessionConfig::client_default());
        let result = client.open_stream(request("/").with_priority(8));
        assert_eq!(result.unwrap_err(), StreamError::InvalidPriority(8));
        assert_eq!(client.last_local_stream_id(), 0);
    }

    #[test]
    fn test_local_overflow_is_not_fatal() {
        let config = SessionConfig::client_default().with_local_max_concurrent_streams(1);
        let (client, _rx) = session(Role::Client, config);

        client.open_stream(request("/a")).unwrap();
        let err = client.open_stream(request("/b")).unwrap_err();
        assert_eq!(err, StreamError::Refused { stream_id: 3 });
        assert_eq!(client.close_state(), CloseState::Open);

        // The refused open did not use up ID 3
        assert_eq!(client.last_local_stream_id(), 1);
    }

    #[test]
    fn test_unidirectional_fin_stream_is_not_kept() {
        let (server, mut rx) = session(Role::Server, SessionConfig::server_default());
        let stream = server
            .open_stream(request("/push").unidirectional().with_fin(true))
            .unwrap();

        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(server.stream_count(), 0);
        assert_eq!(rx.drain_frames().len(), 1);
    }

    #[test]
    fn test_window_defaults_apply_to_new_streams_only() {
        let (client, _rx) = session(Role::Client, SessionConfig::client_default());
        let first = client.open_stream(request("/first")).unwrap();

        client.set_peer_initial_window_size(1024).unwrap();
        let second = client.open_stream(request("/second")).unwrap();

        assert_eq!(first.send_window(), 64 * 1024);
        assert_eq!(second.send_window(), 1024);
        assert!(client.set_peer_initial_window_size(u32::MAX).is_err());
    }

    #[test]
    fn test_advertise_settings() {
        let config = SessionConfig::server_default()
            .with_local_max_concurrent_streams(16)
            .with_local_initial_window_size(4096);
        let (server, mut rx) = session(Role::Server, config);
        server.advertise_settings().unwrap();

        let frames = rx.drain_frames();
        assert_eq!(
            frames,
            vec![Frame::Settings(SettingsFrame {
                clear_persisted: false,
                settings: vec![
                    Setting::MaxConcurrentStreams(16),
                    Setting::InitialWindowSize(4096),
                ],
            })]
        );
    }

    #[test]
    fn test_connection_closed_fails_streams() {
        let (client, _rx) = session(Role::Client, SessionConfig::client_default());
        let stream = client.open_stream(request("/")).unwrap();

        client.connection_closed(CloseType::Remote);

        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(client.stream_count(), 0);
        assert_eq!(client.close_state(), CloseState::ClosingPeer);
        assert_eq!(
            client.open_stream(request("/late")).unwrap_err(),
            StreamError::SessionClosing
        );
    }
}
