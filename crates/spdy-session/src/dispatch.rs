//! Inbound frame routing

use crate::error::{SessionError, SessionResult, StreamError};
use crate::session::Session;
use crate::stream::StreamRequest;
use bytes::Bytes;
use spdy_proto::{
    DataFrame, Frame, GoAwayFrame, GoAwayStatus, PingFrame, RstStatus, Setting, SettingsFrame,
    StreamId, SynStreamFrame, WindowUpdateFrame, MAX_WINDOW_SIZE,
};
use std::sync::atomic::Ordering;
use tracing::{debug, info, trace, warn};

impl Session {
    /// Route one decoded frame from the peer.
    ///
    /// Frames must be handed over in arrival order: header blocks share one
    /// decompression context. An `Err` is always session-fatal; stream-level
    /// problems are answered with RST_STREAM and reported as `Ok`.
    pub fn handle_frame(&self, frame: Frame) -> SessionResult<()> {
        trace!(
            session_id = %self.shared.id,
            "Received {} frame for stream {:?}",
            frame.frame_type(),
            frame.stream_id()
        );

        match frame {
            Frame::SynStream(syn) => self.on_syn_stream(syn),
            Frame::SynReply(reply) => {
                self.on_stream_headers(reply.stream_id, &reply.header_block, reply.fin, true)
            }
            Frame::Headers(headers) => {
                self.on_stream_headers(headers.stream_id, &headers.header_block, headers.fin, false)
            }
            Frame::Data(data) => {
                self.on_data(data);
                Ok(())
            }
            Frame::RstStream(rst) => {
                match self.get_stream(rst.stream_id) {
                    Some(stream) => stream.on_reset(rst.status),
                    None => debug!(
                        session_id = %self.shared.id,
                        stream_id = rst.stream_id,
                        "RST_STREAM for unknown stream"
                    ),
                }
                Ok(())
            }
            Frame::WindowUpdate(update) => {
                self.on_window_update(update);
                Ok(())
            }
            Frame::Settings(settings) => self.on_settings(settings),
            Frame::Ping(ping) => self.on_ping(ping),
            Frame::GoAway(go_away) => {
                self.on_go_away(go_away);
                Ok(())
            }
        }
    }

    fn on_syn_stream(&self, syn: SynStreamFrame) -> SessionResult<()> {
        let shared = &self.shared;
        let stream_id = syn.stream_id;

        // Decompress before anything else so the shared context stays in step
        let headers = shared.writer.decode_headers(&syn.header_block).map_err(|e| {
            shared.fail(
                stream_id,
                GoAwayStatus::ProtocolError,
                format!("undecodable SYN_STREAM header block: {}", e),
            )
        })?;

        if !shared.role.peer().initiated(stream_id) || stream_id <= self.last_peer_stream_id() {
            return Err(shared.fail(
                stream_id,
                GoAwayStatus::ProtocolError,
                format!(
                    "SYN_STREAM {} is out of order or has the wrong parity",
                    stream_id
                ),
            ));
        }

        let request = StreamRequest {
            headers,
            parent_id: (syn.associated_to_stream_id != 0).then_some(syn.associated_to_stream_id),
            priority: syn.priority,
            slot: syn.slot,
            unidirectional: syn.unidirectional,
            fin: syn.fin,
        };

        match self.accept_stream(stream_id, request) {
            Ok(Some(stream)) => {
                if let Err(rejected) = shared.incoming.send(stream) {
                    debug!(session_id = %shared.id, stream_id, "No consumer for incoming streams");
                    let _ = rejected.0.reset(RstStatus::RefusedStream);
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(SessionError::Stream(e)) => {
                debug!(session_id = %shared.id, stream_id, "Rejected SYN_STREAM: {}", e);
                shared.send_rst(stream_id, e.rst_status());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn on_stream_headers(
        &self,
        stream_id: StreamId,
        header_block: &Bytes,
        fin: bool,
        reply: bool,
    ) -> SessionResult<()> {
        let shared = &self.shared;
        let headers = shared.writer.decode_headers(header_block).map_err(|e| {
            shared.fail(
                stream_id,
                GoAwayStatus::ProtocolError,
                format!("undecodable header block: {}", e),
            )
        })?;

        let Some(stream) = self.get_stream(stream_id) else {
            shared.send_rst(stream_id, RstStatus::InvalidStream);
            return Ok(());
        };

        if reply && !stream.is_locally_initiated() {
            let _ = stream.reset(RstStatus::ProtocolError);
            return Ok(());
        }

        if let Err(e) = stream.on_headers(headers, fin) {
            debug!(session_id = %shared.id, stream_id, "Rejected headers: {}", e);
            let _ = stream.reset(e.rst_status());
        }
        Ok(())
    }

    fn on_data(&self, data: DataFrame) {
        let stream_id = data.stream_id;
        let Some(stream) = self.get_stream(stream_id) else {
            self.shared.send_rst(stream_id, RstStatus::InvalidStream);
            return;
        };

        if let Err(e) = stream.on_data(data.payload, data.fin) {
            debug!(session_id = %self.shared.id, stream_id, "Rejected DATA: {}", e);
            let _ = stream.reset(e.rst_status());
        }
    }

    fn on_window_update(&self, update: WindowUpdateFrame) {
        let stream_id = update.stream_id;
        if stream_id == 0 {
            // Connection-level windows are not used
            return;
        }

        let Some(stream) = self.get_stream(stream_id) else {
            self.shared.send_rst(stream_id, RstStatus::InvalidStream);
            return;
        };

        if let Err(e) = stream.on_window_update(update.delta_window_size) {
            debug!(session_id = %self.shared.id, stream_id, "Rejected WINDOW_UPDATE: {}", e);
            let _ = stream.reset(e.rst_status());
        }
    }

    fn on_settings(&self, settings: SettingsFrame) -> SessionResult<()> {
        let shared = &self.shared;
        for setting in settings.settings {
            match setting {
                Setting::MaxConcurrentStreams(max) => {
                    debug!(session_id = %shared.id, max, "Peer max concurrent streams");
                    shared
                        .peer_max_concurrent_streams
                        .store(max, Ordering::Release);
                }
                Setting::InitialWindowSize(size) => {
                    if size > MAX_WINDOW_SIZE {
                        return Err(shared.fail(
                            0,
                            GoAwayStatus::ProtocolError,
                            format!("initial window size {} out of range", size),
                        ));
                    }
                    debug!(session_id = %shared.id, size, "Peer initial window size");
                    shared.peer_initial_window_size.store(size, Ordering::Release);
                }
                Setting::Other(id, value) => {
                    trace!(session_id = %shared.id, id, value, "Ignoring setting");
                }
            }
        }
        Ok(())
    }

    fn on_ping(&self, ping: PingFrame) -> SessionResult<()> {
        if self.shared.role.peer().initiated(ping.id) {
            self.shared.writer.write(Frame::ping(ping.id))?;
        } else {
            trace!(session_id = %self.shared.id, ping_id = ping.id, "Ping answered");
        }
        Ok(())
    }

    fn on_go_away(&self, go_away: GoAwayFrame) {
        let shared = &self.shared;
        let last_good_stream_id = go_away.last_good_stream_id;
        let Some((unprocessed, teardown)) = shared.registry.begin_peer_close(last_good_stream_id)
        else {
            debug!(session_id = %shared.id, "GOAWAY on a closing session");
            return;
        };

        info!(
            session_id = %shared.id,
            last_good_stream_id,
            status = ?go_away.status,
            unprocessed = unprocessed.len(),
            "Peer sent GOAWAY"
        );
        if go_away.status != GoAwayStatus::Ok {
            warn!(session_id = %shared.id, "Peer closing with {:?}", go_away.status);
        }

        // Streams above the marker never reached the peer's application
        for stream in unprocessed {
            stream.abort(StreamError::SessionClosed);
        }
        if teardown {
            shared.teardown();
        }
    }
}
