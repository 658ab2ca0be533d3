//! Multiplexed stream handle
//!
//! A [`Stream`] is a cheap clonable handle shared between the session
//! registry and the upper layer. Its state, flow-control windows and queued
//! writes sit behind a per-stream lock; the session-wide locks are never
//! needed for sending or receiving data.

use crate::error::StreamError;
use crate::flow_control::Window;
use crate::session::SessionShared;
use bytes::Bytes;
use spdy_proto::{
    Frame, HeaderBlock, HeadersFrame, RstStatus, StreamId, SynReplyFrame, LOWEST_PRIORITY,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Largest DATA payload carried by a single frame (24-bit length)
const MAX_DATA_FRAME_SIZE: usize = 0x00ff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    fn close_local(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        }
    }

    fn close_remote(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        }
    }

    pub fn can_send(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    pub fn can_recv(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }
}

/// Payload delivered upstream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Headers(HeaderBlock),
    Data(Bytes),
}

#[derive(Debug)]
enum Inbound {
    Headers(HeaderBlock),
    Data(Bytes),
    End,
    Failed(StreamError),
}

/// Everything needed to create a stream, built up front by the caller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamRequest {
    pub headers: HeaderBlock,
    /// Stream this one is associated with (server push)
    pub parent_id: Option<StreamId>,
    pub priority: u8,
    pub slot: u8,
    pub unidirectional: bool,
    /// No payload follows the headers
    pub fin: bool,
}

impl StreamRequest {
    pub fn new(headers: HeaderBlock) -> Self {
        Self {
            headers,
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_id: StreamId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_slot(mut self, slot: u8) -> Self {
        self.slot = slot;
        self
    }

    pub fn unidirectional(mut self) -> Self {
        self.unidirectional = true;
        self
    }

    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }
}

/// Completion of a `send_data` call. Resolves once every byte has been
/// handed to the transport, or with the error that stopped it.
#[derive(Debug)]
pub struct WriteHandle {
    rx: oneshot::Receiver<Result<(), StreamError>>,
}

impl WriteHandle {
    pub async fn completed(self) -> Result<(), StreamError> {
        self.rx.await.unwrap_or(Err(StreamError::SessionClosed))
    }

    /// The outcome if the write has finished. Yields the outcome only once.
    pub fn try_result(&mut self) -> Option<Result<(), StreamError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(StreamError::SessionClosed)),
        }
    }
}

struct PendingWrite {
    data: Bytes,
    fin: bool,
    done: oneshot::Sender<Result<(), StreamError>>,
}

pub(crate) struct StreamCore {
    state: StreamState,
    /// Credit granted by the peer
    send_window: Window,
    /// Credit granted to the peer
    recv_window: Window,
    pending: VecDeque<PendingWrite>,
    fin_queued: bool,
    /// SYN_STREAM or SYN_REPLY has gone out
    headers_sent: bool,
}

struct Reader {
    rx: mpsc::UnboundedReceiver<Inbound>,
    finished: Option<Result<(), StreamError>>,
}

struct StreamInner {
    id: StreamId,
    parent_id: Option<StreamId>,
    priority: u8,
    slot: u8,
    unidirectional: bool,
    locally_initiated: bool,
    session: Weak<SessionShared>,
    core: Mutex<StreamCore>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    reader: tokio::sync::Mutex<Reader>,
}

#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("parent_id", &self.inner.parent_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Stream {
    /// Build a candidate stream. Nothing is registered or sent.
    pub(crate) fn new(
        session: &Arc<SessionShared>,
        id: StreamId,
        request: &StreamRequest,
        locally_initiated: bool,
        send_window: u32,
        recv_window: u32,
    ) -> Result<Self, StreamError> {
        if request.priority > LOWEST_PRIORITY {
            return Err(StreamError::InvalidPriority(request.priority));
        }

        let mut state = StreamState::Open;
        if locally_initiated {
            if request.unidirectional {
                state = state.close_remote();
            }
            if request.fin {
                state = state.close_local();
            }
        } else {
            if request.unidirectional {
                state = state.close_local();
            }
            if request.fin {
                state = state.close_remote();
            }
        }

        let (inbound_tx, rx) = mpsc::unbounded_channel();
        if !locally_initiated {
            let _ = inbound_tx.send(Inbound::Headers(request.headers.clone()));
            if request.fin {
                let _ = inbound_tx.send(Inbound::End);
            }
        } else if request.unidirectional {
            // Nothing will ever arrive
            let _ = inbound_tx.send(Inbound::End);
        }

        Ok(Self {
            inner: Arc::new(StreamInner {
                id,
                parent_id: request.parent_id,
                priority: request.priority,
                slot: request.slot,
                unidirectional: request.unidirectional,
                locally_initiated,
                session: Arc::downgrade(session),
                core: Mutex::new(StreamCore {
                    state,
                    send_window: Window::new(send_window),
                    recv_window: Window::new(recv_window),
                    pending: VecDeque::new(),
                    fin_queued: locally_initiated && request.fin,
                    headers_sent: locally_initiated,
                }),
                inbound_tx,
                reader: tokio::sync::Mutex::new(Reader { rx, finished: None }),
            }),
        })
    }

    pub fn id(&self) -> StreamId {
        self.inner.id
    }

    pub fn parent_id(&self) -> Option<StreamId> {
        self.inner.parent_id
    }

    pub fn priority(&self) -> u8 {
        self.inner.priority
    }

    pub fn slot(&self) -> u8 {
        self.inner.slot
    }

    pub fn is_unidirectional(&self) -> bool {
        self.inner.unidirectional
    }

    pub fn is_locally_initiated(&self) -> bool {
        self.inner.locally_initiated
    }

    pub fn state(&self) -> StreamState {
        self.lock_core().state
    }

    /// Bytes the peer currently lets us send
    pub fn send_window(&self) -> u32 {
        self.lock_core().send_window.available()
    }

    /// Bytes we currently let the peer send
    pub fn recv_window(&self) -> u32 {
        self.lock_core().recv_window.available()
    }

    /// Writes waiting for send credit
    pub fn pending_writes(&self) -> usize {
        self.lock_core().pending.len()
    }

    pub(crate) fn lock_core(&self) -> MutexGuard<'_, StreamCore> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> Result<Arc<SessionShared>, StreamError> {
        self.inner.session.upgrade().ok_or(StreamError::SessionClosed)
    }

    /// Answer a peer-initiated stream with SYN_REPLY
    pub fn reply(&self, headers: HeaderBlock, fin: bool) -> Result<(), StreamError> {
        if self.inner.locally_initiated {
            return Err(StreamError::InvalidOperation(
                "SYN_REPLY is only sent on peer-initiated streams",
            ));
        }
        self.write_headers(headers, fin, true)
    }

    /// Send a HEADERS frame on an established stream
    pub fn send_headers(&self, headers: HeaderBlock, fin: bool) -> Result<(), StreamError> {
        self.write_headers(headers, fin, false)
    }

    fn write_headers(&self, headers: HeaderBlock, fin: bool, reply: bool) -> Result<(), StreamError> {
        let session = self.session()?;
        let stream_id = self.inner.id;

        let became_closed = {
            let mut core = self.lock_core();
            if !core.state.can_send() || core.fin_queued {
                return Err(StreamError::StreamClosed(stream_id));
            }
            if reply && core.headers_sent {
                return Err(StreamError::InvalidOperation("SYN_REPLY already sent"));
            }
            if !reply && !core.headers_sent {
                return Err(StreamError::InvalidOperation("SYN_REPLY must precede HEADERS"));
            }
            if !core.pending.is_empty() {
                return Err(StreamError::InvalidOperation(
                    "headers cannot overtake queued data",
                ));
            }

            session.writer.write_headers(&headers, |header_block| {
                if reply {
                    Frame::SynReply(SynReplyFrame {
                        stream_id,
                        fin,
                        header_block,
                    })
                } else {
                    Frame::Headers(HeadersFrame {
                        stream_id,
                        fin,
                        header_block,
                    })
                }
            })?;

            core.headers_sent = true;
            if fin {
                core.fin_queued = true;
                Self::transition(&mut core, StreamState::close_local)
            } else {
                false
            }
        };

        if became_closed {
            session.deregister(stream_id);
        }
        Ok(())
    }

    /// Queue `data` for sending.
    ///
    /// Whatever fits in the peer's window goes out now; the remainder waits
    /// for WINDOW_UPDATE. Queued writes are sent strictly in call order.
    pub fn send_data(&self, data: Bytes, fin: bool) -> Result<WriteHandle, StreamError> {
        let session = self.session()?;
        let stream_id = self.inner.id;
        let (done, rx) = oneshot::channel();

        let became_closed = {
            let mut core = self.lock_core();
            if !core.state.can_send() || core.fin_queued {
                return Err(StreamError::StreamClosed(stream_id));
            }
            if !core.headers_sent {
                return Err(StreamError::InvalidOperation("SYN_REPLY must precede data"));
            }

            core.fin_queued = fin;
            core.pending.push_back(PendingWrite { data, fin, done });
            self.flush_pending(&mut core, &session)
        };

        if became_closed {
            session.deregister(stream_id);
        }
        Ok(WriteHandle { rx })
    }

    /// Half-close the local side
    pub fn finish(&self) -> Result<WriteHandle, StreamError> {
        self.send_data(Bytes::new(), true)
    }

    /// Abort the stream with RST_STREAM
    pub fn reset(&self, status: RstStatus) -> Result<(), StreamError> {
        let session = self.session()?;
        let stream_id = self.inner.id;

        let result = {
            let mut core = self.lock_core();
            if core.state == StreamState::Closed {
                return Err(StreamError::StreamClosed(stream_id));
            }
            let result = session.writer.write(Frame::rst_stream(stream_id, status));
            self.terminate(&mut core, StreamError::Reset { stream_id, status });
            result
        };

        debug!(stream_id, ?status, "Stream reset locally");
        session.deregister(stream_id);
        result.map_err(StreamError::from)
    }

    /// Next inbound item. `Ok(None)` once the peer has finished the stream.
    pub async fn recv(&self) -> Result<Option<StreamEvent>, StreamError> {
        let mut reader = self.inner.reader.lock().await;
        if let Some(finished) = &reader.finished {
            return finished.clone().map(|()| None);
        }

        match reader.rx.recv().await {
            Some(Inbound::Headers(headers)) => Ok(Some(StreamEvent::Headers(headers))),
            Some(Inbound::Data(data)) => Ok(Some(StreamEvent::Data(data))),
            Some(Inbound::End) | None => {
                reader.finished = Some(Ok(()));
                Ok(None)
            }
            Some(Inbound::Failed(err)) => {
                reader.finished = Some(Err(err.clone()));
                Err(err)
            }
        }
    }

    /// Hand `n` consumed bytes of receive credit back to the peer.
    ///
    /// Received data is charged against the receive window and nothing is
    /// returned automatically: once it reaches zero the peer must stop
    /// sending until the consumer calls this.
    pub fn release_capacity(&self, n: u32) -> Result<(), StreamError> {
        if n == 0 {
            return Ok(());
        }
        let session = self.session()?;
        let stream_id = self.inner.id;

        let mut core = self.lock_core();
        if core.state == StreamState::Closed {
            return Err(StreamError::StreamClosed(stream_id));
        }
        if !core.state.can_recv() {
            return Ok(());
        }
        core.recv_window
            .replenish(n)
            .map_err(|_| StreamError::FlowControl(stream_id))?;
        session.writer.write(Frame::window_update(stream_id, n))?;
        trace!(stream_id, n, "Released receive capacity");
        Ok(())
    }

    pub(crate) fn on_headers(&self, headers: HeaderBlock, fin: bool) -> Result<(), StreamError> {
        let stream_id = self.inner.id;
        let became_closed = {
            let mut core = self.lock_core();
            if !core.state.can_recv() {
                return Err(StreamError::StreamClosed(stream_id));
            }
            let _ = self.inner.inbound_tx.send(Inbound::Headers(headers));
            if fin {
                let _ = self.inner.inbound_tx.send(Inbound::End);
                Self::transition(&mut core, StreamState::close_remote)
            } else {
                false
            }
        };

        if became_closed {
            self.deregister();
        }
        Ok(())
    }

    pub(crate) fn on_data(&self, payload: Bytes, fin: bool) -> Result<(), StreamError> {
        let stream_id = self.inner.id;
        let became_closed = {
            let mut core = self.lock_core();
            if !core.state.can_recv() {
                return Err(StreamError::StreamClosed(stream_id));
            }
            if payload.len() > u32::MAX as usize {
                return Err(StreamError::FlowControl(stream_id));
            }
            core.recv_window
                .consume(payload.len() as u32)
                .map_err(|_| StreamError::FlowControl(stream_id))?;

            trace!(stream_id, len = payload.len(), fin, "Delivering data upstream");
            if !payload.is_empty() {
                let _ = self.inner.inbound_tx.send(Inbound::Data(payload));
            }
            if fin {
                let _ = self.inner.inbound_tx.send(Inbound::End);
                Self::transition(&mut core, StreamState::close_remote)
            } else {
                false
            }
        };

        if became_closed {
            self.deregister();
        }
        Ok(())
    }

    pub(crate) fn on_window_update(&self, delta: u32) -> Result<(), StreamError> {
        let session = self.session()?;
        let stream_id = self.inner.id;

        let became_closed = {
            let mut core = self.lock_core();
            if core.state == StreamState::Closed {
                return Ok(());
            }
            core.send_window
                .replenish(delta)
                .map_err(|_| StreamError::FlowControl(stream_id))?;
            trace!(
                stream_id,
                delta,
                window = core.send_window.available(),
                "Send window updated"
            );
            self.flush_pending(&mut core, &session)
        };

        if became_closed {
            session.deregister(stream_id);
        }
        Ok(())
    }

    pub(crate) fn on_reset(&self, status: RstStatus) {
        debug!(stream_id = self.inner.id, ?status, "Stream reset by peer");
        self.abort(StreamError::Reset {
            stream_id: self.inner.id,
            status,
        });
    }

    /// Terminate without sending anything; used when the session goes away
    pub(crate) fn abort(&self, err: StreamError) {
        {
            let mut core = self.lock_core();
            if core.state == StreamState::Closed {
                return;
            }
            self.terminate(&mut core, err);
        }
        self.deregister();
    }

    fn terminate(&self, core: &mut StreamCore, err: StreamError) {
        core.state = StreamState::Closed;
        for write in core.pending.drain(..) {
            let _ = write.done.send(Err(err.clone()));
        }
        let _ = self.inner.inbound_tx.send(Inbound::Failed(err));
    }

    fn deregister(&self) {
        if let Some(session) = self.inner.session.upgrade() {
            session.deregister(self.inner.id);
        }
    }

    /// Apply a state change; true if it closed the stream
    fn transition(core: &mut StreamCore, step: fn(StreamState) -> StreamState) -> bool {
        let was_closed = core.state == StreamState::Closed;
        let next = step(core.state);
        core.state = next;
        !was_closed && next == StreamState::Closed
    }

    /// Send queued data as far as the send window allows.
    /// Returns true if the stream closed, either because a FIN went out or
    /// because the transport refused a frame.
    fn flush_pending(&self, core: &mut StreamCore, session: &SessionShared) -> bool {
        let stream_id = self.inner.id;

        while let Some(front) = core.pending.front_mut() {
            if front.data.is_empty() && !front.fin {
                if let Some(write) = core.pending.pop_front() {
                    let _ = write.done.send(Ok(()));
                }
                continue;
            }

            let credit = core.send_window.available() as usize;
            let chunk_len = front.data.len().min(credit).min(MAX_DATA_FRAME_SIZE);
            if chunk_len == 0 && !front.data.is_empty() {
                trace!(
                    stream_id,
                    queued = front.data.len(),
                    "Send window exhausted, deferring write"
                );
                break;
            }

            let chunk = front.data.split_to(chunk_len);
            let last = front.data.is_empty();
            let fin = last && front.fin;

            if let Err(e) = session.writer.write(Frame::data(stream_id, chunk, fin)) {
                debug!(stream_id, "DATA write failed: {}", e);
                self.terminate(core, StreamError::from(e));
                return true;
            }
            // chunk_len never exceeds the available credit
            let _ = core.send_window.consume(chunk_len as u32);

            if last {
                if let Some(write) = core.pending.pop_front() {
                    let _ = write.done.send(Ok(()));
                }
                if fin {
                    return Self::transition(core, StreamState::close_local);
                }
            }
        }

        false
    }
}
