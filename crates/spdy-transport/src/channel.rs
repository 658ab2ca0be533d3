//! In-memory FIFO transport backed by a tokio channel
//!
//! Frames submitted to a [`ChannelTransport`] come out of the paired
//! [`FrameReceiver`] in submission order. A connection writer task drains the
//! receiver onto the wire; tests inspect it directly.

use crate::{FrameSink, TransportError, TransportResult};
use spdy_proto::Frame;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// What the writer side observes
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(Frame),
    Closed,
}

/// Create a connected transport/receiver pair
pub fn channel_transport(connection_id: impl Into<String>) -> (ChannelTransport, FrameReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            connection_id: connection_id.into(),
            tx,
            closed: Mutex::new(false),
            close_calls: AtomicUsize::new(0),
            frames_sent: AtomicU64::new(0),
        },
        FrameReceiver { rx },
    )
}

pub struct ChannelTransport {
    connection_id: String,
    tx: mpsc::UnboundedSender<TransportEvent>,
    /// Held across every send so the close marker is always the last event
    closed: Mutex<bool>,
    close_calls: AtomicUsize,
    frames_sent: AtomicU64,
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("connection_id", &self.connection_id)
            .field("closed", &*self.lock_closed())
            .finish()
    }
}

impl ChannelTransport {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Number of times `close` was requested, including repeats
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    fn lock_closed(&self) -> MutexGuard<'_, bool> {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameSink for ChannelTransport {
    fn submit_frame(&self, frame: Frame) -> TransportResult<()> {
        let closed = self.lock_closed();
        if *closed {
            return Err(TransportError::ConnectionClosed);
        }

        trace!(
            "[{}] Submitting {} frame (stream {:?})",
            self.connection_id,
            frame.frame_type(),
            frame.stream_id()
        );

        self.tx
            .send(TransportEvent::Frame(frame))
            .map_err(|_| TransportError::ConnectionClosed)?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let mut closed = self.lock_closed();
        if *closed {
            return;
        }
        *closed = true;
        debug!("[{}] Closing connection", self.connection_id);
        let _ = self.tx.send(TransportEvent::Closed);
    }

    fn is_closed(&self) -> bool {
        *self.lock_closed()
    }
}

/// Receiving end of a [`ChannelTransport`]
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl FrameReceiver {
    /// Wait for the next event; `None` once the transport is dropped
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }

    /// All frames queued so far, in delivery order
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(event) = self.try_recv() {
            if let TransportEvent::Frame(frame) = event {
                frames.push(frame);
            }
        }
        frames
    }
}
