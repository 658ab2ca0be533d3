//! Stream registry, admission control and close state
//!
//! Lookups go straight to the concurrent map. Every mutation of the map, the
//! close state and the parent/child index happens while holding `state`, so
//! "admit if there is room", "remove and check for drain" and "start closing"
//! are each atomic with respect to one another.

use crate::error::StreamError;
use crate::stream::Stream;
use dashmap::DashMap;
use spdy_proto::StreamId;
use spdy_transport::CloseType;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Session close state. Leaves `Open` at most once and never returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseState {
    Open,
    ClosingLocal,
    ClosingPeer,
}

impl CloseState {
    pub fn is_closing(self) -> bool {
        self != CloseState::Open
    }
}

/// Result of admitting a peer-initiated stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PeerAdmission {
    Admitted,
    /// Session is closing; the stream is ignored
    SessionClosing,
    /// Concurrency cap exceeded. The session has already moved to
    /// `ClosingLocal` and the caller owes the peer a GOAWAY.
    Overflow { last_good_stream_id: StreamId },
    Rejected(StreamError),
}

#[derive(Debug)]
struct RegistryState {
    close: CloseState,
    last_peer_stream_id: StreamId,
    /// parent stream -> associated child streams
    children: HashMap<StreamId, HashSet<StreamId>>,
    /// A GOAWAY has been decided on but not yet handed to the transport
    goaway_in_flight: bool,
    torn_down: bool,
}

impl RegistryState {
    /// Decide teardown; returns true exactly once per session
    fn take_teardown(&mut self, empty: bool) -> bool {
        if self.close.is_closing() && empty && !self.goaway_in_flight && !self.torn_down {
            self.torn_down = true;
            return true;
        }
        false
    }
}

pub(crate) struct StreamRegistry {
    streams: DashMap<StreamId, Stream>,
    state: Mutex<RegistryState>,
}

impl StreamRegistry {
    pub(crate) fn new() -> Self {
        Self {
            streams: DashMap::new(),
            state: Mutex::new(RegistryState {
                close: CloseState::Open,
                last_peer_stream_id: 0,
                children: HashMap::new(),
                goaway_in_flight: false,
                torn_down: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self, stream_id: StreamId) -> Option<Stream> {
        self.streams.get(&stream_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }

    pub(crate) fn close_state(&self) -> CloseState {
        self.lock().close
    }

    pub(crate) fn last_peer_stream_id(&self) -> StreamId {
        self.lock().last_peer_stream_id
    }

    pub(crate) fn children_of(&self, parent_id: StreamId) -> Vec<StreamId> {
        let state = self.lock();
        let mut children: Vec<StreamId> = state
            .children
            .get(&parent_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        children.sort_unstable();
        children
    }

    pub(crate) fn admit_peer(&self, stream: &Stream, max_concurrent: u32) -> PeerAdmission {
        let stream_id = stream.id();
        let mut state = self.lock();

        if state.close.is_closing() {
            return PeerAdmission::SessionClosing;
        }

        if self.streams.len() >= max_concurrent as usize {
            state.close = CloseState::ClosingLocal;
            state.goaway_in_flight = true;
            return PeerAdmission::Overflow {
                last_good_stream_id: state.last_peer_stream_id,
            };
        }

        if self.streams.contains_key(&stream_id) {
            return PeerAdmission::Rejected(StreamError::StreamInUse(stream_id));
        }

        if let Some(parent_id) = stream.parent_id() {
            if !self.streams.contains_key(&parent_id) {
                return PeerAdmission::Rejected(StreamError::ParentMissing {
                    stream_id,
                    parent_id,
                });
            }
            state.children.entry(parent_id).or_default().insert(stream_id);
        }

        self.streams.insert(stream_id, stream.clone());
        state.last_peer_stream_id = state.last_peer_stream_id.max(stream_id);
        PeerAdmission::Admitted
    }

    pub(crate) fn admit_local(
        &self,
        stream: &Stream,
        max_concurrent: u32,
    ) -> Result<(), StreamError> {
        let stream_id = stream.id();
        let mut state = self.lock();

        if state.close.is_closing() {
            return Err(StreamError::SessionClosing);
        }

        if self.streams.len() >= max_concurrent as usize {
            return Err(StreamError::Refused { stream_id });
        }

        if let Some(parent_id) = stream.parent_id() {
            if !self.streams.contains_key(&parent_id) {
                return Err(StreamError::ParentMissing {
                    stream_id,
                    parent_id,
                });
            }
            state.children.entry(parent_id).or_default().insert(stream_id);
        }

        self.streams.insert(stream_id, stream.clone());
        Ok(())
    }

    /// Remove a stream. Returns true when this removal drained a closing
    /// session and the caller must tear the connection down.
    pub(crate) fn remove(&self, stream_id: StreamId) -> bool {
        let mut state = self.lock();

        let Some((_, stream)) = self.streams.remove(&stream_id) else {
            return false;
        };

        if let Some(parent_id) = stream.parent_id() {
            if let Some(siblings) = state.children.get_mut(&parent_id) {
                siblings.remove(&stream_id);
                if siblings.is_empty() {
                    state.children.remove(&parent_id);
                }
            }
        }
        state.children.remove(&stream_id);

        state.take_teardown(self.streams.is_empty())
    }

    /// Enter `ClosingLocal`. Returns the last good peer stream ID for the
    /// GOAWAY frame, or `None` if the session was already closing.
    pub(crate) fn begin_local_close(&self) -> Option<StreamId> {
        let mut state = self.lock();
        if state.close.is_closing() {
            return None;
        }
        state.close = CloseState::ClosingLocal;
        state.goaway_in_flight = true;
        Some(state.last_peer_stream_id)
    }

    /// Called once the GOAWAY frame has been handed to the transport
    pub(crate) fn finish_local_close(&self) -> bool {
        let mut state = self.lock();
        state.goaway_in_flight = false;
        state.take_teardown(self.streams.is_empty())
    }

    /// Enter `ClosingPeer`. Returns the local streams the peer never
    /// processed (IDs above `last_good_stream_id`) and whether the session is
    /// already drained, or `None` if it was already closing. Streams at or
    /// below the marker stay registered and finish normally.
    pub(crate) fn begin_peer_close(
        &self,
        last_good_stream_id: StreamId,
    ) -> Option<(Vec<Stream>, bool)> {
        let mut state = self.lock();
        if state.close.is_closing() {
            return None;
        }
        state.close = CloseState::ClosingPeer;
        let unprocessed = self
            .streams
            .iter()
            .filter(|entry| {
                entry.value().is_locally_initiated() && *entry.key() > last_good_stream_id
            })
            .map(|entry| entry.value().clone())
            .collect();
        let teardown = state.take_teardown(self.streams.is_empty());
        Some((unprocessed, teardown))
    }

    /// The physical connection is gone. No teardown is owed afterwards.
    pub(crate) fn connection_lost(&self, close_type: CloseType) -> Vec<Stream> {
        let mut state = self.lock();
        state.torn_down = true;
        if !state.close.is_closing() {
            state.close = match close_type {
                CloseType::Local => CloseState::ClosingLocal,
                CloseType::Remote => CloseState::ClosingPeer,
            };
        }
        self.snapshot()
    }

    fn snapshot(&self) -> Vec<Stream> {
        self.streams
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
