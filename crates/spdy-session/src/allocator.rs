//! Stream-ID allocation for locally initiated streams

use crate::error::StreamError;
use spdy_proto::{Role, StreamId, MAX_STREAM_ID};

/// Issues local stream IDs.
///
/// Lives behind the session's new-stream lock: an ID is read with
/// [`next_local_id`](Self::next_local_id) and only committed once the stream
/// is registered, all while the lock is held, so ID order matches the order
/// in which SYN_STREAM frames reach the transport.
#[derive(Debug)]
pub struct StreamIdAllocator {
    role: Role,
    /// Zero until the first local stream is opened
    last_local_stream_id: StreamId,
}

impl StreamIdAllocator {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            last_local_stream_id: 0,
        }
    }

    /// The ID the next locally opened stream will get
    pub fn next_local_id(&self) -> Result<StreamId, StreamError> {
        if self.last_local_stream_id == 0 {
            return Ok(self.role.first_local_stream_id());
        }
        let next = self.last_local_stream_id + 2;
        if next > MAX_STREAM_ID {
            return Err(StreamError::IdsExhausted);
        }
        Ok(next)
    }

    /// Record `stream_id` as issued
    pub fn commit(&mut self, stream_id: StreamId) {
        debug_assert!(self.role.initiated(stream_id));
        debug_assert!(stream_id > self.last_local_stream_id);
        self.last_local_stream_id = stream_id;
    }

    pub fn last_local_stream_id(&self) -> StreamId {
        self.last_local_stream_id
    }
}
