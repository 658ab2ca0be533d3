//! Ordered write path and compression guard
//!
//! Plain frames go straight to the transport, which keeps FIFO order per
//! connection. Frames carrying a header block take the encoder lock for the
//! whole compress-then-submit sequence: the dictionary must advance in the
//! same order as the frames reach the transport.

use crate::config::validate_compression_level;
use crate::error::{SessionError, StreamError};
use bytes::Bytes;
use spdy_proto::{CodecError, Frame, HeaderBlock, HeaderDecoder, HeaderEncoder};
use spdy_transport::{FrameSink, TransportResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

struct EncoderSlot {
    level: u32,
    /// Created on first use; the level is fixed from then on
    encoder: Option<HeaderEncoder>,
}

pub(crate) struct FrameWriter {
    sink: Arc<dyn FrameSink>,
    encoder: Mutex<EncoderSlot>,
    decoder: Mutex<HeaderDecoder>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FrameWriter {
    pub(crate) fn new(sink: Arc<dyn FrameSink>, compression_level: u32) -> Self {
        Self {
            sink,
            encoder: Mutex::new(EncoderSlot {
                level: compression_level,
                encoder: None,
            }),
            decoder: Mutex::new(HeaderDecoder::new()),
        }
    }

    /// Submit a frame without a header block
    pub(crate) fn write(&self, frame: Frame) -> TransportResult<()> {
        debug_assert!(!frame.carries_headers());
        self.sink.submit_frame(frame)
    }

    /// Compress `headers`, build the frame around the block and submit it,
    /// all under the encoder lock.
    pub(crate) fn write_headers<F>(&self, headers: &HeaderBlock, build: F) -> Result<(), StreamError>
    where
        F: FnOnce(Bytes) -> Frame,
    {
        let mut slot = lock(&self.encoder);
        let level = slot.level;
        let encoder = slot
            .encoder
            .get_or_insert_with(|| HeaderEncoder::new(level));

        let block = encoder.encode(headers)?;
        let frame = build(block);
        trace!(
            "Writing {} frame for stream {:?}",
            frame.frame_type(),
            frame.stream_id()
        );
        self.sink.submit_frame(frame)?;
        Ok(())
    }

    /// Inflate an inbound header block. Blocks must be decoded in arrival order.
    pub(crate) fn decode_headers(&self, block: &[u8]) -> Result<HeaderBlock, CodecError> {
        lock(&self.decoder).decode(block)
    }

    pub(crate) fn compression_level(&self) -> u32 {
        lock(&self.encoder).level
    }

    pub(crate) fn set_compression_level(&self, level: u32) -> Result<(), SessionError> {
        let mut slot = lock(&self.encoder);
        if slot.encoder.is_some() {
            return Err(SessionError::CompressorInitialized);
        }
        validate_compression_level(level)?;
        slot.level = level;
        Ok(())
    }

    pub(crate) fn close_transport(&self) {
        self.sink.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spdy_proto::{SynReplyFrame, SynStreamFrame};
    use spdy_transport::channel_transport;

    fn syn_stream(stream_id: u32) -> impl FnOnce(Bytes) -> Frame {
        move |header_block| {
            Frame::SynStream(SynStreamFrame {
                stream_id,
                associated_to_stream_id: 0,
                priority: 0,
                slot: 0,
                fin: false,
                unidirectional: false,
                header_block,
            })
        }
    }

    #[test]
    fn test_header_frames_decode_in_submission_order() {
        let (transport, mut receiver) = channel_transport("writer-test");
        let writer = FrameWriter::new(Arc::new(transport), 6);
        let peer = FrameWriter::new(Arc::new(channel_transport("peer").0), 6);

        for (id, path) in [(1, "/one"), (3, "/two"), (5, "/three")] {
            writer
                .write_headers(&HeaderBlock::new().with(":path", path), syn_stream(id))
                .unwrap();
        }

        let paths: Vec<String> = receiver
            .drain_frames()
            .into_iter()
            .map(|frame| match frame {
                Frame::SynStream(syn) => peer
                    .decode_headers(&syn.header_block)
                    .unwrap()
                    .get(":path")
                    .unwrap()
                    .to_string(),
                other => panic!("unexpected frame {:?}", other),
            })
            .collect();
        assert_eq!(paths, vec!["/one", "/two", "/three"]);
    }

    #[test]
    fn test_concurrent_header_writers_stay_decodable() {
        let (transport, mut receiver) = channel_transport("writer-race");
        let writer = Arc::new(FrameWriter::new(Arc::new(transport), 6));

        std::thread::scope(|scope| {
            for thread in 0..4u32 {
                let writer = writer.clone();
                scope.spawn(move || {
                    for seq in 0..25u32 {
                        let headers = HeaderBlock::new()
                            .with("x-thread", thread.to_string())
                            .with("x-seq", seq.to_string());
                        writer
                            .write_headers(&headers, |header_block| {
                                Frame::SynReply(SynReplyFrame {
                                    stream_id: thread * 2 + 1,
                                    fin: false,
                                    header_block,
                                })
                            })
                            .unwrap();
                    }
                });
            }
        });

        let peer = FrameWriter::new(Arc::new(channel_transport("peer").0), 6);
        let frames = receiver.drain_frames();
        assert_eq!(frames.len(), 100);
        for frame in frames {
            let Frame::SynReply(reply) = frame else {
                panic!("unexpected frame");
            };
            let headers = peer.decode_headers(&reply.header_block).unwrap();
            let thread: u32 = headers.get("x-thread").unwrap().parse().unwrap();
            assert_eq!(reply.stream_id, thread * 2 + 1);
        }
    }

    #[test]
    fn test_compression_level_fixed_after_first_use() {
        let (transport, _receiver) = channel_transport("writer-level");
        let writer = FrameWriter::new(Arc::new(transport), 6);

        writer.set_compression_level(9).unwrap();
        assert_eq!(writer.compression_level(), 9);
        assert!(matches!(
            writer.set_compression_level(12),
            Err(SessionError::Config(_))
        ));

        writer
            .write_headers(&HeaderBlock::new().with(":status", "200"), syn_stream(1))
            .unwrap();

        assert!(matches!(
            writer.set_compression_level(1),
            Err(SessionError::CompressorInitialized)
        ));
        assert_eq!(writer.compression_level(), 9);
    }
}
