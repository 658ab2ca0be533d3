//! Stateful header compression
//!
//! Each direction of a session owns one zlib stream. Every header block is
//! deflated with a sync flush, so the compressor dictionary carries over from
//! one frame to the next. The peer's decoder must therefore see the blocks in
//! exactly the order they were encoded.

use crate::{CodecError, HeaderBlock};
use bytes::Bytes;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tracing::trace;

/// Spare output capacity kept before each zlib call
const MIN_SPARE: usize = 64;

/// Compressor for outbound header blocks
pub struct HeaderEncoder {
    compress: Compress,
    level: u32,
}

impl std::fmt::Debug for HeaderEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderEncoder")
            .field("level", &self.level)
            .field("total_in", &self.compress.total_in())
            .field("total_out", &self.compress.total_out())
            .finish()
    }
}

impl HeaderEncoder {
    /// `level` is a zlib level in 0..=9
    pub fn new(level: u32) -> Self {
        Self {
            compress: Compress::new(Compression::new(level.min(9)), true),
            level: level.min(9),
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Serialize and deflate `headers`, advancing the shared dictionary
    pub fn encode(&mut self, headers: &HeaderBlock) -> Result<Bytes, CodecError> {
        let raw = headers.encode()?;
        let start_in = self.compress.total_in();
        let mut out = Vec::with_capacity(raw.len() / 2 + MIN_SPARE);

        loop {
            if out.capacity() - out.len() < MIN_SPARE {
                out.reserve(raw.len().max(256));
            }
            let consumed = (self.compress.total_in() - start_in) as usize;
            self.compress
                .compress_vec(&raw[consumed..], &mut out, FlushCompress::Sync)?;

            let consumed = (self.compress.total_in() - start_in) as usize;
            // A sync flush is complete once all input is taken and zlib
            // stopped short of filling the output buffer.
            if consumed == raw.len() && out.len() < out.capacity() {
                break;
            }
        }

        trace!(raw = raw.len(), compressed = out.len(), "Encoded header block");
        Ok(Bytes::from(out))
    }
}

/// Decompressor for inbound header blocks
pub struct HeaderDecoder {
    decompress: Decompress,
}

impl std::fmt::Debug for HeaderDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderDecoder")
            .field("total_in", &self.decompress.total_in())
            .field("total_out", &self.decompress.total_out())
            .finish()
    }
}

impl HeaderDecoder {
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
        }
    }

    /// Inflate and parse one compressed header block
    pub fn decode(&mut self, block: &[u8]) -> Result<HeaderBlock, CodecError> {
        let start_in = self.decompress.total_in();
        let mut out = Vec::with_capacity(block.len() * 4 + MIN_SPARE);

        loop {
            if out.capacity() - out.len() < MIN_SPARE {
                out.reserve(block.len().max(256) * 2);
            }
            let consumed = (self.decompress.total_in() - start_in) as usize;
            let produced_before = out.len();
            let status = self.decompress.decompress_vec(
                &block[consumed..],
                &mut out,
                FlushDecompress::Sync,
            )?;

            let consumed = (self.decompress.total_in() - start_in) as usize;
            if consumed == block.len() && out.len() < out.capacity() {
                break;
            }
            match status {
                Status::StreamEnd => break,
                Status::BufError if consumed == block.len() && out.len() == produced_before => {
                    break
                }
                _ => {}
            }
        }

        trace!(compressed = block.len(), raw = out.len(), "Decoded header block");
        HeaderBlock::decode(Bytes::from(out))
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new()
    }
}
