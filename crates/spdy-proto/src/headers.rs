//! Uncompressed header blocks
//!
//! A header block is an ordered list of name/value pairs. Its serialized form
//! is a 32-bit pair count followed by length-prefixed names and values; that
//! serialized form is what the compression context deflates.

use crate::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Upper bound on a single serialized name or value
const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    fields: Vec<(String, String)>,
}

impl HeaderBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header. Names are stored lower-cased.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields
            .push((name.into().to_ascii_lowercase(), value.into()));
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// First value for `name` (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let size: usize = self
            .fields
            .iter()
            .map(|(n, v)| 8 + n.len() + v.len())
            .sum();
        let mut buf = BytesMut::with_capacity(4 + size);

        buf.put_u32(self.fields.len() as u32);
        for (name, value) in &self.fields {
            for field in [name, value] {
                if field.len() > MAX_FIELD_LEN {
                    return Err(CodecError::FieldTooLong(field.len()));
                }
                buf.put_u32(field.len() as u32);
                buf.put_slice(field.as_bytes());
            }
        }

        Ok(buf.freeze())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, CodecError> {
        if buf.remaining() < 4 {
            return Err(CodecError::Truncated);
        }
        let count = buf.get_u32() as usize;

        // Each pair needs at least 8 bytes of length prefixes
        if count > buf.remaining() / 8 {
            return Err(CodecError::Truncated);
        }

        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let name = read_field(&mut buf, "name")?;
            let value = read_field(&mut buf, "value")?;
            fields.push((name, value));
        }

        if buf.has_remaining() {
            return Err(CodecError::TrailingBytes(buf.remaining()));
        }

        Ok(Self { fields })
    }
}

impl FromIterator<(String, String)> for HeaderBlock {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut block = HeaderBlock::new();
        for (name, value) in iter {
            block.insert(name, value);
        }
        block
    }
}

fn read_field(buf: &mut Bytes, what: &'static str) -> Result<String, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated);
    }
    let len = buf.get_u32() as usize;
    if len > MAX_FIELD_LEN {
        return Err(CodecError::FieldTooLong(len));
    }
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_block_encode_decode() {
        let block = HeaderBlock::new()
            .with(":method", "GET")
            .with(":path", "/index.html")
            .with("Accept", "text/html");

        let decoded = HeaderBlock::decode(block.encode().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.get("accept"), Some("text/html"));
        assert_eq!(decoded.get("ACCEPT"), Some("text/html"));
    }

    #[test]
    fn test_truncated_block() {
        let encoded = HeaderBlock::new().with("a", "b").encode().unwrap();
        let truncated = encoded.slice(..encoded.len() - 1);
        assert!(matches!(
            HeaderBlock::decode(truncated),
            Err(CodecError::Truncated)
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u8(0xff);
        assert!(matches!(
            HeaderBlock::decode(buf.freeze()),
            Err(CodecError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_absurd_count_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(u32::MAX);
        assert!(HeaderBlock::decode(buf.freeze()).is_err());
    }
}
