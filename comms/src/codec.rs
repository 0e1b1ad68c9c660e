//! Length prefixed framing, every frame is a fixed width ASCII decimal header holding the
//! byte length of the JSON payload that follows it.

use std::num::NonZeroUsize;

use serde::{Serialize, de::DeserializeOwned};

use crate::{RecvErr, SendErr};

/// The default width of the length header in bytes.
pub const DEFAULT_HEADER_LEN: NonZeroUsize = NonZeroUsize::new(10).unwrap();

/// Encodes and decodes frames for a given header width.
///
/// Both ends of a stream must agree on the header width, it's not negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    header_len: NonZeroUsize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_LEN)
    }
}

impl FrameCodec {
    /// Creates a new `FrameCodec`.
    ///
    /// # Arguments
    /// * `header_len` - The width of the length header in bytes.
    ///
    /// # Returns
    /// A new `FrameCodec` instance.
    pub const fn new(header_len: NonZeroUsize) -> Self {
        Self { header_len }
    }

    /// Returns the width of the length header in bytes.
    pub fn header_len(&self) -> usize {
        self.header_len.get()
    }

    /// Returns the biggest payload length that fits in the header.
    pub fn max_payload_len(&self) -> usize {
        10usize
            .checked_pow(self.header_len() as u32)
            .map_or(usize::MAX, |limit| limit - 1)
    }

    /// Serializes `msg` and prepends the length header.
    ///
    /// The header is the decimal length left aligned and padded with trailing spaces.
    ///
    /// # Arguments
    /// * `msg` - A serializable object.
    ///
    /// # Returns
    /// The whole frame or a `SendErr` if the payload couldn't be serialized or is too
    /// big for the header.
    pub fn encode<T: Serialize + ?Sized>(&self, msg: &T) -> Result<Vec<u8>, SendErr> {
        let header_len = self.header_len();

        let mut buf = vec![b' '; header_len];
        serde_json::to_writer(&mut buf, msg)?;

        let len = buf.len() - header_len;
        if len > self.max_payload_len() {
            return Err(SendErr::Oversized { len, header_len });
        }

        let digits = len.to_string();
        buf[..digits.len()].copy_from_slice(digits.as_bytes());
        Ok(buf)
    }

    /// Parses a length header.
    ///
    /// Surrounding whitespace is ignored, so both left and right padded headers are accepted.
    ///
    /// # Arguments
    /// * `header` - Exactly `header_len` bytes.
    ///
    /// # Returns
    /// The declared payload length or a `RecvErr::Framing` if it's not a decimal number.
    pub fn parse_header(&self, header: &[u8]) -> Result<usize, RecvErr> {
        if header.len() != self.header_len() {
            return Err(RecvErr::Framing(format!(
                "expected a {} byte header, got {} bytes",
                self.header_len(),
                header.len()
            )));
        }

        let text = std::str::from_utf8(header)
            .map_err(|_| RecvErr::Framing(format!("header isn't ascii: {header:?}")))?;

        let digits = text.trim_matches(|c: char| c.is_ascii_whitespace());
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RecvErr::Framing(format!("invalid length header {text:?}")));
        }

        digits
            .parse()
            .map_err(|e| RecvErr::Framing(format!("invalid length header {text:?}: {e}")))
    }

    /// Deserializes a complete payload.
    ///
    /// # Arguments
    /// * `payload` - The bytes following a header, exactly as long as it declared.
    ///
    /// # Returns
    /// The decoded value or a `RecvErr::Deserialization` if the bytes don't match `T`.
    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, RecvErr> {
        serde_json::from_slice(payload).map_err(RecvErr::Deserialization)
    }
}
