use std::mem;

use crate::{FrameCodec, RecvErr};

/// Accumulates bytes read from a stream until whole frames are available.
///
/// Reads may split a frame at any byte, so partial headers and payloads stay here
/// between reads.
#[derive(Debug, Default)]
pub struct FrameBuf {
    buf: Vec<u8>,
    expected: Option<usize>,
}

impl FrameBuf {
    /// Creates a new empty `FrameBuf`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the amount of buffered bytes not yet handed out as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether a frame has been started but not completed.
    pub fn has_partial_frame(&self) -> bool {
        self.expected.is_some() || !self.buf.is_empty()
    }

    /// Takes the next complete payload out of the buffer.
    ///
    /// # Arguments
    /// * `codec` - The codec that knows the header layout.
    ///
    /// # Returns
    /// `None` if more bytes are needed, the payload bytes if a frame is complete or a
    /// `RecvErr::Framing` if the header is corrupt.
    pub fn next_frame(&mut self, codec: &FrameCodec) -> Result<Option<Vec<u8>>, RecvErr> {
        let len = match self.expected {
            Some(len) => len,
            None => {
                let header_len = codec.header_len();
                if self.buf.len() < header_len {
                    return Ok(None);
                }

                let len = codec.parse_header(&self.buf[..header_len])?;
                self.buf.drain(..header_len);
                self.expected = Some(len);
                len
            }
        };

        if self.buf.len() < len {
            return Ok(None);
        }

        self.expected = None;
        let rest = self.buf.split_off(len);
        Ok(Some(mem::replace(&mut self.buf, rest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_at_every_byte() {
        let codec = FrameCodec::default();
        let frame = codec.encode(&vec![1.5f32, 2.5]).unwrap();

        let mut buf = FrameBuf::new();
        for (i, byte) in frame.iter().enumerate() {
            assert!(buf.next_frame(&codec).unwrap().is_none(), "early frame at {i}");
            buf.extend(&[*byte]);
        }

        let payload = buf.next_frame(&codec).unwrap().unwrap();
        let nums: Vec<f32> = codec.decode(&payload).unwrap();
        assert_eq!(nums, [1.5, 2.5]);
        assert!(!buf.has_partial_frame());
    }

    #[test]
    fn several_frames_in_one_read() {
        let codec = FrameCodec::default();
        let mut bytes = codec.encode(&1).unwrap();
        bytes.extend(codec.encode(&22).unwrap());
        bytes.extend(&codec.encode(&333).unwrap()[..12]);

        let mut buf = FrameBuf::new();
        buf.extend(&bytes);

        assert_eq!(buf.next_frame(&codec).unwrap().unwrap(), b"1");
        assert_eq!(buf.next_frame(&codec).unwrap().unwrap(), b"22");
        assert!(buf.next_frame(&codec).unwrap().is_none());
        assert!(buf.has_partial_frame());
        assert_eq!(buf.buffered(), 2);

        buf.extend(b"3");
        assert_eq!(buf.next_frame(&codec).unwrap().unwrap(), b"333");
    }

    #[test]
    fn empty_payload_is_a_frame() {
        let codec = FrameCodec::default();
        let mut buf = FrameBuf::new();
        buf.extend(b"0         ");

        assert_eq!(buf.next_frame(&codec).unwrap().unwrap(), b"");
    }

    #[test]
    fn corrupt_header_fails_before_the_payload_arrives() {
        let codec = FrameCodec::default();
        let mut buf = FrameBuf::new();
        buf.extend(b"not a len!");

        assert!(matches!(buf.next_frame(&codec), Err(RecvErr::Framing(_))));
    }
}
