//! The implementation of the receiving end of the framing protocol.

use std::io;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{FrameCodec, RecvErr};

/// The receiving end handle of the communication.
pub struct FrameReceiver<R: AsyncRead + Unpin> {
    rx: R,
    codec: FrameCodec,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    /// Creates a new `FrameReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    /// * `codec` - The codec used to unframe every message.
    pub(super) fn new(rx: R, codec: FrameCodec) -> Self {
        Self {
            rx,
            codec,
            buf: Vec::new(),
        }
    }

    /// Waits to receive a new message from the inner reader.
    ///
    /// A single read may return less than asked for, the payload is accumulated until
    /// the length announced by the header is reached or the stream ends.
    ///
    /// # Returns
    /// A result object that returns `T` on success or `RecvErr` on failure.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, RecvErr> {
        let Self { rx, codec, buf } = self;

        buf.resize(codec.header_len(), 0);
        let n = rx.read(buf).await?;
        if n == 0 {
            return Err(RecvErr::PeerDisconnected(None));
        }

        rx.read_exact(&mut buf[n..]).await?;
        let len = codec.parse_header(buf)?;

        // Grows with the bytes that actually arrive, a header alone never allocates.
        buf.clear();
        let filled = (&mut *rx).take(len as u64).read_to_end(buf).await?;

        if filled < len {
            let e = io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream closed after {filled} of {len} payload bytes"),
            );
            return Err(RecvErr::PeerDisconnected(Some(e)));
        }

        codec.decode(buf)
    }
}
