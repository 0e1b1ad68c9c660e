//! The implementation of the sending end of the framing protocol.

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{FrameCodec, SendErr};

/// The sending end handle of the communication.
pub struct FrameSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    codec: FrameCodec,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    /// Creates a new `FrameSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    /// * `codec` - The codec used to frame every message.
    pub(super) fn new(tx: W, codec: FrameCodec) -> Self {
        Self { tx, codec }
    }

    /// Sends `msg` through the inner writer.
    ///
    /// # Arguments
    /// * `msg` - A serializable object.
    ///
    /// # Returns
    /// A result object that returns `SendErr` on failure.
    pub async fn send<T: Serialize + ?Sized>(&mut self, msg: &T) -> Result<(), SendErr> {
        let frame = self.codec.encode(msg)?;
        self.tx.write_all(&frame).await?;
        self.tx.flush().await?;
        Ok(())
    }

    /// Writes raw bytes, bypassing the codec.
    ///
    /// Only useful to talk to a peer that doesn't follow the protocol.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), SendErr> {
        self.tx.write_all(bytes).await?;
        self.tx.flush().await?;
        Ok(())
    }
}
